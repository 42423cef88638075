//! `reloadmodule <module-name>` 운영자 명령

use std::fmt;

use crate::host::ModuleHost;

use super::{ModuleManager, ReloadReport};

pub struct ReloadCommand;

#[derive(Debug)]
pub enum CommandReply {
    Usage,
    NotFound(String),
    Reloaded(ReloadReport),
}

impl CommandReply {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandReply::Reloaded(r) if r.is_success())
    }
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandReply::Usage => f.write_str(ReloadCommand::USAGE),
            CommandReply::NotFound(name) => write!(f, "Module not found: {}", name),
            CommandReply::Reloaded(report) => write!(f, "{}", report),
        }
    }
}

impl ReloadCommand {
    pub const LABEL: &'static str = "reloadmodule";
    pub const USAGE: &'static str = "Usage: reloadmodule <module-name>";

    /// 인자는 정확히 하나. 이름이 해석되지 않으면 빈 대상으로 reload를 호출하고
    /// 그 결과를 NotFound로 보고합니다.
    pub fn execute<H: ModuleHost>(
        manager: &ModuleManager,
        host: &mut H,
        args: &[&str],
    ) -> CommandReply {
        let [name] = args else {
            return CommandReply::Usage;
        };

        let target = host.module(name);
        match manager.reload(host, target.as_ref()) {
            Ok(report) => CommandReply::Reloaded(report),
            Err(_) => CommandReply::NotFound(name.to_string()),
        }
    }
}
