//! 운영자 콘솔: stdin과 `POST /api/command`가 같은 디스패처를 사용
//!
//! 내장 명령: `reloadmodule <name>`, `reloadall`, `modules [enabled|disabled] [--full]`, `help`.
//! 그 외는 명령 라우팅 테이블을 통해 소유 모듈로 전달됩니다.

use serde::Serialize;

use crate::context::HostContext;
use crate::host::CommandDispatch;
use crate::modmgr::{NameFilter, ReloadCommand};

#[derive(Debug, Clone, Serialize)]
pub struct ConsoleReply {
    pub success: bool,
    pub message: String,
}

impl ConsoleReply {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

const BUILTINS: &[(&str, &str)] = &[
    ("reloadmodule <module-name>", "Disable, unload and load a module again"),
    ("reloadall", "Reload every loaded module"),
    ("modules [enabled|disabled] [--full]", "List loaded modules"),
    ("help", "Show this list"),
];

pub async fn execute(ctx: &HostContext, line: &str) -> ConsoleReply {
    let mut parts = line.split_whitespace();
    let Some(label) = parts.next() else {
        return ConsoleReply::fail("Empty command");
    };
    let args: Vec<&str> = parts.collect();

    match label.to_lowercase().as_str() {
        ReloadCommand::LABEL => {
            let mut registry = ctx.registry.lock().await;
            let reply = ReloadCommand::execute(&ctx.manager, &mut *registry, &args);
            ConsoleReply {
                success: reply.is_success(),
                message: reply.to_string(),
            }
        }
        "reloadall" => {
            let mut registry = ctx.registry.lock().await;
            let reports = ctx.manager.reload_all(&mut *registry);
            if reports.is_empty() {
                return ConsoleReply::ok("No modules loaded");
            }
            let success = reports.iter().all(|r| r.is_success());
            let lines: Vec<String> = reports.iter().map(|r| r.to_string()).collect();
            ConsoleReply {
                success,
                message: lines.join("\n"),
            }
        }
        "modules" => list_modules(ctx, &args).await,
        "help" => help(ctx).await,
        _ => dispatch(ctx, label, &args).await,
    }
}

async fn list_modules(ctx: &HostContext, args: &[&str]) -> ConsoleReply {
    let mut filter = NameFilter::All;
    let mut full = false;
    for arg in args {
        match arg.to_lowercase().as_str() {
            "enabled" => filter = NameFilter::Enabled,
            "disabled" => filter = NameFilter::Disabled,
            "--full" | "-f" => full = true,
            other => {
                return ConsoleReply::fail(format!(
                    "Unknown option '{}'. Usage: modules [enabled|disabled] [--full]",
                    other
                ))
            }
        }
    }

    let registry = ctx.registry.lock().await;
    let names = ctx.manager.module_names(&*registry, filter, full);
    ConsoleReply::ok(format!("Modules ({}): {}", names.len(), names.join(", ")))
}

async fn help(ctx: &HostContext) -> ConsoleReply {
    let mut lines: Vec<String> = BUILTINS
        .iter()
        .map(|(usage, desc)| format!("  {} - {}", usage, desc))
        .collect();

    let labels = ctx.registry.lock().await.command_labels();
    if !labels.is_empty() {
        lines.push("Module commands:".to_string());
        lines.extend(
            labels
                .into_iter()
                .map(|(label, module)| format!("  {} ({})", label, module)),
        );
    }
    ConsoleReply::ok(lines.join("\n"))
}

async fn dispatch(ctx: &HostContext, label: &str, args: &[&str]) -> ConsoleReply {
    let owned: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    // 스크립트 실행 중에는 락을 잡지 않음
    let dispatched = ctx.registry.lock().await.dispatch_command(label, &owned);

    match dispatched {
        CommandDispatch::Unknown => ConsoleReply::fail(format!(
            "Unknown command: {}. Type 'help' for a list of commands.",
            label
        )),
        CommandDispatch::Inactive { module } => {
            ConsoleReply::fail(format!("Module {} is disabled", module))
        }
        CommandDispatch::Invoke(invocation) => match ctx.runner.invoke(&invocation).await {
            Ok(Some(result)) => {
                let message = result
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| result.to_string());
                ConsoleReply::ok(message)
            }
            Ok(None) => ConsoleReply::ok(format!("Dispatched to {}", invocation.module)),
            Err(e) => ConsoleReply::fail(format!("Command failed: {:#}", e)),
        },
    }
}
