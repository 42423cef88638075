//! 데몬 공유 상태: 콘솔, IPC, 틱 루프가 함께 사용

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::companion::CompanionSupervisor;
use crate::config::HostConfig;
use crate::host::{Invocation, ModuleRegistry};
use crate::modmgr::ModuleManager;
use crate::plugin::ScriptRunner;
use crate::python_env::PythonEnv;

pub struct HostContext {
    /// 명령 처리는 이 락으로 직렬화됨
    pub registry: Mutex<ModuleRegistry>,
    pub manager: ModuleManager,
    pub companion: Arc<CompanionSupervisor>,
    pub runner: ScriptRunner,
}

impl HostContext {
    pub fn new(cfg: &HostConfig, python: Arc<PythonEnv>) -> Self {
        Self {
            registry: Mutex::new(ModuleRegistry::new(&cfg.modules_dir)),
            manager: ModuleManager::new(&cfg.modules_dir),
            companion: Arc::new(CompanionSupervisor::new(cfg.log_buffer_size)),
            runner: ScriptRunner::new(python),
        }
    }

    /// 시작 시 플러그인 디렉터리 전체 로드
    pub async fn load_modules(&self) -> usize {
        let mut registry = self.registry.lock().await;
        self.manager.load_all(&mut *registry).len()
    }

    /// 기한이 된 태스크를 꺼내 각각 별도 태스크로 실행
    pub async fn tick(self: &Arc<Self>) -> usize {
        let due = self.registry.lock().await.tick(Instant::now());
        let count = due.len();
        for invocation in due {
            let ctx = Arc::clone(self);
            tokio::spawn(async move {
                ctx.run_invocation(&invocation).await;
            });
        }
        count
    }

    pub async fn run_invocation(&self, invocation: &Invocation) -> Option<serde_json::Value> {
        match self.runner.invoke(invocation).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    "[{}] {} failed: {:#}",
                    invocation.module,
                    invocation.function,
                    e
                );
                None
            }
        }
    }
}
