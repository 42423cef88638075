//! 컴패니언 프로세스 수명 관리
//!
//! 획득(`Acquire`) → 실행(`ManagedProcess`) → 출력 중계.
//! 실패는 호스트를 멈추지 않습니다. `start_or_log`가 에러를 기록하고 반환합니다.

pub mod acquire;
pub mod error;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::supervisor::managed_process::{LogLine, ManagedProcess, DEFAULT_LOG_BUFFER};

pub use acquire::{Acquire, ArtifactDelivery, Delivery, InterpreterDelivery, LaunchSpec};
pub use error::CompanionError;

#[derive(Debug, Clone, Serialize)]
pub struct CompanionStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub program: Option<String>,
    pub delivery: Option<String>,
    pub exit_status: Option<String>,
    pub last_error: Option<String>,
}

pub struct CompanionSupervisor {
    process: RwLock<Option<Arc<ManagedProcess>>>,
    delivery: RwLock<Option<&'static str>>,
    last_error: RwLock<Option<String>>,
    cancel: CancellationToken,
    log_capacity: usize,
}

impl Default for CompanionSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_BUFFER)
    }
}

impl CompanionSupervisor {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            process: RwLock::new(None),
            delivery: RwLock::new(None),
            last_error: RwLock::new(None),
            cancel: CancellationToken::new(),
            log_capacity,
        }
    }

    /// 획득 후 실행. 이미 실행 중이면 `AlreadyRunning`.
    pub async fn start<A: Acquire>(&self, acquirer: &A) -> Result<Arc<ManagedProcess>, CompanionError> {
        if let Some(p) = self.process.read().await.as_ref() {
            if p.is_running() {
                return Err(CompanionError::AlreadyRunning);
            }
        }

        *self.delivery.write().await = Some(acquirer.describe());
        tracing::info!("Acquiring companion ({} delivery)", acquirer.describe());

        let spec = acquirer.acquire().await?;
        let process = ManagedProcess::spawn(
            &spec.program,
            &spec.args,
            &spec.working_dir,
            self.log_capacity,
            self.cancel.child_token(),
        )
        .await
        .map_err(|e| CompanionError::launch(&spec.program, &e))?;

        let process = Arc::new(process);
        *self.process.write().await = Some(process.clone());
        *self.last_error.write().await = None;
        Ok(process)
    }

    /// 시작 실패를 error 레벨로 기록하고 계속 진행
    pub async fn start_or_log<A: Acquire>(&self, acquirer: &A) -> bool {
        match self.start(acquirer).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Companion startup failed, continuing without it: {}", e);
                *self.last_error.write().await = Some(e.to_string());
                false
            }
        }
    }

    /// 중계 태스크를 취소합니다. 자식 프로세스는 종료하지 않습니다.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn process(&self) -> Option<Arc<ManagedProcess>> {
        self.process.read().await.clone()
    }

    pub async fn status(&self) -> CompanionStatus {
        let process = self.process.read().await.clone();
        CompanionStatus {
            running: process.as_ref().map(|p| p.is_running()).unwrap_or(false),
            pid: process.as_ref().and_then(|p| p.pid),
            program: process.as_ref().map(|p| p.program.clone()),
            delivery: self.delivery.read().await.map(str::to_string),
            exit_status: process.as_ref().and_then(|p| p.exit_status()),
            last_error: self.last_error.read().await.clone(),
        }
    }

    pub async fn console_since(&self, since_id: u64) -> Vec<LogLine> {
        match self.process.read().await.as_ref() {
            Some(p) => p.console_since(since_id).await,
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingAcquire;

    impl Acquire for FailingAcquire {
        fn describe(&self) -> &'static str {
            "failing"
        }

        async fn acquire(&self) -> Result<LaunchSpec, CompanionError> {
            Err(CompanionError::Install("pip exited with status 1".into()))
        }
    }

    struct MissingProgram(std::path::PathBuf);

    impl Acquire for MissingProgram {
        fn describe(&self) -> &'static str {
            "missing"
        }

        async fn acquire(&self) -> Result<LaunchSpec, CompanionError> {
            Ok(LaunchSpec {
                program: self.0.join("nope"),
                args: vec![],
                working_dir: self.0.clone(),
            })
        }
    }

    #[tokio::test]
    async fn acquisition_failure_is_logged_not_fatal() {
        let sup = CompanionSupervisor::default();
        assert!(!sup.start_or_log(&FailingAcquire).await);

        let status = sup.status().await;
        assert!(!status.running);
        assert_eq!(status.delivery.as_deref(), Some("failing"));
        assert!(status.last_error.unwrap().contains("pip exited"));
        assert!(sup.console_since(0).await.is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_is_launch_error() {
        let tmp = tempfile::tempdir().unwrap();
        let sup = CompanionSupervisor::default();
        let err = sup
            .start(&MissingProgram(tmp.path().to_path_buf()))
            .await
            .unwrap_err();
        assert!(matches!(err, CompanionError::Launch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        struct Sleeper;
        impl Acquire for Sleeper {
            fn describe(&self) -> &'static str {
                "sleeper"
            }
            async fn acquire(&self) -> Result<LaunchSpec, CompanionError> {
                Ok(LaunchSpec {
                    program: "sh".into(),
                    args: vec!["-c".into(), "echo up; sleep 2".into()],
                    working_dir: std::env::temp_dir(),
                })
            }
        }

        let sup = CompanionSupervisor::default();
        let process = sup.start(&Sleeper).await.unwrap();
        assert!(matches!(
            sup.start(&Sleeper).await,
            Err(CompanionError::AlreadyRunning)
        ));
        process.wait_for_exit().await;
        process.wait_drained().await;

        let lines = sup.console_since(0).await;
        assert!(lines.iter().any(|l| l.content == "up"));
        sup.shutdown();
        assert!(sup.is_shut_down());
    }
}
