//! 모듈 스크립트 실행기
//!
//! 엔트리 스크립트가 있는 모듈의 명령/이벤트/태스크 호출을 관리 venv의
//! Python으로 실행합니다. 프로토콜:
//! - `python <entry> <function>`
//! - stdin: JSON 페이로드
//! - stdout: JSON 결과
//! - stderr: 로그 (debug 레벨로 기록)

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::host::Invocation;
use crate::python_env::PythonEnv;
use crate::utils::hide_console_window;

/// 기본 스크립트 타임아웃 (초)
pub const DEFAULT_PLUGIN_TIMEOUT_SECS: u64 = 120;

pub struct ScriptRunner {
    python: Arc<PythonEnv>,
    timeout_secs: u64,
}

impl ScriptRunner {
    pub fn new(python: Arc<PythonEnv>) -> Self {
        Self {
            python,
            timeout_secs: DEFAULT_PLUGIN_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// 선언형 모듈(엔트리 없음)은 로그만 남기고 `None`을 돌려줍니다.
    pub async fn invoke(&self, invocation: &Invocation) -> Result<Option<Value>> {
        let Some(entry) = invocation.entry.as_deref() else {
            tracing::info!(
                "[{}] {} (declarative module, nothing to run)",
                invocation.module,
                invocation.function
            );
            return Ok(None);
        };

        let python_exe = self.python.python_path().await?;
        let working_dir = entry.parent().unwrap_or_else(|| Path::new("."));
        run_script(
            &python_exe,
            entry,
            &invocation.function,
            &invocation.payload,
            working_dir,
            self.timeout_secs,
        )
        .await
        .map(Some)
    }
}

/// stdin을 읽지 않고 끝난 스크립트는 종료 상태로 판단하므로 끊긴 파이프는 무시
async fn feed_stdin<W>(stdin: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let result = match stdin.write_all(payload).await {
        Ok(()) => stdin.shutdown().await,
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            tracing::debug!("Script closed stdin early: {}", e);
            Ok(())
        }
        other => other,
    }
}

/// `interpreter script function` 실행, stdin으로 JSON을 넘기고 stdout JSON을 받음
pub async fn run_script(
    interpreter: &Path,
    script: &Path,
    function: &str,
    payload: &Value,
    working_dir: &Path,
    timeout_secs: u64,
) -> Result<Value> {
    tracing::debug!("Executing script: {} -> {}", script.display(), function);

    let payload_json = serde_json::to_string(payload)?;

    let mut cmd = Command::new(interpreter);
    cmd.arg(script)
        .arg(function)
        .current_dir(working_dir)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .env("PYTHONIOENCODING", "utf-8");
    hide_console_window(&mut cmd);

    let mut child = cmd.spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        feed_stdin(&mut stdin, payload_json.as_bytes()).await?;
    }

    let stderr_pipe = child.stderr.take();
    let stderr_handle = tokio::spawn(async move {
        let mut log_lines = Vec::new();
        if let Some(pipe) = stderr_pipe {
            let mut reader = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                tracing::debug!("Script stderr: {}", line);
                log_lines.push(line);
            }
        }
        log_lines.join("\n")
    });

    let stdout_pipe = child.stdout.take();
    let stdout_handle = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stdout_pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).to_string()
    });

    let status = tokio::time::timeout(
        std::time::Duration::from_secs(timeout_secs),
        child.wait(),
    )
    .await;

    match status {
        Ok(Ok(exit_status)) => {
            let stderr_str = stderr_handle.await.unwrap_or_default();
            let stdout_str = stdout_handle.await.unwrap_or_default();

            if !exit_status.success() {
                tracing::error!("Script failed (exit {:?}): {}", exit_status.code(), stderr_str);
                return Err(anyhow::anyhow!("Script execution failed: {}", stderr_str));
            }

            serde_json::from_str::<Value>(stdout_str.trim()).map_err(|e| {
                tracing::error!("Failed to parse script JSON: {} | stdout: {}", e, stdout_str);
                anyhow::anyhow!("Invalid JSON from script: {}\nOutput: {}", e, stdout_str)
            })
        }
        Ok(Err(e)) => {
            tracing::error!("Script process error: {}", e);
            Err(anyhow::anyhow!("Script process error: {}", e))
        }
        Err(_) => {
            tracing::warn!(
                "Script timed out after {}s: {} -> {}, killing process",
                timeout_secs,
                script.display(),
                function
            );
            let _ = child.kill().await;
            Err(anyhow::anyhow!("Script timed out after {}s", timeout_secs))
        }
    }
}
