//! Managed Process - companion spawning with merged output relay
//!
//! - stdout/stderr are merged into one ordered stream of lines
//! - every line goes to the host log (`[BINARY]` prefix) and to a ring buffer
//! - the relay task ends when both streams close or the token is canceled
//! - the child is never killed by the supervisor

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Default maximum number of log lines to keep in the ring buffer.
pub const DEFAULT_LOG_BUFFER: usize = 10_000;

/// Prefix that marks relayed companion output in the host log.
pub const RELAY_PREFIX: &str = "[BINARY]";

// ─── Log Types ───────────────────────────────────────────────

/// A single line of console output from the companion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    /// Sequential ID for polling (`GET /api/companion/console?since=<id>`)
    pub id: u64,
    /// Unix timestamp (seconds)
    pub timestamp: u64,
    pub source: LogSource,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// Merged stdout + stderr
    Output,
    /// Lifecycle messages from the supervisor itself
    System,
}

// ─── Log Buffer ──────────────────────────────────────────────

/// Ring buffer that stores recent log lines with sequential IDs.
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    next_id: u64,
    max_size: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_BUFFER)
    }
}

impl LogBuffer {
    pub fn with_capacity(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            lines: VecDeque::with_capacity(max_size.min(1024)),
            next_id: 1,
            max_size,
        }
    }

    pub fn push(&mut self, source: LogSource, content: String) -> LogLine {
        let line = LogLine {
            id: self.next_id,
            timestamp: current_timestamp(),
            source,
            content,
        };
        self.next_id += 1;

        if self.lines.len() >= self.max_size {
            self.lines.pop_front();
        }
        self.lines.push_back(line.clone());
        line
    }

    /// All lines with id > `since_id`.
    pub fn get_since(&self, since_id: u64) -> Vec<LogLine> {
        self.lines
            .iter()
            .filter(|l| l.id > since_id)
            .cloned()
            .collect()
    }

    pub fn get_recent(&self, count: usize) -> Vec<LogLine> {
        self.lines.iter().rev().take(count).rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// ─── Managed Process ─────────────────────────────────────────

/// A companion process owned by the supervisor.
pub struct ManagedProcess {
    pub program: String,
    pub pid: Option<u32>,
    log_buffer: Arc<Mutex<LogBuffer>>,
    running_rx: watch::Receiver<bool>,
    drained_rx: watch::Receiver<bool>,
    exit_rx: watch::Receiver<Option<String>>,
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ManagedProcess {
    /// Spawn `program` in `working_dir` and start relaying its output.
    ///
    /// Returns as soon as the child is spawned. Failures after that point show
    /// up only in the relayed log.
    pub async fn spawn(
        program: &Path,
        args: &[String],
        working_dir: &Path,
        log_capacity: usize,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        let mut cmd = TokioCommand::new(program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(false);

        // Windows: hide console window
        crate::utils::hide_console_window(&mut cmd);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let program_name = program.display().to_string();

        let (running_tx, running_rx) = watch::channel(true);
        let (drained_tx, drained_rx) = watch::channel(false);
        let (exit_tx, exit_rx) = watch::channel(None);
        let log_buffer = Arc::new(Mutex::new(LogBuffer::with_capacity(log_capacity)));

        {
            let msg = match pid {
                Some(pid) => format!("Companion started with PID {}", pid),
                None => "Companion started".to_string(),
            };
            tracing::info!("{} ({})", msg, program_name);
            log_buffer.lock().await.push(LogSource::System, msg);
        }

        // ── output relay ─────────────────────────────────────
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        {
            let buf = log_buffer.clone();
            let token = cancel.clone();
            tokio::spawn(async move {
                let mut out = stdout.map(|s| RelayStream::new(s, "stdout"));
                let mut err = stderr.map(|s| RelayStream::new(s, "stderr"));

                while out.is_some() || err.is_some() {
                    let line = tokio::select! {
                        _ = token.cancelled() => {
                            tracing::debug!("Companion relay canceled");
                            break;
                        }
                        res = next_line(&mut out), if out.is_some() => {
                            match res {
                                Some(line) => line,
                                None => { out = None; continue; }
                            }
                        }
                        res = next_line(&mut err), if err.is_some() => {
                            match res {
                                Some(line) => line,
                                None => { err = None; continue; }
                            }
                        }
                    };
                    tracing::info!(target: "companion", "{} {}", RELAY_PREFIX, line);
                    buf.lock().await.push(LogSource::Output, line);
                }
                let _ = drained_tx.send(true);
            });
        }

        // ── process waiter ───────────────────────────────────
        {
            let buf = log_buffer.clone();
            let token = cancel;
            tokio::spawn(async move {
                let exit_msg = tokio::select! {
                    _ = token.cancelled() => {
                        // 자식은 그대로 두고 감시만 중단
                        return;
                    }
                    status = child.wait() => match status {
                        Ok(status) => format!("Companion exited with {}", status),
                        Err(e) => format!("Failed to wait for companion: {}", e),
                    },
                };
                tracing::info!("{}", exit_msg);
                buf.lock().await.push(LogSource::System, exit_msg.clone());
                let _ = exit_tx.send(Some(exit_msg));
                let _ = running_tx.send(false);
            });
        }

        Ok(Self {
            program: program_name,
            pid,
            log_buffer,
            running_rx,
            drained_rx,
            exit_rx,
        })
    }

    pub async fn console_since(&self, since_id: u64) -> Vec<LogLine> {
        self.log_buffer.lock().await.get_since(since_id)
    }

    pub async fn recent_console(&self, count: usize) -> Vec<LogLine> {
        self.log_buffer.lock().await.get_recent(count)
    }

    pub fn is_running(&self) -> bool {
        *self.running_rx.borrow()
    }

    /// Exit description once the child has exited.
    pub fn exit_status(&self) -> Option<String> {
        self.exit_rx.borrow().clone()
    }

    /// Whether the relay has finished (streams closed or canceled).
    pub fn is_drained(&self) -> bool {
        *self.drained_rx.borrow()
    }

    /// Wait until the child exits.
    pub async fn wait_for_exit(&self) {
        let mut rx = self.running_rx.clone();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Wait until the relay task has finished.
    pub async fn wait_drained(&self) {
        let mut rx = self.drained_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────

/// One side of the child's output. Lines are split on `\n` and decoded lossily,
/// so invalid UTF-8 never ends the relay.
struct RelayStream<R> {
    reader: BufReader<R>,
    // read_until 이 취소되어도 읽은 바이트는 여기 남음
    pending: Vec<u8>,
    name: &'static str,
}

impl<R: AsyncRead + Unpin> RelayStream<R> {
    fn new(inner: R, name: &'static str) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
            name,
        }
    }

    fn take_line(&mut self) -> String {
        if self.pending.last() == Some(&b'\n') {
            self.pending.pop();
        }
        if self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

/// `None` only at end of stream or on a read error.
async fn next_line<R>(stream: &mut Option<RelayStream<R>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let s = stream.as_mut()?;
    match s.reader.read_until(b'\n', &mut s.pending).await {
        Ok(0) if s.pending.is_empty() => None,
        Ok(_) => Some(s.take_line()),
        Err(e) => {
            tracing::warn!("Companion {} relay stopped: {}", s.name, e);
            None
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ─── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_buffer_push_and_query() {
        let mut buffer = LogBuffer::default();
        buffer.push(LogSource::Output, "line 1".into());
        buffer.push(LogSource::Output, "line 2".into());
        buffer.push(LogSource::System, "exit".into());

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.get_since(0).len(), 3);
        assert_eq!(buffer.get_since(1).len(), 2);
        assert_eq!(buffer.get_recent(2)[0].content, "line 2");
    }

    #[test]
    fn test_log_buffer_ring() {
        let mut buffer = LogBuffer::with_capacity(100);
        for i in 0..150 {
            buffer.push(LogSource::Output, format!("line {}", i));
        }
        assert_eq!(buffer.len(), 100);
        // 앞쪽 50줄은 밀려남
        assert_eq!(buffer.get_recent(100)[0].id, 51);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn relays_stdout_and_stderr_and_records_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let proc = ManagedProcess::spawn(
            Path::new("sh"),
            &["-c".to_string(), "echo out; echo err 1>&2; pwd".to_string()],
            tmp.path(),
            DEFAULT_LOG_BUFFER,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        proc.wait_for_exit().await;
        proc.wait_drained().await;
        assert!(!proc.is_running());
        assert!(proc.exit_status().unwrap().contains("exited"));

        let lines = proc.console_since(0).await;
        let output: Vec<&str> = lines
            .iter()
            .filter(|l| l.source == LogSource::Output)
            .map(|l| l.content.as_str())
            .collect();
        assert!(output.contains(&"out"));
        assert!(output.contains(&"err"));
        // 작업 디렉터리 확인
        let cwd = std::fs::canonicalize(tmp.path()).unwrap();
        assert!(output
            .iter()
            .any(|l| std::fs::canonicalize(l).map(|p| p == cwd).unwrap_or(false)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_stops_relay_without_killing_child() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("done");
        let token = CancellationToken::new();
        let script = format!("sleep 1; touch {}", marker.display());
        let proc = ManagedProcess::spawn(
            Path::new("sh"),
            &["-c".to_string(), script],
            tmp.path(),
            16,
            token.clone(),
        )
        .await
        .unwrap();

        token.cancel();
        proc.wait_drained().await;
        assert!(proc.is_drained());

        // 자식은 계속 실행되어 마커를 만든다
        for _ in 0..50 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert!(marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invalid_utf8_line_does_not_end_relay() {
        let tmp = tempfile::tempdir().unwrap();
        let proc = ManagedProcess::spawn(
            Path::new("sh"),
            &[
                "-c".to_string(),
                "echo before; printf 'caf\\351\\n'; echo after; printf 'crlf\\r\\n'; printf tail".to_string(),
            ],
            tmp.path(),
            DEFAULT_LOG_BUFFER,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(format!("{:?}", proc).contains("ManagedProcess"));

        proc.wait_for_exit().await;
        proc.wait_drained().await;

        let output: Vec<String> = proc
            .console_since(0)
            .await
            .into_iter()
            .filter(|l| l.source == LogSource::Output)
            .map(|l| l.content)
            .collect();
        assert_eq!(output, vec!["before", "caf\u{FFFD}", "after", "crlf", "tail"]);
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let tmp = tempfile::tempdir().unwrap();
        let res = ManagedProcess::spawn(
            &tmp.path().join("does-not-exist"),
            &[],
            tmp.path(),
            16,
            CancellationToken::new(),
        )
        .await;
        assert!(res.is_err());
    }
}
