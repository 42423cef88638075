//! 자식 프로세스 실행 및 콘솔 출력 중계

pub mod managed_process;

pub use managed_process::{LogBuffer, LogLine, LogSource, ManagedProcess};
