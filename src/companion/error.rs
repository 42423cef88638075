//! 컴패니언 획득/실행 에러

use liveupdater_updater_lib::{DownloadError, ResolutionError};

#[derive(thiserror::Error, Debug)]
pub enum CompanionError {
    #[error("Release resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Artifact download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("Failed to launch '{program}': {message}")]
    Launch { program: String, message: String },

    #[error("Environment bootstrap failed: {0}")]
    Install(String),

    #[error("Invalid companion configuration: {0}")]
    Config(String),

    #[error("Companion is already running")]
    AlreadyRunning,
}

impl CompanionError {
    pub fn launch(program: &std::path::Path, err: &std::io::Error) -> Self {
        Self::Launch {
            program: program.display().to_string(),
            message: err.to_string(),
        }
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Resolution(_) => "RESOLUTION_ERROR",
            Self::Download(_) => "DOWNLOAD_ERROR",
            Self::Launch { .. } => "LAUNCH_ERROR",
            Self::Install(_) => "INSTALL_ERROR",
            Self::Config(_) => "INVALID_CONFIG",
            Self::AlreadyRunning => "ALREADY_RUNNING",
        }
    }
}
