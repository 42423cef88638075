//! Host 전용 에러 타입: 에러 종류를 구분하여 IPC 핸들러에서
//! 적절한 HTTP 상태 코드를 반환할 수 있게 합니다.

use axum::http::StatusCode;

use super::state_machine::TransitionError;

#[derive(thiserror::Error, Debug)]
pub enum HostError {
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    #[error("Module '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("Invalid module archive '{path}': {reason}")]
    InvalidArchive { path: String, reason: String },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Loader context for '{0}' cannot be released")]
    LoaderBusy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ModuleNotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyLoaded(_) | Self::InvalidTransition(_) | Self::LoaderBusy(_) => {
                StatusCode::CONFLICT
            }
            Self::InvalidArchive { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON 에러 응답 생성
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ModuleNotFound(_) => "MODULE_NOT_FOUND",
            Self::AlreadyLoaded(_) => "ALREADY_LOADED",
            Self::InvalidArchive { .. } => "INVALID_ARCHIVE",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::LoaderBusy(_) => "LOADER_BUSY",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

/// axum 핸들러에서 HostError를 직접 반환할 수 있도록 IntoResponse 구현
impl axum::response::IntoResponse for HostError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = axum::Json(self.to_json());
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = HostError::ModuleNotFound("Foo".into());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_json()["error_code"], "MODULE_NOT_FOUND");
        assert_eq!(err.to_json()["error"], "Module 'Foo' not found");
    }

    #[test]
    fn archive_error_names_path() {
        let err = HostError::InvalidArchive {
            path: "plugins/broken.jar".into(),
            reason: "missing module.toml".into(),
        };
        assert!(err.to_string().contains("plugins/broken.jar"));
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
