//! 릴리스 해석 / 아티팩트 다운로드 에러
//!
//! ## 지원하는 에러 상황
//! - 릴리스 인덱스 요청 실패 / 200이 아닌 응답
//! - 응답 본문 파싱 실패
//! - 플랫폼 에셋 없음
//! - 다운로드 전송 실패 / 파일 시스템 오류
//!
//! 재시도는 이 계층에서 하지 않습니다. 재시도 정책은 호출자 몫입니다.

use std::fmt;

/// 릴리스 인덱스에서 다운로드 URL을 결정하지 못함
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// 인덱스 요청 자체가 실패 (연결, TLS 등)
    Request { url: String, message: String },
    /// 인덱스가 성공 상태를 반환하지 않음
    Status { status: u16, body: String },
    /// 본문이 예상한 형태가 아님
    Parse { message: String },
    /// 기대한 파일명의 에셋이 없음
    AssetNotFound { asset: String },
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionError::Request { url, message } => {
                write!(f, "Release index request to {} failed: {}", url, message)
            }
            ResolutionError::Status { status, body } => {
                write!(f, "Release index returned status {}: {}", status, body)
            }
            ResolutionError::Parse { message } => {
                write!(f, "Release index could not be parsed: {}", message)
            }
            ResolutionError::AssetNotFound { asset } => {
                write!(f, "Could not find asset URL for: {}", asset)
            }
        }
    }
}

impl std::error::Error for ResolutionError {}

/// 아티팩트를 로컬 디렉터리에 내려받지 못함
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    Request { url: String, message: String },
    Status { url: String, status: u16 },
    Io { operation: String, path: String, message: String },
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::Request { url, message } => {
                write!(f, "Download of {} failed: {}", url, message)
            }
            DownloadError::Status { url, status } => {
                write!(f, "Download of {} returned status {}", url, status)
            }
            DownloadError::Io { operation, path, message } => {
                write!(f, "File system error during {} on '{}': {}", operation, path, message)
            }
        }
    }
}

impl std::error::Error for DownloadError {}

impl DownloadError {
    /// IO 에러를 DownloadError로 변환
    pub fn from_io(err: &std::io::Error, operation: &str, path: &std::path::Path) -> Self {
        DownloadError::Io {
            operation: operation.to_string(),
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_missing_asset() {
        let err = ResolutionError::AssetNotFound {
            asset: "server-linux-ubuntu".to_string(),
        };
        assert_eq!(err.to_string(), "Could not find asset URL for: server-linux-ubuntu");
    }

    #[test]
    fn io_conversion_keeps_path() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = DownloadError::from_io(&io, "persist", std::path::Path::new("/tmp/bin/x"));
        let msg = err.to_string();
        assert!(msg.contains("persist"));
        assert!(msg.contains("/tmp/bin/x"));
        assert!(msg.contains("denied"));
    }
}
