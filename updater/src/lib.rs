//! # liveupdater 릴리스 전달 라이브러리
//!
//! 컴패니언 서버 바이너리를 GitHub 릴리스에서 찾아 로컬 디렉터리로 내려받습니다.
//!
//! ## 구성
//! - **platform.rs**: 호스트 OS → 플랫폼 키 → 에셋 파일명
//! - **github.rs**: `releases/latest` 인덱스 조회, 에셋 URL 결정
//! - **store.rs**: 관리 디렉터리, 원자적 교체 다운로드, 실행 권한
//! - **error.rs**: 해석/다운로드 실패 분류
//!
//! ## 릴리스 규약
//! 최신 릴리스에 플랫폼별 에셋이 정확히 하나씩 있어야 합니다:
//! ```text
//! server-windows.exe
//! server-macos
//! server-linux-ubuntu
//! ```

pub mod error;
pub mod github;
pub mod platform;
pub mod store;

pub use error::{DownloadError, ResolutionError};
pub use github::{ReleaseAsset, ReleaseIndex, ReleaseResolver, DEFAULT_API_BASE};
pub use platform::PlatformKey;
pub use store::{write_stream_atomic, ArtifactStore};
