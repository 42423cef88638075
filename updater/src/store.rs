//! Artifact Store: 관리 바이너리 디렉터리
//!
//! 다운로드는 같은 디렉터리의 임시 파일에 스트리밍한 뒤 rename으로 교체합니다.
//! 읽는 쪽은 항상 이전 완성본 또는 새 완성본만 보게 됩니다.

use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::io::Write;
use std::path::Path;

use crate::error::DownloadError;

pub struct ArtifactStore {
    http: reqwest::Client,
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactStore {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent("liveupdater/1.0")
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { http }
    }

    /// Create the directory (and parents) if absent.
    pub fn ensure_directory(&self, path: &Path) -> Result<(), DownloadError> {
        std::fs::create_dir_all(path).map_err(|e| DownloadError::from_io(&e, "create_dir_all", path))
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Stream `url` into `destination`, replacing any previous file atomically.
    /// Returns the number of bytes written.
    pub async fn download(&self, url: &str, destination: &Path) -> Result<u64, DownloadError> {
        tracing::info!("Downloading {} → {}", url, destination.display());

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let written = write_stream_atomic(response.bytes_stream(), destination).await?;
        tracing::info!("Downloaded {} ({} bytes)", destination.display(), written);
        Ok(written)
    }

    /// Set the executable bit. No-op on Windows.
    pub fn mark_executable(&self, path: &Path) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(perms.mode() | 0o755);
            std::fs::set_permissions(path, perms)?;
        }
        #[cfg(not(unix))]
        {
            let _ = path;
        }
        Ok(())
    }

    /// Download, then mark executable where the platform needs it.
    /// Failing to set the bit is logged, not fatal.
    pub async fn install(
        &self,
        url: &str,
        destination: &Path,
        needs_exec_bit: bool,
    ) -> Result<u64, DownloadError> {
        let written = self.download(url, destination).await?;
        if needs_exec_bit {
            if let Err(e) = self.mark_executable(destination) {
                tracing::warn!(
                    "Could not make binary executable: {} ({})",
                    destination.display(),
                    e
                );
            }
        }
        Ok(written)
    }
}

/// Write a byte stream to a sibling temp file and rename it over `destination`.
/// The temp file is removed if the stream fails midway.
pub async fn write_stream_atomic<S, B, E>(stream: S, destination: &Path) -> Result<u64, DownloadError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| DownloadError::from_io(&e, "create_dir_all", &parent))?;

    let mut temp = tempfile::Builder::new()
        .prefix(".download-")
        .tempfile_in(&parent)
        .map_err(|e| DownloadError::from_io(&e, "create temp file", &parent))?;

    let mut written: u64 = 0;
    futures_util::pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::Request {
            url: destination.display().to_string(),
            message: e.to_string(),
        })?;
        let bytes = chunk.as_ref();
        temp.write_all(bytes)
            .map_err(|e| DownloadError::from_io(&e, "write", temp.path()))?;
        written += bytes.len() as u64;
    }

    temp.as_file()
        .sync_all()
        .map_err(|e| DownloadError::from_io(&e, "sync", temp.path()))?;

    // persist가 돌려주는 File 핸들은 즉시 닫는다 (실행 시 ETXTBSY 방지)
    let file = temp
        .persist(destination)
        .map_err(|e| DownloadError::from_io(&e.error, "persist", destination))?;
    drop(file);

    Ok(written)
}
