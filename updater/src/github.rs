//! GitHub Release API 클라이언트
//!
//! `releases/latest` 인덱스를 받아 플랫폼에 맞는 에셋의 다운로드 URL을 찾습니다.
//! 인증 없이 요청하며, 재시도하지 않습니다.

use serde::Deserialize;

use crate::error::ResolutionError;
use crate::platform::PlatformKey;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const ACCEPT_HEADER: &str = "application/vnd.github.v3+json";

/// Release Index 응답 (필요한 필드만)
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseIndex {
    #[serde(default)]
    pub tag_name: Option<String>,
    pub assets: Vec<ReleaseAsset>,
}

/// Release Asset descriptor
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

impl ReleaseIndex {
    /// Exact filename match against the asset list. Escaped ampersands in the
    /// URL are unescaped before it is returned.
    pub fn download_url_for(&self, asset_name: &str) -> Result<String, ResolutionError> {
        self.assets
            .iter()
            .find(|a| a.name == asset_name)
            .map(|a| unescape_ampersands(&a.browser_download_url))
            .ok_or_else(|| ResolutionError::AssetNotFound {
                asset: asset_name.to_string(),
            })
    }
}

fn unescape_ampersands(url: &str) -> String {
    url.replace("\\u0026", "&").replace("&amp;", "&")
}

/// Release Resolver: `resolve(platform) -> download URL`
pub struct ReleaseResolver {
    owner: String,
    repo: String,
    http: reqwest::Client,
    /// API 베이스 URL (기본: "https://api.github.com")
    /// 로컬 mock 서버 테스트 시 "http://127.0.0.1:9876" 등으로 오버라이드
    base_url: String,
}

impl ReleaseResolver {
    pub fn new(owner: &str, repo: &str) -> Self {
        Self::with_base_url(owner, repo, None)
    }

    /// base_url을 오버라이드할 수 있는 생성자 (테스트/mock 서버용)
    pub fn with_base_url(owner: &str, repo: &str, base_url: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("liveupdater/1.0")
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            http,
            base_url: base_url
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    /// `owner/repo` 형식 문자열에서 생성
    pub fn from_slug(slug: &str, base_url: Option<&str>) -> Option<Self> {
        let (owner, repo) = slug.split_once('/')?;
        if owner.is_empty() || repo.is_empty() {
            return None;
        }
        Some(Self::with_base_url(owner, repo, base_url))
    }

    pub fn latest_release_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.base_url, self.owner, self.repo
        )
    }

    /// 최신 릴리스 인덱스 가져오기
    pub async fn fetch_latest_release(&self) -> Result<ReleaseIndex, ResolutionError> {
        let url = self.latest_release_url();

        let response = self
            .http
            .get(&url)
            .header("Accept", ACCEPT_HEADER)
            .send()
            .await
            .map_err(|e| ResolutionError::Request {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ResolutionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(|e| ResolutionError::Request {
            url: url.clone(),
            message: e.to_string(),
        })?;

        serde_json::from_str::<ReleaseIndex>(&body).map_err(|e| ResolutionError::Parse {
            message: e.to_string(),
        })
    }

    /// 플랫폼 에셋의 다운로드 URL 결정
    pub async fn resolve(&self, platform: PlatformKey) -> Result<String, ResolutionError> {
        let asset_name = platform.asset_name();
        tracing::debug!("Resolving {} from {}", asset_name, self.latest_release_url());

        let index = self.fetch_latest_release().await?;
        let url = index.download_url_for(asset_name)?;

        tracing::info!(
            "Resolved {} ({}) -> {}",
            asset_name,
            index.tag_name.as_deref().unwrap_or("untagged"),
            url
        );
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> ReleaseIndex {
        let json = r#"{
            "tag_name": "v1.4.0",
            "assets": [
                { "name": "server-windows.exe", "browser_download_url": "https://example.com/dl/server-windows.exe?a=1&amp;b=2", "size": 10 },
                { "name": "server-macos", "browser_download_url": "https://example.com/dl/server-macos" },
                { "name": "server-linux-ubuntu", "browser_download_url": "https://example.com/dl/server-linux-ubuntu?x=1\\u0026y=2" }
            ]
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn each_platform_selects_its_own_asset() {
        let index = sample_index();
        for platform in PlatformKey::ALL {
            let url = index.download_url_for(platform.asset_name()).unwrap();
            assert!(
                url.contains(platform.asset_name()),
                "{} resolved to {}",
                platform,
                url
            );
        }
    }

    #[test]
    fn ampersands_are_unescaped() {
        let index = sample_index();
        assert_eq!(
            index.download_url_for("server-windows.exe").unwrap(),
            "https://example.com/dl/server-windows.exe?a=1&b=2"
        );
        assert_eq!(
            index.download_url_for("server-linux-ubuntu").unwrap(),
            "https://example.com/dl/server-linux-ubuntu?x=1&y=2"
        );
    }

    #[test]
    fn missing_asset_is_resolution_error() {
        let json = r#"{ "assets": [
            { "name": "server-linux-ubuntu.tar.gz", "browser_download_url": "https://example.com/a" },
            { "name": "server-windows.exe", "browser_download_url": "https://example.com/b" }
        ] }"#;
        let index: ReleaseIndex = serde_json::from_str(json).unwrap();
        let err = index
            .download_url_for(PlatformKey::LinuxUbuntu.asset_name())
            .unwrap_err();
        assert_eq!(
            err,
            ResolutionError::AssetNotFound {
                asset: "server-linux-ubuntu".to_string()
            }
        );
    }

    #[test]
    fn slug_parsing() {
        let r = ReleaseResolver::from_slug("Angulorecto/LiveUpdater", None).unwrap();
        assert_eq!(
            r.latest_release_url(),
            "https://api.github.com/repos/Angulorecto/LiveUpdater/releases/latest"
        );
        assert!(ReleaseResolver::from_slug("no-slash", None).is_none());
        assert!(ReleaseResolver::from_slug("/repo", None).is_none());
    }

    #[test]
    fn base_url_override_trims_slash() {
        let r = ReleaseResolver::with_base_url("o", "r", Some("http://127.0.0.1:9876/"));
        assert_eq!(r.latest_release_url(), "http://127.0.0.1:9876/repos/o/r/releases/latest");
    }

    #[tokio::test]
    async fn unreachable_index_is_request_error() {
        // 포트 1은 보통 닫혀 있음
        let r = ReleaseResolver::with_base_url("o", "r", Some("http://127.0.0.1:1"));
        let err = r.resolve(PlatformKey::LinuxUbuntu).await.unwrap_err();
        assert!(matches!(err, ResolutionError::Request { .. }));
    }
}
