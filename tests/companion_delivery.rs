//! ═══════════════════════════════════════════════════════════════════
//! 컴패니언 전달 통합 테스트
//! ═══════════════════════════════════════════════════════════════════
//!
//! 로컬 axum 서버로 릴리스 인덱스와 에셋을 흉내 냅니다:
//!
//! 1. **Release Resolver**: 플랫폼 에셋 URL 결정, 누락 에셋/오류 상태
//! 2. **Artifact Store**: 다운로드, 실행 권한
//! 3. **ArtifactDelivery + CompanionSupervisor**: 받은 바이너리를 실행하고 출력 중계

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use serde_json::json;

use liveupdater_core::companion::{ArtifactDelivery, CompanionError, CompanionSupervisor};
use liveupdater_core::config::UpdatePolicy;
use liveupdater_updater_lib::{ArtifactStore, PlatformKey, ReleaseResolver, ResolutionError};

/// `/repos/:owner/:repo/releases/latest` 와 `/download/:filename` 을 제공하는 mock 서버
async fn start_mock_release_server(assets: HashMap<String, Vec<u8>>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // 실제 GitHub 응답처럼 escape된 '&'를 섞어 둠
    let release_assets: Vec<serde_json::Value> = assets
        .iter()
        .map(|(name, data)| {
            json!({
                "name": name,
                "size": data.len(),
                "browser_download_url": format!("http://{}/download/{}?token=a&amp;v=1", addr, name),
            })
        })
        .collect();
    let release = Arc::new(
        json!({
            "tag_name": "v1.4.0",
            "name": "v1.4.0",
            "assets": release_assets,
        })
        .to_string(),
    );
    let assets = Arc::new(assets);

    let app = Router::new()
        .route(
            "/repos/:owner/:repo/releases/latest",
            get({
                let release = release.clone();
                move |Path((owner, _repo)): Path<(String, String)>| {
                    let release = release.clone();
                    async move {
                        if owner == "missing" {
                            return (StatusCode::NOT_FOUND, "Not Found".to_string());
                        }
                        (StatusCode::OK, release.as_str().to_string())
                    }
                }
            }),
        )
        .route(
            "/download/:filename",
            get({
                let assets = assets.clone();
                move |Path(filename): Path<String>| {
                    let assets = assets.clone();
                    async move {
                        match assets.get(&filename) {
                            Some(data) => (StatusCode::OK, data.clone()),
                            None => (StatusCode::NOT_FOUND, b"Not Found".to_vec()),
                        }
                    }
                }
            }),
        );

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn base_url(addr: SocketAddr) -> String {
    format!("http://{}", addr)
}

#[tokio::test]
async fn resolver_picks_exact_platform_asset() {
    let mut assets = HashMap::new();
    assets.insert("server-windows.exe".to_string(), b"MZ".to_vec());
    assets.insert("server-linux-ubuntu".to_string(), b"ELF".to_vec());
    assets.insert("server-linux-ubuntu.sha256".to_string(), b"abc".to_vec());
    let addr = start_mock_release_server(assets).await;

    let resolver = ReleaseResolver::with_base_url("Angulorecto", "LiveUpdater", Some(&base_url(addr)));
    let url = resolver.resolve(PlatformKey::LinuxUbuntu).await.unwrap();
    assert_eq!(
        url,
        format!("http://{}/download/server-linux-ubuntu?token=a&v=1", addr)
    );

    // macOS 에셋은 없음
    let err = resolver.resolve(PlatformKey::MacOs).await.unwrap_err();
    assert!(matches!(err, ResolutionError::AssetNotFound { .. }));
}

#[tokio::test]
async fn resolver_reports_non_success_status() {
    let addr = start_mock_release_server(HashMap::new()).await;
    let resolver = ReleaseResolver::with_base_url("missing", "repo", Some(&base_url(addr)));
    let err = resolver.resolve(PlatformKey::Windows).await.unwrap_err();
    assert!(matches!(err, ResolutionError::Status { status: 404, .. }));
}

#[tokio::test]
async fn store_downloads_and_replaces_file() {
    let mut assets = HashMap::new();
    assets.insert("server-macos".to_string(), vec![7u8; 64 * 1024]);
    let addr = start_mock_release_server(assets).await;

    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("bin").join("server-macos");
    let store = ArtifactStore::new();
    store.ensure_directory(dest.parent().unwrap()).unwrap();
    std::fs::write(&dest, b"old build").unwrap();

    let written = store
        .install(&format!("http://{}/download/server-macos", addr), &dest, true)
        .await
        .unwrap();
    assert_eq!(written, 64 * 1024);
    assert_eq!(std::fs::read(&dest).unwrap().len(), 64 * 1024);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    // 실패한 다운로드는 기존 파일을 건드리지 않음
    let err = store
        .download(&format!("http://{}/download/nope", addr), &dest)
        .await;
    assert!(err.is_err());
    assert_eq!(std::fs::read(&dest).unwrap().len(), 64 * 1024);
    let leftovers = std::fs::read_dir(dest.parent().unwrap()).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[tokio::test]
async fn missing_asset_fails_startup_without_panicking() {
    let addr = start_mock_release_server(HashMap::new()).await;
    let tmp = tempfile::tempdir().unwrap();

    let resolver = ReleaseResolver::with_base_url("o", "r", Some(&base_url(addr)));
    let delivery = ArtifactDelivery::new(
        resolver,
        PlatformKey::LinuxUbuntu,
        tmp.path().join("bin"),
        UpdatePolicy::IfMissing,
    );

    let supervisor = CompanionSupervisor::default();
    let err = supervisor.start(&delivery).await.unwrap_err();
    assert!(matches!(err, CompanionError::Resolution(_)));

    assert!(!supervisor.start_or_log(&delivery).await);
    let status = supervisor.status().await;
    assert!(!status.running);
    assert!(status.last_error.is_some());
    assert!(!tmp.path().join("bin").join("server-linux-ubuntu").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn downloaded_companion_runs_and_output_is_relayed() {
    let script = b"#!/bin/sh\necho companion-ready\necho \"args: $*\"\necho oops 1>&2\n".to_vec();
    let mut assets = HashMap::new();
    assets.insert("server-linux-ubuntu".to_string(), script);
    let addr = start_mock_release_server(assets).await;

    let tmp = tempfile::tempdir().unwrap();
    let bin = tmp.path().join("bin");
    let resolver = ReleaseResolver::with_base_url("o", "r", Some(&base_url(addr)));
    let delivery = ArtifactDelivery::new(resolver, PlatformKey::LinuxUbuntu, &bin, UpdatePolicy::IfMissing)
        .with_args(vec!["--port".into(), "9000".into()]);

    let supervisor = CompanionSupervisor::default();
    let process = supervisor.start(&delivery).await.unwrap();
    assert!(process.pid.is_some());

    process.wait_for_exit().await;
    process.wait_drained().await;

    let lines: Vec<String> = supervisor
        .console_since(0)
        .await
        .into_iter()
        .map(|l| l.content)
        .collect();
    assert!(lines.contains(&"companion-ready".to_string()));
    assert!(lines.contains(&"args: --port 9000".to_string()));
    assert!(lines.contains(&"oops".to_string()));

    let status = supervisor.status().await;
    assert!(!status.running);
    assert_eq!(status.delivery.as_deref(), Some("artifact"));
    assert!(bin.join("server-linux-ubuntu").is_file());
}
