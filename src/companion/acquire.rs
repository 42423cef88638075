//! 컴패니언 획득 전략
//!
//! 두 전략 모두 "실행할 수 있는 프로그램을 준비"한 뒤 `LaunchSpec`을 돌려주고,
//! 실행과 감시는 `CompanionSupervisor`가 공통으로 맡습니다.
//! - `ArtifactDelivery`: GitHub 릴리스에서 플랫폼 바이너리를 받아 실행
//! - `InterpreterDelivery`: 관리 venv를 준비하고 Python 스크립트를 실행

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use liveupdater_updater_lib::{ArtifactStore, DownloadError, PlatformKey, ReleaseResolver};

use super::error::CompanionError;
use crate::config::{DeliveryKind, HostConfig, UpdatePolicy};
use crate::python_env::PythonEnv;
use crate::utils::resolve_under;

/// 실행할 프로그램과 작업 디렉터리
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

pub trait Acquire {
    fn describe(&self) -> &'static str;

    fn acquire(&self) -> impl Future<Output = Result<LaunchSpec, CompanionError>> + Send;
}

// ─── Artifact delivery ───────────────────────────────────────

pub struct ArtifactDelivery {
    resolver: ReleaseResolver,
    store: ArtifactStore,
    platform: PlatformKey,
    bin_dir: PathBuf,
    policy: UpdatePolicy,
    args: Vec<String>,
}

impl ArtifactDelivery {
    pub fn new(
        resolver: ReleaseResolver,
        platform: PlatformKey,
        bin_dir: impl Into<PathBuf>,
        policy: UpdatePolicy,
    ) -> Self {
        Self {
            resolver,
            store: ArtifactStore::new(),
            platform,
            bin_dir: bin_dir.into(),
            policy,
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// `<bin_dir>/<platform-asset-name>`
    pub fn artifact_path(&self) -> PathBuf {
        self.bin_dir.join(self.platform.asset_name())
    }

    async fn fetch(&self, dest: &Path) -> Result<(), CompanionError> {
        let url = self.resolver.resolve(self.platform).await?;
        self.store
            .install(&url, dest, self.platform.needs_exec_bit())
            .await?;
        Ok(())
    }
}

impl Acquire for ArtifactDelivery {
    fn describe(&self) -> &'static str {
        "artifact"
    }

    async fn acquire(&self) -> Result<LaunchSpec, CompanionError> {
        self.store.ensure_directory(&self.bin_dir)?;
        let dest = self.artifact_path();
        let present = self.store.exists(&dest);

        match (self.policy, present) {
            (UpdatePolicy::IfMissing, true) => {
                tracing::info!("Companion binary present: {}", dest.display());
            }
            (UpdatePolicy::Always, true) => {
                // 새 버전을 못 받으면 기존 파일로 계속 진행
                if let Err(e) = self.fetch(&dest).await {
                    tracing::warn!(
                        "Could not refresh companion binary, using existing {}: {}",
                        dest.display(),
                        e
                    );
                }
            }
            (_, false) => {
                tracing::info!(
                    "Companion binary missing, downloading {} for {}",
                    self.platform.asset_name(),
                    self.platform
                );
                self.fetch(&dest).await?;
            }
        }

        // current_dir 변경 후에도 올바른 경로가 되도록 절대 경로 사용
        let program = std::fs::canonicalize(&dest)
            .map_err(|e| DownloadError::from_io(&e, "canonicalize", &dest))?;
        let working_dir = program
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.bin_dir.clone());

        Ok(LaunchSpec {
            program,
            args: self.args.clone(),
            working_dir,
        })
    }
}

// ─── Interpreter delivery ────────────────────────────────────

pub struct InterpreterDelivery {
    python: Arc<PythonEnv>,
    script: PathBuf,
    requirements: Option<PathBuf>,
    packages: Vec<String>,
    args: Vec<String>,
}

impl InterpreterDelivery {
    /// 상대 경로는 데이터 디렉터리 기준으로 해석합니다.
    pub fn new(python: Arc<PythonEnv>, script: &Path, requirements: Option<&Path>) -> Self {
        let script = resolve_under(python.data_dir(), script);
        let requirements = requirements.map(|r| resolve_under(python.data_dir(), r));
        Self {
            python,
            script,
            requirements,
            packages: Vec::new(),
            args: Vec::new(),
        }
    }

    pub fn with_packages(mut self, packages: Vec<String>) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

impl Acquire for InterpreterDelivery {
    fn describe(&self) -> &'static str {
        "interpreter"
    }

    async fn acquire(&self) -> Result<LaunchSpec, CompanionError> {
        let python_exe = self
            .python
            .python_path()
            .await
            .map_err(|e| CompanionError::Install(format!("{:#}", e)))?;

        if let Some(req) = &self.requirements {
            if req.exists() {
                self.python
                    .pip_install_requirements(req)
                    .await
                    .map_err(|e| CompanionError::Install(format!("{:#}", e)))?;
            } else {
                tracing::debug!("No requirements file at {}", req.display());
            }
        }

        self.python
            .pip_install(&self.packages)
            .await
            .map_err(|e| CompanionError::Install(format!("{:#}", e)))?;

        if !self.script.exists() {
            return Err(CompanionError::Launch {
                program: self.script.display().to_string(),
                message: "script not found".to_string(),
            });
        }

        let working_dir = self
            .script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.python.data_dir().to_path_buf());
        let mut args = vec![self.script.display().to_string()];
        args.extend(self.args.iter().cloned());

        Ok(LaunchSpec {
            program: python_exe,
            args,
            working_dir,
        })
    }
}

// ─── Config selection ────────────────────────────────────────

/// 설정으로 고르는 전달 방식
pub enum Delivery {
    Artifact(ArtifactDelivery),
    Interpreter(InterpreterDelivery),
}

impl Delivery {
    pub fn from_config(cfg: &HostConfig, python: Arc<PythonEnv>) -> Result<Self, CompanionError> {
        let companion = &cfg.companion;
        match companion.delivery {
            DeliveryKind::Artifact => {
                let resolver =
                    ReleaseResolver::from_slug(&companion.repo, companion.api_base_url.as_deref())
                        .ok_or_else(|| {
                            CompanionError::Config(format!(
                                "repo must be 'owner/repo', got '{}'",
                                companion.repo
                            ))
                        })?;
                let platform = companion
                    .platform
                    .as_deref()
                    .map(PlatformKey::from_key)
                    .unwrap_or_else(PlatformKey::detect);
                Ok(Delivery::Artifact(
                    ArtifactDelivery::new(resolver, platform, cfg.bin_dir(), companion.update_policy)
                        .with_args(companion.args.clone()),
                ))
            }
            DeliveryKind::Interpreter => Ok(Delivery::Interpreter(
                InterpreterDelivery::new(
                    python,
                    &companion.script,
                    companion.requirements.as_deref(),
                )
                .with_packages(companion.packages.clone())
                .with_args(companion.args.clone()),
            )),
        }
    }

    /// 아티팩트 전달은 호스트 초기화 경로에서 바로 실행
    pub fn runs_inline(&self) -> bool {
        matches!(self, Delivery::Artifact(_))
    }
}

impl Acquire for Delivery {
    fn describe(&self) -> &'static str {
        match self {
            Delivery::Artifact(a) => a.describe(),
            Delivery::Interpreter(i) => i.describe(),
        }
    }

    async fn acquire(&self) -> Result<LaunchSpec, CompanionError> {
        match self {
            Delivery::Artifact(a) => a.acquire().await,
            Delivery::Interpreter(i) => i.acquire().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_path_uses_platform_asset_name() {
        let resolver = ReleaseResolver::new("o", "r");
        let d = ArtifactDelivery::new(resolver, PlatformKey::Windows, "/data/bin", UpdatePolicy::IfMissing);
        assert_eq!(d.artifact_path(), PathBuf::from("/data/bin/server-windows.exe"));
    }

    #[tokio::test]
    async fn present_artifact_is_not_downloaded_again() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("server-linux-ubuntu"), b"existing").unwrap();

        // 닫힌 포트: 네트워크를 타면 실패한다
        let resolver = ReleaseResolver::with_base_url("o", "r", Some("http://127.0.0.1:1"));
        let d = ArtifactDelivery::new(resolver, PlatformKey::LinuxUbuntu, &bin, UpdatePolicy::IfMissing);
        let spec = d.acquire().await.unwrap();

        assert!(spec.program.ends_with("server-linux-ubuntu"));
        assert!(spec.program.is_absolute());
        assert_eq!(spec.working_dir, std::fs::canonicalize(&bin).unwrap());
        assert_eq!(std::fs::read(bin.join("server-linux-ubuntu")).unwrap(), b"existing");
    }

    #[tokio::test]
    async fn always_policy_falls_back_to_existing_binary() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("server-macos"), b"old").unwrap();

        let resolver = ReleaseResolver::with_base_url("o", "r", Some("http://127.0.0.1:1"));
        let d = ArtifactDelivery::new(resolver, PlatformKey::MacOs, &bin, UpdatePolicy::Always);
        assert!(d.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn missing_artifact_with_unreachable_index_is_resolution_error() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = ReleaseResolver::with_base_url("o", "r", Some("http://127.0.0.1:1"));
        let d = ArtifactDelivery::new(
            resolver,
            PlatformKey::LinuxUbuntu,
            tmp.path().join("bin"),
            UpdatePolicy::IfMissing,
        );
        assert!(matches!(d.acquire().await, Err(CompanionError::Resolution(_))));
        // 디렉터리는 만들어진다
        assert!(tmp.path().join("bin").is_dir());
    }

    #[test]
    fn interpreter_paths_resolve_against_data_dir() {
        let python = Arc::new(PythonEnv::new("/data/lu"));
        let d = InterpreterDelivery::new(python, Path::new("server.py"), Some(Path::new("/abs/req.txt")));
        assert_eq!(d.script, PathBuf::from("/data/lu/server.py"));
        assert_eq!(d.requirements, Some(PathBuf::from("/abs/req.txt")));
    }

    #[test]
    fn config_selects_strategy() {
        let mut cfg = HostConfig::default();
        let python = Arc::new(PythonEnv::new(&cfg.data_dir));
        let d = Delivery::from_config(&cfg, python.clone()).unwrap();
        assert!(d.runs_inline());
        assert_eq!(d.describe(), "artifact");

        cfg.companion.delivery = DeliveryKind::Interpreter;
        let d = Delivery::from_config(&cfg, python.clone()).unwrap();
        assert!(!d.runs_inline());

        cfg.companion.delivery = DeliveryKind::Artifact;
        cfg.companion.repo = "not-a-slug".into();
        assert!(matches!(
            Delivery::from_config(&cfg, python),
            Err(CompanionError::Config(_))
        ));
    }
}
