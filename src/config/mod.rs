use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/liveupdater.toml";
pub const CONFIG_PATH_ENV: &str = "LIVEUPDATER_CONFIG";
pub const MODULES_PATH_ENV: &str = "LIVEUPDATER_MODULES_PATH";
pub const DATA_DIR_ENV: &str = "LIVEUPDATER_DATA_DIR";

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HostConfig {
    /// 플러그인 데이터 디렉터리 (`bin/`, `python-env/` 등)
    pub data_dir: PathBuf,
    /// load가 스캔하는 플러그인 디렉터리
    pub modules_dir: PathBuf,
    /// None이면 HTTP API 비활성화
    pub ipc_listen: Option<String>,
    pub tick_interval_ms: u64,
    pub log_buffer_size: usize,
    pub companion: CompanionConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/LiveUpdater"),
            modules_dir: PathBuf::from("./plugins"),
            ipc_listen: Some("127.0.0.1:57480".to_string()),
            tick_interval_ms: 1000,
            log_buffer_size: 10_000,
            companion: CompanionConfig::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    Artifact,
    Interpreter,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// 아티팩트가 없을 때만 다운로드
    IfMissing,
    /// 시작할 때마다 다시 받아 교체
    Always,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CompanionConfig {
    pub enabled: bool,
    pub delivery: DeliveryKind,
    /// `owner/repo`
    pub repo: String,
    pub api_base_url: Option<String>,
    pub update_policy: UpdatePolicy,
    /// OS 감지 대신 사용할 플랫폼 키
    pub platform: Option<String>,
    pub args: Vec<String>,
    /// 인터프리터 전달 전용
    pub script: PathBuf,
    pub requirements: Option<PathBuf>,
    pub packages: Vec<String>,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delivery: DeliveryKind::Artifact,
            repo: "Angulorecto/LiveUpdater".to_string(),
            api_base_url: None,
            update_policy: UpdatePolicy::IfMissing,
            platform: None,
            args: Vec::new(),
            script: PathBuf::from("server.py"),
            requirements: Some(PathBuf::from("requirements.txt")),
            packages: Vec::new(),
        }
    }
}

impl HostConfig {
    /// `LIVEUPDATER_CONFIG` 또는 기본 경로에서 로드 + 환경변수 오버라이드
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut cfg = Self::load_from(&path)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// 파일이 없으면 기본값, 파싱 실패 시 경고 후 기본값
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(anyhow::anyhow!("Failed to read {}: {}", path.display(), e)),
        };
        match toml::from_str::<Self>(&s) {
            Ok(cfg) => Ok(cfg),
            Err(e) => {
                tracing::warn!("Invalid config {}: {}, using defaults", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var(MODULES_PATH_ENV) {
            self.modules_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            self.data_dir = PathBuf::from(dir);
        }
    }

    /// 아티팩트가 저장되는 `<data_dir>/bin`
    pub fn bin_dir(&self) -> PathBuf {
        self.data_dir.join("bin")
    }
}
