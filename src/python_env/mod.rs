//! 인터프리터 전달 경로용 관리 Python 환경
//!
//! 컴패니언을 바이너리 대신 스크립트로 실행할 때, 그리고 모듈 엔트리 스크립트를
//! 실행할 때 같은 venv를 사용합니다. 부트스트랩은 프로세스당 한 번만 수행됩니다.
//!
//! ```text
//! <data_dir>/
//!   python-standalone/python/   포터블 인터프리터 (필요할 때만 다운로드)
//!   python-env/                 관리 venv
//! ```
//!
//! 기반 인터프리터 탐색 순서: 포터블 설치본 → 시스템 Python ≥ 3.10 → 포터블 다운로드.
//! 설치 단계(venv 생성, pip, tar)가 0이 아닌 코드로 끝나면 에러입니다.

use anyhow::{bail, Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::OnceCell;

use liveupdater_updater_lib::ArtifactStore;

use crate::utils::hide_console_window;

/// 다운로드 URL 오버라이드 (미러 등)
pub const PYTHON_URL_ENV: &str = "LIVEUPDATER_PYTHON_URL";

const MIN_VERSION: (u32, u32) = (3, 10);
const SYSTEM_CANDIDATES: [&str; 3] = ["python3", "python", "py"];

/// python-build-standalone `install_only_stripped` 빌드
struct PortableRelease {
    version: &'static str,
    tag: &'static str,
}

const PORTABLE: PortableRelease = PortableRelease {
    version: "3.12.8",
    tag: "20250106",
};

impl PortableRelease {
    fn target_triple() -> Option<&'static str> {
        match (std::env::consts::OS, std::env::consts::ARCH) {
            ("windows", "x86_64") => Some("x86_64-pc-windows-msvc"),
            ("linux", "x86_64") => Some("x86_64-unknown-linux-gnu"),
            ("linux", "aarch64") => Some("aarch64-unknown-linux-gnu"),
            ("macos", "x86_64") => Some("x86_64-apple-darwin"),
            ("macos", "aarch64") => Some("aarch64-apple-darwin"),
            _ => None,
        }
    }

    fn download_url(&self) -> Result<String> {
        if let Ok(url) = std::env::var(PYTHON_URL_ENV) {
            return Ok(url);
        }
        let Some(triple) = Self::target_triple() else {
            bail!(
                "No portable Python build for {}/{}; install Python {}.{}+ manually",
                std::env::consts::OS,
                std::env::consts::ARCH,
                MIN_VERSION.0,
                MIN_VERSION.1
            );
        };
        Ok(format!(
            "https://github.com/indygreg/python-build-standalone/releases/download/{tag}/cpython-{ver}+{tag}-{triple}-install_only_stripped.tar.gz",
            tag = self.tag,
            ver = self.version,
            triple = triple,
        ))
    }
}

/// 데이터 디렉터리 아래 경로 계산
#[derive(Debug, Clone)]
struct Layout {
    data_dir: PathBuf,
}

impl Layout {
    fn venv_dir(&self) -> PathBuf {
        self.data_dir.join("python-env")
    }

    fn portable_dir(&self) -> PathBuf {
        self.data_dir.join("python-standalone")
    }

    fn venv_python(&self) -> PathBuf {
        let venv = self.venv_dir();
        if cfg!(windows) {
            venv.join("Scripts").join("python.exe")
        } else {
            venv.join("bin").join("python")
        }
    }

    fn portable_python(&self) -> PathBuf {
        let base = self.portable_dir().join("python");
        if cfg!(windows) {
            base.join("python.exe")
        } else {
            base.join("bin").join("python3")
        }
    }
}

pub struct PythonEnv {
    layout: Layout,
    venv_python: OnceCell<PathBuf>,
}

impl PythonEnv {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            layout: Layout {
                data_dir: data_dir.into(),
            },
            venv_python: OnceCell::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.layout.data_dir
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.layout.venv_dir()
    }

    /// venv 인터프리터 경로. 첫 호출에서 부트스트랩
    pub async fn python_path(&self) -> Result<PathBuf> {
        self.venv_python
            .get_or_try_init(|| self.ensure_venv())
            .await
            .cloned()
    }

    pub async fn ensure_venv(&self) -> Result<PathBuf> {
        let python = self.layout.venv_python();
        if responds(&python).await {
            tracing::debug!("Using existing venv {}", python.display());
            return Ok(python);
        }

        let venv_dir = self.layout.venv_dir();
        if venv_dir.exists() {
            tracing::warn!("venv at {} is broken, recreating", venv_dir.display());
            std::fs::remove_dir_all(&venv_dir)
                .with_context(|| format!("Failed to remove {}", venv_dir.display()))?;
        }
        std::fs::create_dir_all(self.data_dir())
            .with_context(|| format!("Failed to create {}", self.data_dir().display()))?;

        let base = self.base_interpreter().await?;
        tracing::info!("Creating venv {} with {}", venv_dir.display(), base.display());
        run_step("create venv", &base, [OsStr::new("-m"), OsStr::new("venv"), venv_dir.as_os_str()]).await?;

        // pip 업그레이드 실패는 무시
        if let Err(e) = pip(&python, &["install", "--upgrade", "--quiet", "pip"]).await {
            tracing::debug!("pip self-upgrade skipped: {:#}", e);
        }

        if !responds(&python).await {
            bail!("venv interpreter {} does not run", python.display());
        }
        tracing::info!("Python venv ready: {}", python.display());
        Ok(python)
    }

    pub async fn pip_install(&self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let python = self.python_path().await?;
        tracing::info!("Installing packages: {}", packages.join(" "));
        let mut args = vec!["install", "--upgrade"];
        args.extend(packages.iter().map(String::as_str));
        pip(&python, &args).await
    }

    pub async fn pip_install_requirements(&self, requirements: &Path) -> Result<()> {
        let python = self.python_path().await?;
        tracing::info!("Installing requirements from {}", requirements.display());
        let req = requirements.to_string_lossy();
        pip(&python, &["install", "-r", &req]).await
    }

    /// 진단용 요약
    pub async fn status(&self) -> serde_json::Value {
        let python = self.layout.venv_python();
        serde_json::json!({
            "available": responds(&python).await,
            "venv_dir": self.layout.venv_dir(),
            "venv_python": python,
            "portable_installed": self.layout.portable_python().exists(),
            "portable_version": PORTABLE.version,
            "portable_url": PORTABLE.download_url().ok(),
        })
    }

    /// 포터블 → 시스템 → 다운로드
    async fn base_interpreter(&self) -> Result<PathBuf> {
        let portable = self.layout.portable_python();
        if responds(&portable).await {
            return Ok(portable);
        }
        if let Ok(system) = detect_system_python().await {
            return Ok(PathBuf::from(system));
        }
        tracing::info!("No usable Python found, fetching portable {}", PORTABLE.version);
        self.install_portable().await
    }

    async fn install_portable(&self) -> Result<PathBuf> {
        let url = PORTABLE.download_url()?;
        let portable_dir = self.layout.portable_dir();
        let archive = self.data_dir().join("python-standalone.tar.gz");

        if portable_dir.exists() {
            std::fs::remove_dir_all(&portable_dir)
                .with_context(|| format!("Failed to clear {}", portable_dir.display()))?;
        }
        std::fs::create_dir_all(&portable_dir)?;

        ArtifactStore::new()
            .download(&url, &archive)
            .await
            .with_context(|| format!("Portable Python download from {} failed", url))?;

        let extracted = run_step(
            "extract python",
            Path::new("tar"),
            [OsStr::new("-xzf"), archive.as_os_str(), OsStr::new("-C"), portable_dir.as_os_str()],
        )
        .await;
        let _ = std::fs::remove_file(&archive);
        extracted?;

        let python = self.layout.portable_python();
        let store = ArtifactStore::new();
        if let Err(e) = store.mark_executable(&python) {
            tracing::warn!("Could not mark {} executable: {}", python.display(), e);
        }
        if !responds(&python).await {
            bail!("Portable Python at {} does not run", python.display());
        }
        tracing::info!("Portable Python installed: {}", python.display());
        Ok(python)
    }
}

/// PATH에서 Python ≥ 3.10 탐색
pub async fn detect_system_python() -> Result<String> {
    for candidate in SYSTEM_CANDIDATES {
        let mut cmd = Command::new(candidate);
        cmd.arg("--version");
        hide_console_window(&mut cmd);

        let Ok(output) = cmd.output().await else {
            continue;
        };
        if !output.status.success() {
            continue;
        }
        // 오래된 버전은 stderr에 출력
        let text = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        match parse_python_version(&text) {
            Some(v) if v >= MIN_VERSION => {
                tracing::info!("Using system {} ({})", candidate, text.trim());
                return Ok(candidate.to_string());
            }
            Some((major, minor)) => {
                tracing::debug!("{} is {}.{}, too old", candidate, major, minor);
            }
            None => {}
        }
    }
    bail!("No system Python >= {}.{} on PATH", MIN_VERSION.0, MIN_VERSION.1)
}

/// 0이 아닌 종료 코드를 에러로 바꿔 주는 설치 단계 실행
async fn run_step<I, S>(step: &str, program: &Path, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    hide_console_window(&mut cmd);

    let output = cmd
        .output()
        .await
        .with_context(|| format!("{}: could not run {}", step, program.display()))?;
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            step,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

async fn pip(python: &Path, args: &[&str]) -> Result<()> {
    let mut full = vec!["-m", "pip"];
    full.extend_from_slice(args);
    run_step("pip", python, full).await
}

async fn responds(python: &Path) -> bool {
    if !python.exists() {
        return false;
    }
    let mut cmd = Command::new(python);
    cmd.args(["-c", "import sys"]);
    hide_console_window(&mut cmd);
    matches!(cmd.output().await, Ok(o) if o.status.success())
}

/// "Python 3.12.8" → (3, 12)
fn parse_python_version(s: &str) -> Option<(u32, u32)> {
    let s = s.trim();
    let version = s
        .strip_prefix("Python ")
        .or_else(|| s.strip_prefix("python "))
        .unwrap_or(s);
    let mut parts = version.split('.');
    let major = parts.next()?.trim().parse().ok()?;
    let minor = parts.next()?.trim().parse().ok()?;
    Some((major, minor))
}
