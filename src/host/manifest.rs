//! module.toml 디스크립터 + 모듈 아카이브(.zip / .jar) 읽기

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use super::error::HostError;

/// 모듈 아카이브로 인식하는 확장자
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "jar"];

/// 아카이브 안의 디스크립터 파일명
pub const DESCRIPTOR_NAME: &str = "module.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub module: ModuleSection,
    #[serde(default)]
    pub commands: Vec<CommandDecl>,
    #[serde(default)]
    pub listeners: Vec<ListenerDecl>,
    #[serde(default)]
    pub tasks: Vec<TaskDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSection {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    /// 엔트리 스크립트 (없으면 선언형 모듈)
    pub entry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDecl {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerDecl {
    pub event: String,
    pub function: Option<String>,
}

impl ListenerDecl {
    /// 호출할 함수명 (기본: `on_<event>`)
    pub fn function_name(&self) -> String {
        self.function
            .clone()
            .unwrap_or_else(|| format!("on_{}", self.event))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDecl {
    pub name: String,
    pub interval_secs: u64,
    pub delay_secs: Option<u64>,
    pub function: Option<String>,
}

impl TaskDecl {
    pub fn function_name(&self) -> String {
        self.function.clone().unwrap_or_else(|| self.name.clone())
    }
}

impl ModuleManifest {
    pub fn parse(content: &str) -> Result<Self, String> {
        let manifest: ModuleManifest = toml::from_str(content).map_err(|e| e.to_string())?;
        let name = &manifest.module.name;
        if name.trim().is_empty() {
            return Err("Missing module name".to_string());
        }
        if !is_plain_name(name) {
            return Err(format!("Module name '{}' must be a plain file name", name));
        }
        Ok(manifest)
    }
}

/// 로딩 컨텍스트 디렉터리 이름으로 쓸 수 있는지: 구분자, `..`, 선행 `.` 불가
pub fn is_plain_name(name: &str) -> bool {
    !name.starts_with('.')
        && name.trim() == name
        && !name.contains(['/', '\\', ':', '\0'])
        && matches!(
            Path::new(name).components().collect::<Vec<_>>().as_slice(),
            [std::path::Component::Normal(_)]
        )
}

pub fn is_module_archive(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| ARCHIVE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
}

/// 디렉터리의 모듈 아카이브 목록 (파일명 순)
pub fn list_archives(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut archives: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_module_archive(p))
        .collect();
    archives.sort();
    Ok(archives)
}

/// 아카이브에서 디스크립터만 읽습니다. 압축 해제는 하지 않습니다.
pub fn read_manifest(archive_path: &Path) -> Result<ModuleManifest, HostError> {
    let invalid = |reason: String| HostError::InvalidArchive {
        path: archive_path.display().to_string(),
        reason,
    };

    let file = fs::File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| invalid(e.to_string()))?;

    // 아카이브 루트의 디스크립터만 인정
    let mut content = String::new();
    match archive.by_name(DESCRIPTOR_NAME) {
        Ok(mut entry) => {
            entry
                .read_to_string(&mut content)
                .map_err(|e| invalid(e.to_string()))?;
        }
        Err(zip::result::ZipError::FileNotFound) => {}
        Err(e) => return Err(invalid(e.to_string())),
    }

    if content.is_empty() {
        return Err(invalid(format!("No {} found in archive", DESCRIPTOR_NAME)));
    }

    ModuleManifest::parse(&content).map_err(invalid)
}

/// 아카이브를 `dest`에 풀어 놓습니다. 기존 내용은 지웁니다.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<(), HostError> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    let file = fs::File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| HostError::InvalidArchive {
        path: archive_path.display().to_string(),
        reason: e.to_string(),
    })?;
    archive.extract(dest).map_err(|e| HostError::InvalidArchive {
        path: archive_path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}
