//! 모듈 핫 언로드 / 리로드
//!
//! 모든 변경은 `ModuleHost`를 통해서만 이뤄집니다. 언로드는 여섯 단계를
//! 각각 독립적으로 시도하고, 결과를 `UnloadReport`로 모아 돌려줍니다.
//! 한 단계가 실패해도 나머지 단계는 계속 진행합니다.

pub mod command;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::host::manifest;
use crate::host::{HostError, LoaderRelease, ModuleHost, ModuleInfo, ModuleState};

pub use command::{CommandReply, ReloadCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnloadStep {
    Disable,
    CancelTasks,
    UnregisterListeners,
    UnregisterCommands,
    UnregisterModule,
    ReleaseLoader,
}

impl UnloadStep {
    pub const SEQUENCE: [UnloadStep; 6] = [
        UnloadStep::Disable,
        UnloadStep::CancelTasks,
        UnloadStep::UnregisterListeners,
        UnloadStep::UnregisterCommands,
        UnloadStep::UnregisterModule,
        UnloadStep::ReleaseLoader,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            UnloadStep::Disable => "disable",
            UnloadStep::CancelTasks => "cancel tasks",
            UnloadStep::UnregisterListeners => "unregister listeners",
            UnloadStep::UnregisterCommands => "unregister commands",
            UnloadStep::UnregisterModule => "unregister module",
            UnloadStep::ReleaseLoader => "release loader",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: UnloadStep,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnloadReport {
    pub module: String,
    pub steps: Vec<StepOutcome>,
}

impl UnloadReport {
    /// 모든 단계가 성공했는지
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.ok)
    }

    pub fn failed_steps(&self) -> Vec<UnloadStep> {
        self.steps.iter().filter(|s| !s.ok).map(|s| s.step).collect()
    }
}

impl fmt::Display for UnloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_complete() {
            return write!(f, "Unloaded {}", self.module);
        }
        let failed: Vec<String> = self
            .steps
            .iter()
            .filter(|s| !s.ok)
            .map(|s| format!("{} ({})", s.step.label(), s.detail))
            .collect();
        write!(f, "Partially unloaded {}: {}", self.module, failed.join(", "))
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Plugin directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("No module archives in {0}")]
    NoArchives(PathBuf),

    #[error("No archive in the plugin directory declares module '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Host(#[from] HostError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Module not found")]
pub struct ModuleNotFound;

#[derive(Debug, Serialize)]
pub struct ReloadReport {
    pub module: String,
    pub unload: UnloadReport,
    /// 새 인스턴스 또는 로드 실패 사유
    #[serde(serialize_with = "serialize_load_result")]
    pub load: Result<ModuleInfo, LoadError>,
}

fn serialize_load_result<S: serde::Serializer>(
    load: &Result<ModuleInfo, LoadError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(2))?;
    match load {
        Ok(info) => {
            map.serialize_entry("success", &true)?;
            map.serialize_entry("module", info)?;
        }
        Err(e) => {
            map.serialize_entry("success", &false)?;
            map.serialize_entry("error", &e.to_string())?;
        }
    }
    map.end()
}

impl ReloadReport {
    pub fn is_success(&self) -> bool {
        self.load.is_ok()
    }
}

impl fmt::Display for ReloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.load {
            Ok(info) if self.unload.is_complete() => {
                write!(f, "Reloaded {}", info.full_name())
            }
            Ok(info) => write!(f, "Reloaded {} ({})", info.full_name(), self.unload),
            Err(e) => write!(f, "Failed to reload {}: {} ({})", self.module, e, self.unload),
        }
    }
}

/// 모듈 이름 열거 필터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameFilter {
    All,
    Enabled,
    Disabled,
}

pub struct ModuleManager {
    modules_dir: PathBuf,
}

impl ModuleManager {
    pub fn new(modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
        }
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    pub fn enable<H: ModuleHost>(&self, host: &mut H, module: &ModuleInfo) -> Result<(), HostError> {
        host.enable_module(module.id)
    }

    /// Enabled가 아니면 아무것도 하지 않음
    pub fn disable<H: ModuleHost>(&self, host: &mut H, module: &ModuleInfo) -> Result<(), HostError> {
        match host.module_by_id(module.id) {
            Some(current) if current.state == ModuleState::Enabled => host.disable_module(module.id),
            Some(_) => Ok(()),
            None => Err(HostError::ModuleNotFound(module.name.clone())),
        }
    }

    /// 여섯 단계 언로드. 각 단계 실패는 기록만 하고 다음 단계로 넘어감
    pub fn unload<H: ModuleHost>(&self, host: &mut H, module: &ModuleInfo) -> UnloadReport {
        let id = module.id;
        let mut steps = Vec::with_capacity(UnloadStep::SEQUENCE.len());

        for step in UnloadStep::SEQUENCE {
            let result: Result<String, String> = match step {
                UnloadStep::Disable => self
                    .disable(host, module)
                    .map(|_| "disabled".to_string())
                    .map_err(|e| e.to_string()),
                UnloadStep::CancelTasks => host
                    .cancel_tasks(id)
                    .map(|n| format!("{} task(s) canceled", n))
                    .map_err(|e| e.to_string()),
                UnloadStep::UnregisterListeners => host
                    .unregister_listeners(id)
                    .map(|n| format!("{} listener(s) removed", n))
                    .map_err(|e| e.to_string()),
                UnloadStep::UnregisterCommands => {
                    let labels = host.commands_owned_by(id);
                    let failed: Vec<String> = labels
                        .iter()
                        .filter_map(|label| {
                            host.unregister_command(label)
                                .err()
                                .map(|e| format!("{}: {}", label, e))
                        })
                        .collect();
                    if failed.is_empty() {
                        Ok(format!("{} command(s) removed", labels.len()))
                    } else {
                        Err(failed.join("; "))
                    }
                }
                UnloadStep::UnregisterModule => host
                    .unregister_module(id)
                    .map(|_| "removed from module list".to_string())
                    .map_err(|e| e.to_string()),
                UnloadStep::ReleaseLoader => host
                    .release_loader(id)
                    .map(|r| match r {
                        LoaderRelease::Released(dir) => format!("released {}", dir.display()),
                        LoaderRelease::NoContext => "no loader context".to_string(),
                        LoaderRelease::Unsupported => "not supported by host".to_string(),
                    })
                    .map_err(|e| e.to_string()),
            };

            let outcome = match result {
                Ok(detail) => StepOutcome { step, ok: true, detail },
                Err(e) => {
                    tracing::warn!(
                        "Unload of {}: step '{}' failed: {}",
                        module.name,
                        step.label(),
                        e
                    );
                    StepOutcome {
                        step,
                        ok: false,
                        detail: e,
                    }
                }
            };
            steps.push(outcome);
        }

        let report = UnloadReport {
            module: module.name.clone(),
            steps,
        };
        tracing::info!("{}", report);
        report
    }

    /// 플러그인 디렉터리에서 `name`을 선언한 아카이브를 찾아 로드 후 활성화.
    /// 다른 아카이브는 디스크립터만 읽고 로드하지 않습니다.
    pub fn load<H: ModuleHost>(&self, host: &mut H, name: &str) -> Result<ModuleInfo, LoadError> {
        if !self.modules_dir.is_dir() {
            return Err(LoadError::DirectoryNotFound(self.modules_dir.clone()));
        }
        let archives = manifest::list_archives(&self.modules_dir).map_err(HostError::from)?;
        if archives.is_empty() {
            return Err(LoadError::NoArchives(self.modules_dir.clone()));
        }

        for archive in &archives {
            let manifest = match host.inspect_archive(archive) {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!("Skipping {}: {}", archive.display(), e);
                    continue;
                }
            };
            if !manifest.module.name.eq_ignore_ascii_case(name) {
                continue;
            }

            match host.load_module(archive) {
                Ok(info) => {
                    if let Err(e) = host.enable_module(info.id) {
                        // 반쯤 등록된 상태를 남기지 않음
                        let rollback = self.unload(host, &info);
                        if !rollback.is_complete() {
                            tracing::warn!("Rollback of {} incomplete: {}", info.name, rollback);
                        }
                        return Err(LoadError::Host(e));
                    }
                    return host
                        .module_by_id(info.id)
                        .ok_or_else(|| LoadError::Host(HostError::ModuleNotFound(info.name)));
                }
                Err(HostError::AlreadyLoaded(n)) => {
                    return Err(LoadError::Host(HostError::AlreadyLoaded(n)));
                }
                Err(e) => {
                    tracing::warn!("Failed to load {}: {}", archive.display(), e);
                    continue;
                }
            }
        }

        Err(LoadError::NotFound(name.to_string()))
    }

    /// disable → unload → load(name)
    pub fn reload<H: ModuleHost>(
        &self,
        host: &mut H,
        module: Option<&ModuleInfo>,
    ) -> Result<ReloadReport, ModuleNotFound> {
        let module = module.ok_or(ModuleNotFound)?;
        // 최신 상태로 다시 조회 (스냅샷이 오래됐을 수 있음)
        let current = host.module_by_id(module.id).ok_or(ModuleNotFound)?;

        if let Err(e) = self.disable(host, &current) {
            tracing::warn!("Disable before reload of {} failed: {}", current.name, e);
        }
        let unload = self.unload(host, &current);
        let load = self.load(host, &current.name);

        let report = ReloadReport {
            module: current.name.clone(),
            unload,
            load,
        };
        if report.is_success() {
            tracing::info!("{}", report);
        } else {
            tracing::warn!("{}", report);
        }
        Ok(report)
    }

    /// 현재 알려진 모든 모듈을 호스트 열거 순서대로 리로드
    pub fn reload_all<H: ModuleHost>(&self, host: &mut H) -> Vec<ReloadReport> {
        let snapshot = host.modules();
        snapshot
            .iter()
            .filter_map(|m| self.reload(host, Some(m)).ok())
            .collect()
    }

    /// 시작 시 플러그인 디렉터리의 모든 유효한 아카이브를 로드/활성화
    pub fn load_all<H: ModuleHost>(&self, host: &mut H) -> Vec<ModuleInfo> {
        let archives = match manifest::list_archives(&self.modules_dir) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(
                    "Plugin directory {} is not readable: {}",
                    self.modules_dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut loaded = Vec::new();
        for archive in archives {
            let info = match host.load_module(&archive) {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", archive.display(), e);
                    continue;
                }
            };
            if let Err(e) = host.enable_module(info.id) {
                tracing::warn!("Loaded {} but could not enable it: {}", info.name, e);
            }
            if let Some(info) = host.module_by_id(info.id) {
                loaded.push(info);
            }
        }
        tracing::info!("Loaded {} module(s) from {}", loaded.len(), self.modules_dir.display());
        loaded
    }

    /// 모듈 이름 스냅샷 (`full`이면 "이름 v버전")
    pub fn module_names<H: ModuleHost>(&self, host: &H, filter: NameFilter, full: bool) -> Vec<String> {
        host.modules()
            .into_iter()
            .filter(|m| match filter {
                NameFilter::All => true,
                NameFilter::Enabled => m.state == ModuleState::Enabled,
                NameFilter::Disabled => m.state != ModuleState::Enabled,
            })
            .map(|m| if full { m.full_name() } else { m.name })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::manifest::testutil::*;
    use crate::host::registry::EXTRACTED_DIR;
    use crate::host::{ListenerBinding, ModuleId, ModuleManifest, ModuleRegistry};

    fn setup(names: &[&str]) -> (tempfile::TempDir, ModuleManager, ModuleRegistry) {
        let tmp = tempfile::tempdir().unwrap();
        for name in names {
            write_module_archive(
                tmp.path(),
                &format!("{}-1.0.jar", name),
                &simple_descriptor(name, "1.0"),
            );
        }
        let manager = ModuleManager::new(tmp.path());
        let mut host = ModuleRegistry::new(tmp.path());
        manager.load_all(&mut host);
        (tmp, manager, host)
    }

    #[test]
    fn unload_clears_every_structure() {
        let (_tmp, manager, mut host) = setup(&["Foo", "Bar"]);
        let foo = host.module("foo").unwrap();

        let report = manager.unload(&mut host, &foo);
        assert!(report.is_complete(), "{}", report);
        assert_eq!(report.steps.len(), 6);
        assert_eq!(report.to_string(), "Unloaded Foo");

        assert!(host.module("foo").is_none());
        assert!(host.commands_owned_by(foo.id).is_empty());
        assert!(host.listeners_of(foo.id).is_empty());
        assert!(host.tasks_of(foo.id).is_empty());
        // 다른 모듈은 그대로
        let bar = host.module("bar").unwrap();
        assert!(bar.is_enabled());
        assert_eq!(host.commands_owned_by(bar.id), vec!["bar", "bar-alias"]);
    }

    #[test]
    fn names_snapshot_by_state() {
        let (_tmp, manager, mut host) = setup(&["Foo", "Bar"]);
        let bar = host.module("bar").unwrap();
        manager.disable(&mut host, &bar).unwrap();

        assert_eq!(manager.module_names(&host, NameFilter::All, false), vec!["Bar", "Foo"]);
        assert_eq!(manager.module_names(&host, NameFilter::Enabled, true), vec!["Foo v1.0"]);
        assert_eq!(manager.module_names(&host, NameFilter::Disabled, false), vec!["Bar"]);
    }

    #[test]
    fn reload_of_absent_module_is_not_found() {
        let (_tmp, manager, mut host) = setup(&["Foo"]);
        assert_eq!(manager.reload(&mut host, None).unwrap_err(), ModuleNotFound);

        // 이미 언로드된 스냅샷으로 리로드
        let foo = host.module("foo").unwrap();
        manager.unload(&mut host, &foo);
        assert!(manager.reload(&mut host, Some(&foo)).is_err());
    }

    #[test]
    fn load_errors_are_distinct() {
        let tmp = tempfile::tempdir().unwrap();
        let mut host = ModuleRegistry::new(tmp.path());

        let missing = ModuleManager::new(tmp.path().join("nope"));
        assert!(matches!(
            missing.load(&mut host, "Foo"),
            Err(LoadError::DirectoryNotFound(_))
        ));

        let empty = ModuleManager::new(tmp.path());
        assert!(matches!(empty.load(&mut host, "Foo"), Err(LoadError::NoArchives(_))));

        write_module_archive(tmp.path(), "Bar.zip", &simple_descriptor("Bar", "1"));
        assert!(matches!(empty.load(&mut host, "Foo"), Err(LoadError::NotFound(_))));
        assert!(host.modules().is_empty());
    }

    #[test]
    fn load_of_already_loaded_module_fails() {
        let (_tmp, manager, mut host) = setup(&["Foo"]);
        assert!(matches!(
            manager.load(&mut host, "FOO"),
            Err(LoadError::Host(HostError::AlreadyLoaded(_)))
        ));
        assert_eq!(host.modules().len(), 1);
    }

    /// 리스너 제거와 로더 해제가 실패하는 호스트
    struct FlakyHost {
        inner: ModuleRegistry,
        lock_listeners: bool,
        refuse_enable: bool,
    }

    impl FlakyHost {
        fn new(inner: ModuleRegistry) -> Self {
            Self {
                inner,
                lock_listeners: true,
                refuse_enable: false,
            }
        }
    }

    impl ModuleHost for FlakyHost {
        fn modules(&self) -> Vec<ModuleInfo> {
            self.inner.modules()
        }
        fn module(&self, name: &str) -> Option<ModuleInfo> {
            self.inner.module(name)
        }
        fn module_by_id(&self, id: ModuleId) -> Option<ModuleInfo> {
            self.inner.module_by_id(id)
        }
        fn enable_module(&mut self, id: ModuleId) -> Result<(), HostError> {
            if self.refuse_enable {
                return Err(HostError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "module refused to start",
                )));
            }
            self.inner.enable_module(id)
        }
        fn disable_module(&mut self, id: ModuleId) -> Result<(), HostError> {
            self.inner.disable_module(id)
        }
        fn cancel_tasks(&mut self, id: ModuleId) -> Result<usize, HostError> {
            self.inner.cancel_tasks(id)
        }
        fn listeners_of(&self, id: ModuleId) -> Vec<ListenerBinding> {
            self.inner.listeners_of(id)
        }
        fn unregister_listeners(&mut self, id: ModuleId) -> Result<usize, HostError> {
            if !self.lock_listeners {
                return self.inner.unregister_listeners(id);
            }
            Err(HostError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "listener table is locked",
            )))
        }
        fn commands_owned_by(&self, id: ModuleId) -> Vec<String> {
            self.inner.commands_owned_by(id)
        }
        fn unregister_command(&mut self, label: &str) -> Result<(), HostError> {
            self.inner.unregister_command(label)
        }
        fn unregister_module(&mut self, id: ModuleId) -> Result<(), HostError> {
            self.inner.unregister_module(id)
        }
        fn release_loader(&mut self, id: ModuleId) -> Result<LoaderRelease, HostError> {
            if self.lock_listeners {
                return Ok(LoaderRelease::Unsupported);
            }
            self.inner.release_loader(id)
        }
        fn inspect_archive(&self, archive: &Path) -> Result<ModuleManifest, HostError> {
            self.inner.inspect_archive(archive)
        }
        fn load_module(&mut self, archive: &Path) -> Result<ModuleInfo, HostError> {
            self.inner.load_module(archive)
        }
    }

    #[test]
    fn failing_step_does_not_stop_later_steps() {
        let (_tmp, manager, inner) = setup(&["Foo"]);
        let mut host = FlakyHost::new(inner);
        let foo = host.module("foo").unwrap();

        let report = manager.unload(&mut host, &foo);
        assert!(!report.is_complete());
        assert_eq!(report.failed_steps(), vec![UnloadStep::UnregisterListeners]);
        assert!(report.to_string().contains("listener table is locked"));

        // 이후 단계는 실행됨
        assert!(host.module("foo").is_none());
        assert!(host.commands_owned_by(foo.id).is_empty());
        let release = &report.steps[5];
        assert_eq!(release.step, UnloadStep::ReleaseLoader);
        assert_eq!(release.detail, "not supported by host");
    }

    #[test]
    fn failed_enable_rolls_back_load() {
        let (tmp, manager, mut inner) = setup(&["Foo"]);
        let foo = inner.module("foo").unwrap();
        assert!(manager.unload(&mut inner, &foo).is_complete());

        let mut host = FlakyHost::new(inner);
        host.lock_listeners = false;
        host.refuse_enable = true;

        let err = manager.load(&mut host, "Foo").unwrap_err();
        assert!(err.to_string().contains("module refused to start"), "{}", err);
        assert!(host.module("foo").is_none());
        assert!(host.modules().is_empty());
        assert!(!tmp.path().join(EXTRACTED_DIR).join("Foo").exists());

        // 다음 시도는 정상 로드
        host.refuse_enable = false;
        let info = manager.load(&mut host, "Foo").unwrap();
        assert_eq!(info.state, ModuleState::Enabled);
    }
}
