use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::error::HostError;
use super::manifest::{self, ModuleManifest};
use super::scheduler::{TaskId, TaskScheduler, TaskSummary};
use super::state_machine::{ModuleState, StateMachine};
use super::{Invocation, ListenerBinding, LoaderRelease, ModuleHost, ModuleId, ModuleInfo};

/// 압축 해제 디렉터리 (modules_dir 기준)
pub const EXTRACTED_DIR: &str = ".extracted";

struct RegisteredModule {
    id: ModuleId,
    manifest: ModuleManifest,
    archive: PathBuf,
    state: StateMachine,
}

impl RegisteredModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: self.id,
            name: self.manifest.module.name.clone(),
            version: self.manifest.module.version.clone(),
            description: self.manifest.module.description.clone(),
            state: self.state.state,
            archive: self.archive.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandEntry {
    pub owner: ModuleId,
    pub module: String,
    /// 디스크립터에 선언된 명령 이름 (별칭이어도 원래 이름)
    pub command: String,
}

/// 명령 라우팅 결과
#[derive(Debug, Clone)]
pub enum CommandDispatch {
    Unknown,
    /// 소유 모듈이 비활성 상태
    Inactive { module: String },
    Invoke(Invocation),
}

/// 인프로세스 호스트: 다섯 가지 레지스트리 + 로딩 컨텍스트
pub struct ModuleRegistry {
    modules_dir: PathBuf,
    modules: Vec<RegisteredModule>,
    /// 소문자 이름 → ID
    names: HashMap<String, ModuleId>,
    listeners: HashMap<ModuleId, Vec<ListenerBinding>>,
    /// 소문자 라벨 → 소유 모듈
    commands: BTreeMap<String, CommandEntry>,
    scheduler: TaskScheduler,
    /// 모듈별 압축 해제 디렉터리
    loaders: HashMap<ModuleId, PathBuf>,
}

impl ModuleRegistry {
    pub fn new(modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
            modules: Vec::new(),
            names: HashMap::new(),
            listeners: HashMap::new(),
            commands: BTreeMap::new(),
            scheduler: TaskScheduler::new(),
            loaders: HashMap::new(),
        }
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// `.extracted/<name>` 경로. 이름이 한 단계 하위 디렉터리가 아니면 `None`
    fn loader_dir(&self, name: &str) -> Option<PathBuf> {
        if !manifest::is_plain_name(name) {
            return None;
        }
        let dir = self.modules_dir.join(EXTRACTED_DIR).join(name);
        self.owns_loader_dir(&dir).then_some(dir)
    }

    fn owns_loader_dir(&self, dir: &Path) -> bool {
        let root = self.modules_dir.join(EXTRACTED_DIR);
        dir.starts_with(&root) && dir.parent() == Some(root.as_path())
    }

    fn find(&self, id: ModuleId) -> Option<&RegisteredModule> {
        self.modules.iter().find(|m| m.id == id)
    }

    fn find_mut(&mut self, id: ModuleId) -> Result<&mut RegisteredModule, HostError> {
        self.modules
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| HostError::ModuleNotFound(id.to_string()))
    }

    fn is_enabled(&self, id: ModuleId) -> bool {
        self.find(id)
            .map(|m| m.state.state == ModuleState::Enabled)
            .unwrap_or(false)
    }

    fn entry_path(&self, id: ModuleId) -> Option<PathBuf> {
        let module = self.find(id)?;
        let entry = module.manifest.module.entry.as_ref()?;
        let dir = self.loaders.get(&id)?;
        Some(dir.join(entry))
    }

    fn invocation(&self, id: ModuleId, function: &str, payload: serde_json::Value) -> Option<Invocation> {
        let module = self.find(id)?;
        Some(Invocation {
            module: module.manifest.module.name.clone(),
            entry: self.entry_path(id),
            function: function.to_string(),
            payload,
        })
    }

    /// 디스크립터에 선언된 명령/리스너/태스크 등록. 이미 있는 항목은 건너뜀
    fn register_declared(&mut self, id: ModuleId) {
        let Some(module) = self.find(id) else {
            return;
        };
        let manifest = module.manifest.clone();
        let module_name = manifest.module.name.clone();

        for decl in &manifest.commands {
            let labels = std::iter::once(&decl.name).chain(decl.aliases.iter());
            for label in labels {
                let label = label.to_lowercase();
                let label = match self.commands.get(&label) {
                    Some(existing) if existing.owner == id => continue,
                    Some(existing) => {
                        let prefixed = format!("{}:{}", module_name.to_lowercase(), label);
                        tracing::warn!(
                            "Command '{}' is already owned by '{}', registering '{}' instead",
                            label,
                            existing.module,
                            prefixed
                        );
                        if self.commands.get(&prefixed).map(|e| e.owner) == Some(id) {
                            continue;
                        }
                        prefixed
                    }
                    None => label,
                };
                self.commands.insert(
                    label,
                    CommandEntry {
                        owner: id,
                        module: module_name.clone(),
                        command: decl.name.clone(),
                    },
                );
            }
        }

        let bindings = self.listeners.entry(id).or_default();
        for decl in &manifest.listeners {
            let binding = ListenerBinding {
                event: decl.event.to_lowercase(),
                function: decl.function_name(),
            };
            if !bindings.contains(&binding) {
                bindings.push(binding);
            }
        }
        if bindings.is_empty() {
            self.listeners.remove(&id);
        }

        for decl in &manifest.tasks {
            if self.scheduler.has_task(id, &decl.name) {
                continue;
            }
            let interval = Duration::from_secs(decl.interval_secs);
            let delay = decl.delay_secs.map(Duration::from_secs).unwrap_or(interval);
            let repeat = if decl.interval_secs > 0 { Some(interval) } else { None };
            self.scheduler
                .schedule(id, &decl.name, &decl.function_name(), delay, repeat);
        }
    }

    /// 모듈 코드에서 직접 예약하는 태스크 (디스크립터 밖)
    pub fn schedule_task(
        &mut self,
        id: ModuleId,
        name: &str,
        function: &str,
        delay: Duration,
        interval: Option<Duration>,
    ) -> Result<TaskId, HostError> {
        if self.find(id).is_none() {
            return Err(HostError::ModuleNotFound(id.to_string()));
        }
        Ok(self.scheduler.schedule(id, name, function, delay, interval))
    }

    pub fn tasks_of(&self, id: ModuleId) -> Vec<TaskSummary> {
        self.scheduler
            .owned_by(id)
            .into_iter()
            .map(TaskSummary::from)
            .collect()
    }

    /// 라벨 → 소유 모듈 이름 (정렬됨)
    pub fn command_labels(&self) -> Vec<(String, String)> {
        self.commands
            .iter()
            .map(|(label, entry)| (label.clone(), entry.module.clone()))
            .collect()
    }

    pub fn dispatch_command(&self, label: &str, args: &[String]) -> CommandDispatch {
        let Some(entry) = self.commands.get(&label.to_lowercase()) else {
            return CommandDispatch::Unknown;
        };
        if !self.is_enabled(entry.owner) {
            return CommandDispatch::Inactive {
                module: entry.module.clone(),
            };
        }
        let payload = serde_json::json!({
            "command": entry.command,
            "label": label,
            "args": args,
        });
        match self.invocation(entry.owner, &format!("cmd_{}", entry.command), payload) {
            Some(inv) => CommandDispatch::Invoke(inv),
            None => CommandDispatch::Unknown,
        }
    }

    /// 활성 모듈의 리스너 중 이벤트에 바인딩된 것들
    pub fn fire_event(&self, event: &str, payload: serde_json::Value) -> Vec<Invocation> {
        let event = event.to_lowercase();
        let mut out = Vec::new();
        // 호스트 열거 순서를 따름
        for module in &self.modules {
            if module.state.state != ModuleState::Enabled {
                continue;
            }
            let Some(bindings) = self.listeners.get(&module.id) else {
                continue;
            };
            for binding in bindings.iter().filter(|b| b.event == event) {
                let payload = serde_json::json!({ "event": event, "data": payload });
                if let Some(inv) = self.invocation(module.id, &binding.function, payload) {
                    out.push(inv);
                }
            }
        }
        out
    }

    /// 기한이 된 태스크를 호출 요청으로 변환
    pub fn tick(&mut self, now: Instant) -> Vec<Invocation> {
        let enabled: Vec<ModuleId> = self
            .modules
            .iter()
            .filter(|m| m.state.state == ModuleState::Enabled)
            .map(|m| m.id)
            .collect();
        let due = self.scheduler.poll_due(now, |owner| enabled.contains(&owner));
        due.into_iter()
            .filter_map(|task| {
                let payload = serde_json::json!({ "task": task.name, "task_id": task.id });
                self.invocation(task.owner, &task.function, payload)
            })
            .collect()
    }
}

impl ModuleHost for ModuleRegistry {
    fn modules(&self) -> Vec<ModuleInfo> {
        self.modules.iter().map(RegisteredModule::info).collect()
    }

    fn module(&self, name: &str) -> Option<ModuleInfo> {
        let id = self.names.get(&name.to_lowercase())?;
        self.find(*id).map(RegisteredModule::info)
    }

    fn module_by_id(&self, id: ModuleId) -> Option<ModuleInfo> {
        self.find(id).map(RegisteredModule::info)
    }

    fn enable_module(&mut self, id: ModuleId) -> Result<(), HostError> {
        let module = self.find_mut(id)?;
        if module.state.state != ModuleState::Enabled {
            module.state.transition(ModuleState::Enabled)?;
            tracing::info!("Enabled module {}", module.info().full_name());
        }
        self.register_declared(id);
        Ok(())
    }

    fn disable_module(&mut self, id: ModuleId) -> Result<(), HostError> {
        let module = self.find_mut(id)?;
        if module.state.state == ModuleState::Disabled {
            return Ok(());
        }
        module.state.transition(ModuleState::Disabled)?;
        tracing::info!("Disabled module {}", module.info().full_name());
        self.scheduler.cancel_owned_by(id);
        Ok(())
    }

    fn cancel_tasks(&mut self, id: ModuleId) -> Result<usize, HostError> {
        Ok(self.scheduler.cancel_owned_by(id))
    }

    fn listeners_of(&self, id: ModuleId) -> Vec<ListenerBinding> {
        self.listeners.get(&id).cloned().unwrap_or_default()
    }

    fn unregister_listeners(&mut self, id: ModuleId) -> Result<usize, HostError> {
        Ok(self.listeners.remove(&id).map(|b| b.len()).unwrap_or(0))
    }

    fn commands_owned_by(&self, id: ModuleId) -> Vec<String> {
        self.commands
            .iter()
            .filter(|(_, entry)| entry.owner == id)
            .map(|(label, _)| label.clone())
            .collect()
    }

    fn unregister_command(&mut self, label: &str) -> Result<(), HostError> {
        self.commands
            .remove(&label.to_lowercase())
            .map(|_| ())
            .ok_or_else(|| HostError::ModuleNotFound(format!("command '{}'", label)))
    }

    fn unregister_module(&mut self, id: ModuleId) -> Result<(), HostError> {
        let pos = self
            .modules
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| HostError::ModuleNotFound(id.to_string()))?;
        let mut module = self.modules.remove(pos);
        let key = module.manifest.module.name.to_lowercase();
        if self.names.get(&key) == Some(&id) {
            self.names.remove(&key);
        }
        module.state.transition(ModuleState::Unloaded)?;
        Ok(())
    }

    fn release_loader(&mut self, id: ModuleId) -> Result<LoaderRelease, HostError> {
        let Some(dir) = self.loaders.remove(&id) else {
            return Ok(LoaderRelease::NoContext);
        };
        if !self.owns_loader_dir(&dir) {
            tracing::warn!("Refusing to remove {} outside the module directory", dir.display());
            return Ok(LoaderRelease::Released(dir));
        }
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                // 다음 해제 시도를 위해 되돌려 둠
                self.loaders.insert(id, dir.clone());
                return Err(e.into());
            }
        }
        Ok(LoaderRelease::Released(dir))
    }

    fn inspect_archive(&self, archive: &Path) -> Result<ModuleManifest, HostError> {
        manifest::read_manifest(archive)
    }

    fn load_module(&mut self, archive: &Path) -> Result<ModuleInfo, HostError> {
        let manifest = manifest::read_manifest(archive)?;
        let name = manifest.module.name.clone();
        let key = name.to_lowercase();
        if self.names.contains_key(&key) {
            return Err(HostError::AlreadyLoaded(name));
        }

        let extracted = self.loader_dir(&name).ok_or_else(|| HostError::InvalidArchive {
            path: archive.display().to_string(),
            reason: format!("module name '{}' escapes the module directory", name),
        })?;
        if self.loaders.values().any(|dir| dir == &extracted) {
            return Err(HostError::LoaderBusy(name));
        }
        manifest::extract_archive(archive, &extracted)?;

        let id = ModuleId::new_v4();
        let mut state = StateMachine::new();
        state.transition(ModuleState::Loaded)?;

        let module = RegisteredModule {
            id,
            manifest,
            archive: archive.to_path_buf(),
            state,
        };
        let info = module.info();
        tracing::info!(
            "Loaded module {} from {}",
            info.full_name(),
            archive.display()
        );

        self.modules.push(module);
        self.names.insert(key, id);
        self.loaders.insert(id, extracted);
        Ok(info)
    }
}
