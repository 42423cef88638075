//! 호스트 모듈 레지스트리
//!
//! `ModuleHost`는 모듈 관리자가 호스트 내부 구조에 접근하는 유일한 경로입니다.
//! 모듈 목록, 이름 인덱스, 리스너 바인딩, 명령 라우팅, 태스크 스케줄러,
//! 모듈별 로딩 컨텍스트 각각에 대해 조회/제거 연산을 노출합니다.
//! `ModuleRegistry`가 인프로세스 구현입니다.

pub mod error;
pub mod manifest;
pub mod registry;
pub mod scheduler;
pub mod state_machine;

use std::path::{Path, PathBuf};

use serde::Serialize;

pub use error::HostError;
pub use manifest::ModuleManifest;
pub use registry::{CommandDispatch, ModuleRegistry};
pub use scheduler::{TaskId, TaskScheduler};
pub use state_machine::ModuleState;

/// 로드할 때마다 새로 발급되는 모듈 인스턴스 ID
pub type ModuleId = uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub state: ModuleState,
    pub archive: PathBuf,
}

impl ModuleInfo {
    /// "Foo v1.0" 형식
    pub fn full_name(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }

    pub fn is_enabled(&self) -> bool {
        self.state == ModuleState::Enabled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerBinding {
    pub event: String,
    pub function: String,
}

/// 로딩 컨텍스트 해제 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderRelease {
    Released(PathBuf),
    /// 해제할 컨텍스트가 없음
    NoContext,
    /// 호스트가 개별 해제를 지원하지 않음
    Unsupported,
}

/// 모듈 코드 호출 요청 (명령, 이벤트, 예약 태스크 공통)
#[derive(Debug, Clone, Serialize)]
pub struct Invocation {
    pub module: String,
    /// 엔트리 스크립트 절대 경로. None이면 선언형 모듈
    pub entry: Option<PathBuf>,
    pub function: String,
    pub payload: serde_json::Value,
}

/// 모듈 관리자가 의존하는 호스트 관리 인터페이스
pub trait ModuleHost {
    /// 호스트 열거 순서의 스냅샷
    fn modules(&self) -> Vec<ModuleInfo>;

    /// 대소문자 무시 이름 조회
    fn module(&self, name: &str) -> Option<ModuleInfo>;

    fn module_by_id(&self, id: ModuleId) -> Option<ModuleInfo>;

    fn enable_module(&mut self, id: ModuleId) -> Result<(), HostError>;

    fn disable_module(&mut self, id: ModuleId) -> Result<(), HostError>;

    /// 모듈이 예약한 모든 태스크 취소, 취소 개수 반환
    fn cancel_tasks(&mut self, id: ModuleId) -> Result<usize, HostError>;

    fn listeners_of(&self, id: ModuleId) -> Vec<ListenerBinding>;

    /// 리스너 바인딩 테이블에서 모듈 항목 제거, 제거한 바인딩 수 반환
    fn unregister_listeners(&mut self, id: ModuleId) -> Result<usize, HostError>;

    /// 모듈이 소유한 명령 라벨 (정렬됨)
    fn commands_owned_by(&self, id: ModuleId) -> Vec<String>;

    fn unregister_command(&mut self, label: &str) -> Result<(), HostError>;

    /// 모듈 목록과 이름 인덱스에서 제거
    fn unregister_module(&mut self, id: ModuleId) -> Result<(), HostError>;

    fn release_loader(&mut self, _id: ModuleId) -> Result<LoaderRelease, HostError> {
        Ok(LoaderRelease::Unsupported)
    }

    /// 디스크립터만 읽어 아카이브가 선언한 모듈을 확인
    fn inspect_archive(&self, archive: &Path) -> Result<ModuleManifest, HostError>;

    /// 아카이브를 Loaded 상태로 등록 (활성화는 하지 않음)
    fn load_module(&mut self, archive: &Path) -> Result<ModuleInfo, HostError>;
}
