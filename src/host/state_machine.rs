use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Unloaded,
    Loaded,
    Enabled,
    Disabled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid module transition: {0:?} -> {1:?}")]
    InvalidTransition(ModuleState, ModuleState),
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    pub state: ModuleState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self { state: ModuleState::Unloaded }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_transition(&self, to: ModuleState) -> bool {
        use ModuleState::*;
        matches!(
            (self.state, to),
            (Unloaded, Loaded)
                | (Unloaded, Enabled)
                | (Loaded, Enabled)
                | (Disabled, Enabled)
                | (Enabled, Disabled)
                | (Loaded, Unloaded)
                | (Enabled, Unloaded)
                | (Disabled, Unloaded)
        )
    }

    pub fn transition(&mut self, to: ModuleState) -> Result<(), TransitionError> {
        if self.can_transition(to) {
            tracing::debug!("Module state transition: {:?} -> {:?}", self.state, to);
            self.state = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.state, to))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_enable_disable_unload() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.state, ModuleState::Unloaded);
        assert!(sm.transition(ModuleState::Loaded).is_ok());
        assert!(sm.transition(ModuleState::Enabled).is_ok());
        assert!(sm.transition(ModuleState::Disabled).is_ok());
        assert!(sm.transition(ModuleState::Enabled).is_ok());
        assert!(sm.transition(ModuleState::Unloaded).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        let mut sm = StateMachine::new();
        // 로드되지 않은 모듈은 비활성화할 수 없음
        assert!(sm.transition(ModuleState::Disabled).is_err());
        sm.transition(ModuleState::Loaded).unwrap();
        assert_eq!(
            sm.transition(ModuleState::Disabled),
            Err(TransitionError::InvalidTransition(
                ModuleState::Loaded,
                ModuleState::Disabled
            ))
        );
    }
}
