use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of the single rule operation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    #[default]
    Idle,
    Loading,
    Ready,
    Importing,
    /// A user edit to the rule set is being persisted.
    Updating,
    /// The last operation failed. The published snapshot is still the last
    /// good one (or empty after a failed load).
    Failed,
}

impl OrchestratorState {
    pub fn allowed_transitions(&self) -> &'static [OrchestratorState] {
        use OrchestratorState::*;
        match self {
            Idle => &[Loading, Importing, Updating],
            Loading => &[Ready, Failed],
            Ready => &[Loading, Importing, Updating],
            Importing => &[Ready, Failed],
            Updating => &[Ready, Failed],
            Failed => &[Loading, Importing, Updating],
        }
    }

    pub fn can_transition_to(&self, target: OrchestratorState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// A background operation owns the store.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            OrchestratorState::Loading | OrchestratorState::Importing | OrchestratorState::Updating
        )
    }

    /// A load has finished, successfully or not.
    pub fn is_settled(&self) -> bool {
        matches!(self, OrchestratorState::Ready | OrchestratorState::Failed)
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Loading => "Loading",
            Self::Ready => "Ready",
            Self::Importing => "Importing",
            Self::Updating => "Updating",
            Self::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_path() {
        assert!(OrchestratorState::Idle.can_transition_to(OrchestratorState::Loading));
        assert!(OrchestratorState::Loading.can_transition_to(OrchestratorState::Ready));
        assert!(OrchestratorState::Loading.can_transition_to(OrchestratorState::Failed));
        assert!(!OrchestratorState::Loading.can_transition_to(OrchestratorState::Loading));
    }

    #[test]
    fn test_import_path() {
        assert!(OrchestratorState::Ready.can_transition_to(OrchestratorState::Importing));
        assert!(OrchestratorState::Importing.can_transition_to(OrchestratorState::Ready));
        assert!(OrchestratorState::Importing.can_transition_to(OrchestratorState::Failed));
        assert!(!OrchestratorState::Importing.can_transition_to(OrchestratorState::Importing));
        assert!(!OrchestratorState::Loading.can_transition_to(OrchestratorState::Importing));
    }

    #[test]
    fn test_failed_is_recoverable() {
        assert!(OrchestratorState::Failed.can_transition_to(OrchestratorState::Loading));
        assert!(OrchestratorState::Failed.can_transition_to(OrchestratorState::Importing));
    }

    #[test]
    fn test_busy_states() {
        assert!(OrchestratorState::Loading.is_busy());
        assert!(OrchestratorState::Importing.is_busy());
        assert!(OrchestratorState::Updating.is_busy());
        assert!(!OrchestratorState::Ready.is_busy());
        assert!(!OrchestratorState::Failed.is_busy());
        assert!(!OrchestratorState::Idle.is_busy());
    }
}
