pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod notification;
pub mod orchestrator;
pub mod output;
pub mod rule;
pub mod utils;

pub use bridge::{EditModeBridge, EnforcementChannel};
pub use config::{DataPaths, GodModeConfig};
pub use error::{GodModeError, Result};
pub use orchestrator::{OrchestratorState, RuleObserver, RuleOrchestrator};
pub use rule::{ActRules, AppRules, RuleStore, ViewRule};
