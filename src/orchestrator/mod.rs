//! Rule orchestration for the settings surface.
//!
//! - `RuleOrchestrator`: Async load/import/edit with one operation in flight
//! - `OrchestratorState`: Idle → Loading → Ready ⇄ Importing/Updating, Failed
//! - `SessionTracker`: Session record and previous-crash detection

mod engine;
mod session;
mod state;

pub use engine::{ImportHandle, ImportSummary, RuleObserver, RuleOrchestrator};
pub use session::{CrashReport, SessionRecord, SessionTracker};
pub use state::OrchestratorState;
