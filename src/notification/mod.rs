//! Rule event notification.
//!
//! - `RuleEvent`: Load, import, edit and crash events broadcast to observers
//! - `Notifier`: Event log and hook command delivery

mod events;
mod notifier;

pub use events::{EventType, RuleEvent};
pub use notifier::Notifier;
