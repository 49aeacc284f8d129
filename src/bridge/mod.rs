//! Edit-mode bridge between the settings surface and the enforcement agent.
//!
//! - `EditModeBridge`: Single writer of the global and per-app edit flags
//! - `EnforcementChannel`: Attached/detached transport to the agent

mod channel;
mod mode;

pub use channel::{
    ChannelStatus, DetachedChannel, EditModeState, EnforcementChannel, InProcessChannel,
    SharedFileChannel,
};
pub use mode::EditModeBridge;
