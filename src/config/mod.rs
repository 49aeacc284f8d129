//! Configuration types and loading.
//!
//! - `GodModeConfig`: Top-level settings with validation
//! - `DataPaths`: Every file location derived from the data directory
//! - `Preferences`: User switches such as the presence icon

mod prefs;
mod settings;

pub use prefs::Preferences;
pub use settings::{
    BridgeConfig, CONFIG_FILE, ChannelKind, DataPaths, GodModeConfig, NotificationConfig,
    OrchestratorConfig, StoreConfig,
};
