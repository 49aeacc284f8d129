use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{GodModeError, Result};

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GodModeConfig {
    pub store: StoreConfig,
    pub bridge: BridgeConfig,
    pub orchestrator: OrchestratorConfig,
    pub notification: NotificationConfig,
}

impl GodModeConfig {
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = data_dir.join(CONFIG_FILE);
        let content =
            toml::to_string_pretty(self).map_err(|e| GodModeError::Config(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.store.rules_file.trim().is_empty() {
            errors.push("store.rules_file must not be empty");
        }
        if self.store.rules_file.contains(['/', '\\']) {
            errors.push("store.rules_file must be a file name, not a path");
        }
        if self.store.max_import_bytes == 0 {
            errors.push("store.max_import_bytes must be greater than 0");
        }

        if self.orchestrator.event_capacity == 0 {
            errors.push("orchestrator.event_capacity must be greater than 0");
        }

        if self.bridge.state_file.trim().is_empty() {
            errors.push("bridge.state_file must not be empty");
        }
        if self.bridge.attach_marker.trim().is_empty() {
            errors.push("bridge.attach_marker must not be empty");
        }
        if self.bridge.state_file == self.bridge.attach_marker {
            errors.push("bridge.state_file and bridge.attach_marker must differ");
        }

        if let Some(hook) = &self.notification.hook_command
            && hook.trim().is_empty()
        {
            errors.push("notification.hook_command must not be blank when set");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GodModeError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// File name of the persisted rule set inside the data directory.
    pub rules_file: String,
    /// Import payloads larger than this are rejected as malformed.
    pub max_import_bytes: u64,
    /// Move an unparseable rule file aside instead of letting the next save
    /// overwrite it.
    pub keep_corrupt_copy: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            rules_file: "app_rules.json".to_string(),
            max_import_bytes: 16 * 1024 * 1024,
            keep_corrupt_copy: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    SharedFile,
    Detached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub channel: ChannelKind,
    /// Directory shared with the enforcement agent. Relative paths resolve
    /// against the data directory.
    pub shared_dir: PathBuf,
    pub state_file: String,
    /// Written by the agent while it is attached to the running system.
    pub attach_marker: String,
    /// Stack trace the agent leaves behind when a hooked process dies.
    pub crash_trace_file: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel: ChannelKind::SharedFile,
            shared_dir: PathBuf::from("shared"),
            state_file: "edit_mode.json".to_string(),
            attach_marker: "agent.attached".to_string(),
            crash_trace_file: "crash_trace.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub event_capacity: usize,
    pub detect_crashes: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            event_capacity: 64,
            detect_crashes: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub event_log: bool,
    pub hook_command: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            event_log: true,
            hook_command: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataPaths {
    pub data_dir: PathBuf,
    pub rules_file: PathBuf,
    pub session_file: PathBuf,
    pub prefs_file: PathBuf,
    pub logs_dir: PathBuf,
    pub shared_dir: PathBuf,
}

impl DataPaths {
    pub fn new(data_dir: PathBuf, config: &GodModeConfig) -> Self {
        let shared_dir = if config.bridge.shared_dir.is_absolute() {
            config.bridge.shared_dir.clone()
        } else {
            data_dir.join(&config.bridge.shared_dir)
        };

        Self {
            rules_file: data_dir.join(&config.store.rules_file),
            session_file: data_dir.join("session.json"),
            prefs_file: data_dir.join("prefs.toml"),
            logs_dir: data_dir.join("logs"),
            shared_dir,
            data_dir,
        }
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.logs_dir, &self.shared_dir] {
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    pub fn event_log(&self) -> PathBuf {
        self.logs_dir.join("events.log")
    }

    pub fn crash_trace(&self, config: &BridgeConfig) -> PathBuf {
        self.shared_dir.join(&config.crash_trace_file)
    }
}
