use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::warn;

use crate::error::{GodModeError, Result};

/// Small user-facing switches kept next to the rule store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Hide the launcher presence icon.
    pub icon_hidden: bool,
    /// Version that last ran against this data directory.
    pub last_seen_version: Option<String>,
}

impl Preferences {
    /// Unreadable preference files fall back to defaults.
    pub async fn load(path: &Path) -> Self {
        match fs::read_to_string(path).await {
            Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
                warn!(error = %e, path = %path.display(), "Ignoring unreadable preferences");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| GodModeError::Config(e.to_string()))?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn toggle_icon(&mut self) -> bool {
        self.icon_hidden = !self.icon_hidden;
        self.icon_hidden
    }

    /// Records `current` as the last seen version. Returns true when it differs
    /// from the previous one, i.e. this is the first run after an upgrade.
    pub fn record_version(&mut self, current: &str) -> bool {
        let changed = self.last_seen_version.as_deref() != Some(current);
        self.last_seen_version = Some(current.to_string());
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_version_detects_upgrade() {
        let mut prefs = Preferences::default();
        assert!(prefs.record_version("0.1.0"));
        assert!(!prefs.record_version("0.1.0"));
        assert!(prefs.record_version("0.2.0"));
    }

    #[test]
    fn test_toggle_icon() {
        let mut prefs = Preferences::default();
        assert!(prefs.toggle_icon());
        assert!(!prefs.toggle_icon());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.toml");

        let prefs = Preferences {
            icon_hidden: true,
            last_seen_version: Some("1.0.0".into()),
        };
        prefs.save(&path).await.unwrap();

        assert_eq!(Preferences::load(&path).await, prefs);
    }

    #[tokio::test]
    async fn test_garbage_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.toml");
        tokio::fs::write(&path, "icon_hidden = [[[").await.unwrap();

        assert_eq!(Preferences::load(&path).await, Preferences::default());
    }
}
