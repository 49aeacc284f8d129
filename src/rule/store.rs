use std::path::PathBuf;

use chrono::Utc;

use serde_json::Value;
use tokio::fs;
use tracing::{debug, info, warn};

use super::{AppRules, ImportSource, MergeReport};
use crate::config::{DataPaths, StoreConfig};
use crate::error::{GodModeError, Result};
use crate::utils::sibling_path;

/// Durable home of [`AppRules`].
///
/// Every method does file I/O and is meant to run on a background task. The
/// orchestrator guarantees only one mutating call is in flight at a time.
pub struct RuleStore {
    rules_path: PathBuf,
    max_import_bytes: u64,
    keep_corrupt_copy: bool,
}

impl RuleStore {
    pub fn new(paths: &DataPaths, config: &StoreConfig) -> Self {
        Self {
            rules_path: paths.rules_file.clone(),
            max_import_bytes: config.max_import_bytes,
            keep_corrupt_copy: config.keep_corrupt_copy,
        }
    }

    pub async fn init(&self) -> Result<()> {
        if let Some(parent) = self.rules_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        self.recover_interrupted_write().await;
        Ok(())
    }

    /// Loads the persisted rules, reporting an unparseable file as
    /// `StoreCorrupt`. A missing file is an empty rule set.
    pub async fn try_load(&self) -> Result<AppRules> {
        let content = match fs::read(&self.rules_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AppRules::new()),
            Err(e) => return Err(e.into()),
        };
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(AppRules::new());
        }
        serde_json::from_slice(&content).map_err(|e| GodModeError::StoreCorrupt(e.to_string()))
    }

    /// Loads the persisted rules, recovering every failure to an empty set.
    /// Losing rules beats taking the whole settings surface down.
    pub async fn load(&self) -> AppRules {
        match self.try_load().await {
            Ok(rules) => {
                debug!(
                    apps = rules.len(),
                    rules = rules.rule_count(),
                    "Rules loaded"
                );
                rules
            }
            Err(GodModeError::StoreCorrupt(reason)) => {
                warn!(
                    path = %self.rules_path.display(),
                    reason = %reason,
                    "Rule store is corrupt, starting empty"
                );
                self.set_aside_corrupt().await;
                AppRules::new()
            }
            Err(e) => {
                warn!(error = %e, "Failed to read rule store, starting empty");
                AppRules::new()
            }
        }
    }

    pub async fn save(&self, rules: &AppRules) -> Result<()> {
        let content = serde_json::to_vec_pretty(rules)?;
        self.write_atomic(&content).await?;
        debug!(apps = rules.len(), rules = rules.rule_count(), "Rules saved");
        Ok(())
    }

    /// Reads and validates an external rule file, merges it over `current`
    /// and persists the result. Nothing is written unless the whole payload is
    /// valid.
    pub async fn import_merge(
        &self,
        current: &AppRules,
        source: &dyn ImportSource,
    ) -> Result<(AppRules, MergeReport)> {
        let bytes = source.read(self.max_import_bytes).await?;
        let imported = parse_import(&bytes)?;

        let mut merged = current.clone();
        let report = merged.merge(imported);
        self.save(&merged).await?;

        info!(
            source = %source.describe(),
            apps_added = report.apps_added,
            activities_replaced = report.activities_replaced,
            activities_added = report.activities_added,
            "Rules imported"
        );
        Ok((merged, report))
    }

    /// Removes the persisted file entirely.
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.rules_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(&self, content: &[u8]) -> Result<()> {
        let tmp_path = sibling_path(&self.rules_path, ".tmp");

        fs::write(&tmp_path, content).await?;

        let tmp_path_clone = tmp_path.clone();
        let sync_result = tokio::task::spawn_blocking(move || {
            std::fs::File::open(&tmp_path_clone).and_then(|file| file.sync_all())
        })
        .await;

        match sync_result {
            Err(e) => warn!(error = %e, "Failed to sync temp file to disk"),
            Ok(Err(e)) => warn!(error = %e, "Failed to sync temp file to disk"),
            Ok(Ok(())) => {}
        }

        fs::rename(&tmp_path, &self.rules_path).await?;
        debug!(path = %self.rules_path.display(), "Atomic write completed");
        Ok(())
    }

    async fn recover_interrupted_write(&self) {
        let tmp_path = sibling_path(&self.rules_path, ".tmp");
        if fs::try_exists(&tmp_path).await.unwrap_or(false) {
            debug!(path = %tmp_path.display(), "Removing interrupted write");
            if let Err(e) = fs::remove_file(&tmp_path).await {
                warn!(
                    path = %tmp_path.display(),
                    error = %e,
                    "Failed to remove interrupted write"
                );
            }
        }
    }

    /// Moves an unparseable rule file to `<name>.corrupt-<timestamp>` so the
    /// next save does not destroy it. Earlier copies are kept. No-op unless
    /// `keep_corrupt_copy` is set.
    pub async fn set_aside_corrupt(&self) {
        if !self.keep_corrupt_copy {
            return;
        }
        let corrupt_path = self.free_corrupt_path().await;
        match fs::rename(&self.rules_path, &corrupt_path).await {
            Ok(()) => info!(path = %corrupt_path.display(), "Corrupt rule file moved aside"),
            Err(e) => warn!(error = %e, "Failed to move corrupt rule file aside"),
        }
    }

    async fn free_corrupt_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let base = sibling_path(&self.rules_path, &format!(".corrupt-{}", stamp));
        let mut candidate = base.clone();
        let mut n = 1;
        while fs::try_exists(&candidate).await.unwrap_or(false) {
            candidate = sibling_path(&base, &format!("-{}", n));
            n += 1;
        }
        candidate
    }
}

/// Checks that an untrusted payload has the shape
/// `{package: {activity: [rule, ...]}}` before handing it to serde.
pub fn parse_import(bytes: &[u8]) -> Result<AppRules> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| GodModeError::ImportMalformed(format!("not valid JSON: {}", e)))?;

    let Value::Object(apps) = &value else {
        return Err(malformed("top level must be an object of packages"));
    };

    for (package, activities) in apps {
        if !is_valid_package(package) {
            return Err(malformed(format!("invalid package name {:?}", package)));
        }
        let Value::Object(activities) = activities else {
            return Err(malformed(format!("{}: expected an object of activities", package)));
        };
        for (activity, rules) in activities {
            if activity.trim().is_empty() || activity.chars().any(char::is_control) {
                return Err(malformed(format!("{}: invalid activity name {:?}", package, activity)));
            }
            let Value::Array(rules) = rules else {
                return Err(malformed(format!("{}/{}: expected a list of rules", package, activity)));
            };
            if let Some(pos) = rules.iter().position(|r| !r.is_object()) {
                return Err(malformed(format!(
                    "{}/{}: rule #{} is not an object",
                    package, activity, pos
                )));
            }
        }
    }

    serde_json::from_value(value).map_err(|e| GodModeError::ImportMalformed(e.to_string()))
}

fn malformed(msg: impl Into<String>) -> GodModeError {
    GodModeError::ImportMalformed(msg.into())
}

fn is_valid_package(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
