use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::RuleEvent;
use crate::config::NotificationConfig;

/// Side channels for rule events: an append-only event log and an optional
/// user hook command.
#[derive(Clone)]
pub struct Notifier {
    config: NotificationConfig,
    log_path: Option<PathBuf>,
}

impl Notifier {
    pub fn new(config: NotificationConfig, log_path: Option<PathBuf>) -> Self {
        Self { config, log_path }
    }

    pub async fn notify(&self, event: &RuleEvent) {
        if !self.config.enabled {
            return;
        }

        if self.config.event_log {
            self.write_event_log(event).await;
        }

        if let Some(hook) = &self.config.hook_command {
            self.run_hook(hook, event).await;
        }
    }

    async fn write_event_log(&self, event: &RuleEvent) {
        let Some(log_path) = &self.log_path else {
            return;
        };

        let log_line = format!(
            "[{}] {}: {}\n",
            event.created_at.format("%Y-%m-%dT%H:%M:%SZ"),
            event.event_type.as_str(),
            event.body()
        );

        if let Some(dir) = log_path.parent()
            && let Err(e) = tokio::fs::create_dir_all(dir).await
        {
            warn!(error = %e, "Failed to create logs directory");
            return;
        }

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await;

        match result {
            Ok(mut file) => {
                if let Err(e) = file.write_all(log_line.as_bytes()).await {
                    warn!(error = %e, "Failed to write event log");
                }
            }
            Err(e) => {
                warn!(error = %e, path = %log_path.display(), "Failed to open event log");
            }
        }
    }

    async fn run_hook(&self, hook_cmd: &str, event: &RuleEvent) {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(_) => return,
        };

        let result = Command::new("sh")
            .args(["-c", hook_cmd])
            .env("GODMODE_EVENT", event.event_type.as_str())
            .env("GODMODE_EVENT_JSON", &json)
            .output()
            .await;

        if let Err(e) = result {
            debug!(error = %e, hook = %hook_cmd, "Failed to run hook");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::EventType;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_event_log_appends_lines() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("logs").join("events.log");
        let notifier = Notifier::new(NotificationConfig::default(), Some(log_path.clone()));

        notifier
            .notify(&RuleEvent::new(EventType::RulesLoaded).with_counts(1, 2))
            .await;
        notifier
            .notify(&RuleEvent::new(EventType::ImportFailed).with_message("bad json"))
            .await;

        let content = tokio::fs::read_to_string(&log_path).await.unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("rules.loaded: Apps: 1 Rules: 2"));
        assert!(lines[1].contains("import.failed: bad json"));
    }

    #[tokio::test]
    async fn test_disabled_notifier_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("events.log");
        let notifier = Notifier::new(
            NotificationConfig {
                enabled: false,
                ..NotificationConfig::default()
            },
            Some(log_path.clone()),
        );

        notifier.notify(&RuleEvent::new(EventType::RulesLoaded)).await;
        assert!(!log_path.exists());
    }
}
