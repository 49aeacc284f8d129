use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RulesLoaded,
    LoadFailed,
    ImportSucceeded,
    ImportFailed,
    ImportRejected,
    RulesChanged,
    EditModeChanged,
    CrashDetected,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RulesLoaded => "rules.loaded",
            Self::LoadFailed => "rules.load_failed",
            Self::ImportSucceeded => "import.succeeded",
            Self::ImportFailed => "import.failed",
            Self::ImportRejected => "import.rejected",
            Self::RulesChanged => "rules.changed",
            Self::EditModeChanged => "edit_mode.changed",
            Self::CrashDetected => "crash.detected",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::LoadFailed | Self::ImportFailed | Self::ImportRejected | Self::CrashDetected
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEvent {
    pub event_type: EventType,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// (apps, rules) in the snapshot after the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<(usize, usize)>,
}

impl RuleEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            created_at: Utc::now(),
            package: None,
            message: None,
            counts: None,
        }
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_counts(mut self, apps: usize, rules: usize) -> Self {
        self.counts = Some((apps, rules));
        self
    }

    pub fn body(&self) -> String {
        let mut parts = Vec::new();

        if let Some(package) = &self.package {
            parts.push(format!("App: {}", package));
        }

        if let Some((apps, rules)) = self.counts {
            parts.push(format!("Apps: {} Rules: {}", apps, rules));
        }

        if let Some(msg) = &self.message {
            parts.push(msg.clone());
        }

        parts.join(" | ")
    }
}
