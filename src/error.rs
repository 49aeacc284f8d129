use thiserror::Error;

#[derive(Error, Debug)]
pub enum GodModeError {
    #[error("Rule store is corrupt: {0}")]
    StoreCorrupt(String),

    #[error("Import file is malformed: {0}")]
    ImportMalformed(String),

    #[error("Import source could not be read: {0}")]
    ImportIo(String),

    #[error("Another import is already in progress")]
    ImportBusy,

    #[error("Rule store is busy: {operation} is in progress")]
    Busy { operation: String },

    #[error("Enforcement module is not active")]
    BridgeUnavailable,

    #[error("No rules recorded for app: {0}")]
    AppNotFound(String),

    #[error("No rules recorded for activity: {package}/{activity}")]
    ActivityNotFound { package: String, activity: String },

    #[error("Rule not found: {package}/{activity}#{index}")]
    RuleNotFound {
        package: String,
        activity: String,
        index: usize,
    },

    #[error("Invalid state transition: {from} → {to} (allowed: {allowed})")]
    InvalidStateTransition {
        from: String,
        to: String,
        allowed: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl GodModeError {
    /// Errors caused by a user action that the settings surface must report.
    /// Everything else is storage trouble that is recovered locally.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::ImportMalformed(_)
                | Self::ImportIo(_)
                | Self::ImportBusy
                | Self::Busy { .. }
                | Self::BridgeUnavailable
                | Self::AppNotFound(_)
                | Self::ActivityNotFound { .. }
                | Self::RuleNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GodModeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_classification() {
        assert!(GodModeError::ImportBusy.is_user_facing());
        assert!(GodModeError::BridgeUnavailable.is_user_facing());
        assert!(GodModeError::ImportMalformed("bad".into()).is_user_facing());
        assert!(!GodModeError::StoreCorrupt("eof".into()).is_user_facing());
        assert!(!GodModeError::Config("x".into()).is_user_facing());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            GodModeError::BridgeUnavailable.to_string(),
            "Enforcement module is not active"
        );
        let err = GodModeError::RuleNotFound {
            package: "com.example".into(),
            activity: "Main".into(),
            index: 3,
        };
        assert_eq!(err.to_string(), "Rule not found: com.example/Main#3");
    }
}
