//! Session record and previous-crash detection.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::utils::sibling_path;

/// What a running settings session leaves on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub pid: u32,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub editing: bool,
    pub clean_shutdown: bool,
}

impl SessionRecord {
    /// A fresh record for this process.
    pub fn start() -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            pid: std::process::id(),
            hostname: host_name(),
            started_at: now,
            updated_at: now,
            editing: false,
            clean_shutdown: false,
        }
    }

    /// Only meaningful for records written on this machine.
    pub fn is_process_alive(&self) -> bool {
        self.hostname == host_name() && pid_exists(self.pid)
    }

    /// The session ended without running its shutdown path.
    pub fn ended_abnormally(&self) -> bool {
        !self.clean_shutdown && !self.is_process_alive()
    }
}

#[cfg(unix)]
fn host_name() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(not(unix))]
fn host_name() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(unix)]
fn pid_exists(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // EPERM: the process exists but belongs to someone else.
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
fn pid_exists(_pid: u32) -> bool {
    false
}

/// Advisory report shown once after the agent left a crash trace, or after a
/// previous session died with edit mode on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashReport {
    /// The previous session, when it ended without shutting down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionRecord>,
    pub editing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl CrashReport {
    pub fn summary(&self) -> String {
        let mut text = match &self.session {
            Some(session) => format!(
                "Previous session {} (pid {}) ended unexpectedly at or after {}",
                session.session_id,
                session.pid,
                session.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => "A target app crashed since the last session".to_string(),
        };
        if self.editing {
            text.push_str(" while edit mode was on");
        }
        text
    }
}

pub struct SessionTracker {
    session_path: PathBuf,
    trace_path: PathBuf,
    current: Mutex<SessionRecord>,
}

impl SessionTracker {
    pub fn new(session_path: PathBuf, trace_path: PathBuf) -> Self {
        Self {
            session_path,
            trace_path,
            current: Mutex::new(SessionRecord::start()),
        }
    }

    pub fn current(&self) -> SessionRecord {
        self.current.lock().clone()
    }

    pub async fn read_previous(&self) -> Result<Option<SessionRecord>> {
        match fs::read_to_string(&self.session_path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Inspects the record left by the previous session and the agent's
    /// crash trace. Must run before [`begin`](Self::begin) overwrites the
    /// record.
    pub async fn detect_crash(&self) -> Result<Option<CrashReport>> {
        let previous = self.read_previous().await?;
        if previous
            .as_ref()
            .is_some_and(|p| p.session_id == self.current.lock().session_id)
        {
            return Ok(None);
        }

        // A trace counts on its own: the agent writes it when a target app
        // dies, however this tool's last session ended.
        let trace = self.take_trace().await;
        let abnormal = previous.as_ref().filter(|p| p.ended_abnormally());
        let editing = previous.as_ref().is_some_and(|p| p.editing);

        if trace.is_none() && !abnormal.is_some_and(|p| p.editing) {
            if let Some(previous) = &previous {
                debug!(
                    session = %previous.session_id,
                    abnormal = abnormal.is_some(),
                    editing,
                    "No crash to report from previous session"
                );
            }
            return Ok(None);
        }

        info!(
            session = ?abnormal.map(|p| p.session_id),
            editing,
            has_trace = trace.is_some(),
            "Crash detected"
        );
        Ok(Some(CrashReport {
            session: abnormal.cloned(),
            editing,
            trace,
        }))
    }

    /// Claims the current session record.
    pub async fn begin(&self, editing: bool) -> Result<()> {
        let record = {
            let mut current = self.current.lock();
            current.editing = editing;
            current.updated_at = Utc::now();
            current.clone()
        };
        self.write(&record).await
    }

    pub async fn record_editing(&self, editing: bool) -> Result<()> {
        self.begin(editing).await
    }

    pub async fn finish(&self) -> Result<()> {
        let record = {
            let mut current = self.current.lock();
            current.clean_shutdown = true;
            current.updated_at = Utc::now();
            current.clone()
        };
        self.write(&record).await?;
        debug!(session = %record.session_id, "Session closed cleanly");
        Ok(())
    }

    /// The agent's crash trace is reported once; afterwards it is removed.
    async fn take_trace(&self) -> Option<String> {
        let trace = fs::read_to_string(&self.trace_path).await.ok()?;
        if let Err(e) = fs::remove_file(&self.trace_path).await {
            warn!(error = %e, "Failed to remove consumed crash trace");
        }
        let trimmed = trace.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    async fn write(&self, record: &SessionRecord) -> Result<()> {
        if let Some(parent) = self.session_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = sibling_path(&self.session_path, ".tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(record)?).await?;
        fs::rename(&tmp_path, &self.session_path).await?;
        Ok(())
    }
}

impl Drop for SessionTracker {
    fn drop(&mut self) {
        // A panic is exactly what the next session should detect.
        if std::thread::panicking() {
            return;
        }

        let record = {
            let mut current = self.current.lock();
            if current.clean_shutdown {
                return;
            }
            current.clean_shutdown = true;
            current.updated_at = Utc::now();
            current.clone()
        };

        // Only close out a record this session actually wrote.
        let ours = std::fs::read_to_string(&self.session_path)
            .ok()
            .and_then(|c| serde_json::from_str::<SessionRecord>(&c).ok())
            .is_some_and(|r| r.session_id == record.session_id);
        if !ours {
            return;
        }

        let result = serde_json::to_vec_pretty(&record)
            .map_err(std::io::Error::other)
            .and_then(|bytes| std::fs::write(&self.session_path, bytes));
        if let Err(e) = result {
            warn!(error = %e, "Failed to close session record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn dead_record(editing: bool) -> SessionRecord {
        SessionRecord {
            hostname: "some-other-host".to_string(),
            editing,
            ..SessionRecord::start()
        }
    }

    async fn write_record(path: &Path, record: &SessionRecord) {
        tokio::fs::write(path, serde_json::to_vec(record).unwrap())
            .await
            .unwrap();
    }

    fn tracker(dir: &TempDir) -> SessionTracker {
        SessionTracker::new(
            dir.path().join("session.json"),
            dir.path().join("crash_trace.txt"),
        )
    }

    #[test]
    fn test_current_process_is_alive() {
        let record = SessionRecord::start();
        assert!(record.is_process_alive());
        assert!(!record.ended_abnormally());
    }

    #[test]
    fn test_foreign_host_is_not_alive() {
        assert!(!dead_record(false).is_process_alive());
    }

    #[tokio::test]
    async fn test_no_previous_session() {
        let dir = TempDir::new().unwrap();
        assert!(tracker(&dir).detect_crash().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crash_with_edit_mode_on() {
        let dir = TempDir::new().unwrap();
        let previous = dead_record(true);
        write_record(&dir.path().join("session.json"), &previous).await;
        tokio::fs::write(dir.path().join("crash_trace.txt"), "java.lang.NullPointerException\n")
            .await
            .unwrap();

        let tracker = tracker(&dir);
        let report = tracker.detect_crash().await.unwrap().unwrap();
        assert_eq!(report.session, Some(previous));
        assert!(report.editing);
        assert_eq!(report.trace.as_deref(), Some("java.lang.NullPointerException"));
        assert!(report.summary().contains("while edit mode was on"));

        // Trace is consumed.
        assert!(!dir.path().join("crash_trace.txt").exists());
    }

    #[tokio::test]
    async fn test_clean_shutdown_is_not_a_crash() {
        let dir = TempDir::new().unwrap();
        let previous = SessionRecord {
            clean_shutdown: true,
            ..dead_record(true)
        };
        write_record(&dir.path().join("session.json"), &previous).await;

        assert!(tracker(&dir).detect_crash().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trace_after_clean_session_is_reported() {
        let dir = TempDir::new().unwrap();
        let previous = SessionRecord {
            clean_shutdown: true,
            ..dead_record(true)
        };
        write_record(&dir.path().join("session.json"), &previous).await;
        tokio::fs::write(dir.path().join("crash_trace.txt"), "FATAL EXCEPTION: main")
            .await
            .unwrap();

        let report = tracker(&dir).detect_crash().await.unwrap().unwrap();
        assert!(report.session.is_none());
        assert!(report.editing);
        assert_eq!(report.trace.as_deref(), Some("FATAL EXCEPTION: main"));
        assert!(report.summary().starts_with("A target app crashed"));
        assert!(!dir.path().join("crash_trace.txt").exists());
    }

    #[tokio::test]
    async fn test_trace_without_previous_session_is_reported() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("crash_trace.txt"), "boom\n")
            .await
            .unwrap();

        let report = tracker(&dir).detect_crash().await.unwrap().unwrap();
        assert!(!report.editing);
        assert_eq!(report.trace.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_abnormal_exit_without_edit_mode_or_trace_is_ignored() {
        let dir = TempDir::new().unwrap();
        write_record(&dir.path().join("session.json"), &dead_record(false)).await;

        assert!(tracker(&dir).detect_crash().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_begin_and_finish() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);

        tracker.begin(true).await.unwrap();
        let record = tracker.read_previous().await.unwrap().unwrap();
        assert!(record.editing);
        assert!(!record.clean_shutdown);

        tracker.finish().await.unwrap();
        let record = tracker.read_previous().await.unwrap().unwrap();
        assert!(record.clean_shutdown);
        assert!(tracker.current().clean_shutdown);
    }

    #[tokio::test]
    async fn test_drop_closes_own_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        {
            let tracker = tracker(&dir);
            tracker.begin(false).await.unwrap();
        }
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let record: SessionRecord = serde_json::from_str(&content).unwrap();
        assert!(record.clean_shutdown);
    }
}
