use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GodModeError, Result};
use crate::utils::sibling_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Attached,
    Detached,
}

/// Edit-mode flags as seen by the enforcement agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditModeState {
    pub editing: bool,
    /// Per-package overrides of the global flag.
    pub app_overrides: BTreeMap<String, bool>,
}

impl EditModeState {
    pub fn is_editing_for(&self, package: &str) -> bool {
        self.app_overrides
            .get(package)
            .copied()
            .unwrap_or(self.editing)
    }
}

/// Transport to the agent running inside target processes.
///
/// Only an attached channel accepts calls. A detached one fails fast with
/// `BridgeUnavailable` so callers can tell the user why nothing happened.
pub trait EnforcementChannel: Send + Sync {
    fn status(&self) -> ChannelStatus;

    fn read_state(&self) -> Result<EditModeState>;

    fn publish(&self, state: &EditModeState) -> Result<()>;

    fn is_attached(&self) -> bool {
        self.status() == ChannelStatus::Attached
    }
}

/// The agent is not loaded at all.
pub struct DetachedChannel;

impl EnforcementChannel for DetachedChannel {
    fn status(&self) -> ChannelStatus {
        ChannelStatus::Detached
    }

    fn read_state(&self) -> Result<EditModeState> {
        Err(GodModeError::BridgeUnavailable)
    }

    fn publish(&self, _state: &EditModeState) -> Result<()> {
        Err(GodModeError::BridgeUnavailable)
    }
}

/// Agent hosted in the same process. Attachment can be toggled at runtime.
pub struct InProcessChannel {
    attached: AtomicBool,
    state: Mutex<EditModeState>,
}

impl Default for InProcessChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessChannel {
    pub fn new() -> Self {
        Self {
            attached: AtomicBool::new(true),
            state: Mutex::new(EditModeState::default()),
        }
    }

    pub fn detached() -> Self {
        let channel = Self::new();
        channel.detach();
        channel
    }

    pub fn attach(&self) {
        self.attached.store(true, Ordering::SeqCst);
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    /// What the agent side currently sees.
    pub fn agent_view(&self) -> EditModeState {
        self.state.lock().clone()
    }
}

impl EnforcementChannel for InProcessChannel {
    fn status(&self) -> ChannelStatus {
        if self.attached.load(Ordering::SeqCst) {
            ChannelStatus::Attached
        } else {
            ChannelStatus::Detached
        }
    }

    fn read_state(&self) -> Result<EditModeState> {
        if !self.is_attached() {
            return Err(GodModeError::BridgeUnavailable);
        }
        Ok(self.state.lock().clone())
    }

    fn publish(&self, state: &EditModeState) -> Result<()> {
        if !self.is_attached() {
            return Err(GodModeError::BridgeUnavailable);
        }
        *self.state.lock() = state.clone();
        Ok(())
    }
}

/// Exchanges state with an out-of-process agent through a shared directory.
///
/// The agent creates the attach marker when it is loaded and polls the state
/// file. Writes go through temp+rename so the agent never reads a torn file.
pub struct SharedFileChannel {
    state_path: PathBuf,
    marker_path: PathBuf,
}

impl SharedFileChannel {
    pub fn new(shared_dir: &Path, state_file: &str, attach_marker: &str) -> Self {
        Self {
            state_path: shared_dir.join(state_file),
            marker_path: shared_dir.join(attach_marker),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }
}

impl EnforcementChannel for SharedFileChannel {
    fn status(&self) -> ChannelStatus {
        if self.marker_path.is_file() {
            ChannelStatus::Attached
        } else {
            ChannelStatus::Detached
        }
    }

    fn read_state(&self) -> Result<EditModeState> {
        if !self.is_attached() {
            return Err(GodModeError::BridgeUnavailable);
        }
        match std::fs::read_to_string(&self.state_path) {
            Ok(content) => Ok(serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(error = %e, path = %self.state_path.display(), "Unreadable edit-mode state, using defaults");
                EditModeState::default()
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EditModeState::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn publish(&self, state: &EditModeState) -> Result<()> {
        if !self.is_attached() {
            return Err(GodModeError::BridgeUnavailable);
        }

        let tmp_path = sibling_path(&self.state_path, ".tmp");

        std::fs::write(&tmp_path, serde_json::to_vec(state)?)?;
        std::fs::rename(&tmp_path, &self.state_path)?;
        debug!(editing = state.editing, "Edit-mode state published");
        Ok(())
    }
}
