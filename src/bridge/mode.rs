use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

use super::channel::{
    DetachedChannel, EditModeState, EnforcementChannel, SharedFileChannel,
};
use crate::config::{BridgeConfig, ChannelKind, DataPaths};
use crate::error::{GodModeError, Result};

struct Shared {
    channel: Arc<dyn EnforcementChannel>,
    state: watch::Sender<EditModeState>,
    attached: AtomicBool,
    write_lock: Mutex<()>,
}

impl Shared {
    fn check_attached(&self) -> Result<()> {
        let attached = self.channel.is_attached();
        self.attached.store(attached, Ordering::SeqCst);
        if attached {
            Ok(())
        } else {
            Err(GodModeError::BridgeUnavailable)
        }
    }

    fn pull(&self) -> Result<EditModeState> {
        let _guard = self.write_lock.lock();
        self.check_attached()?;
        let current = self.channel.read_state()?;
        self.state.send_replace(current.clone());
        Ok(current)
    }

    fn update(&self, apply: impl FnOnce(&mut EditModeState)) -> Result<EditModeState> {
        let _guard = self.write_lock.lock();
        self.check_attached()?;

        // Start from the agent's copy; the cache may predate the last attach.
        let mut next = self.channel.read_state()?;
        apply(&mut next);
        self.channel.publish(&next)?;
        self.state.send_replace(next.clone());
        Ok(next)
    }
}

/// Sole writer of the edit-mode flag.
///
/// Readers get the last value read from or accepted by the channel. Whether
/// the agent has already acted on it is not observable from here. Channel I/O
/// runs on the blocking pool.
pub struct EditModeBridge {
    shared: Arc<Shared>,
}

impl EditModeBridge {
    /// Builds a bridge without touching the channel. Call
    /// [`refresh`](Self::refresh) to pick up the agent's current state.
    pub fn new(channel: Arc<dyn EnforcementChannel>) -> Self {
        let (state, _) = watch::channel(EditModeState::default());
        Self {
            shared: Arc::new(Shared {
                channel,
                state,
                attached: AtomicBool::new(false),
                write_lock: Mutex::new(()),
            }),
        }
    }

    pub fn from_config(config: &BridgeConfig, paths: &DataPaths) -> Self {
        let channel: Arc<dyn EnforcementChannel> = match config.channel {
            ChannelKind::SharedFile => Arc::new(SharedFileChannel::new(
                &paths.shared_dir,
                &config.state_file,
                &config.attach_marker,
            )),
            ChannelKind::Detached => Arc::new(DetachedChannel),
        };
        Self::new(channel)
    }

    /// Whether the agent was attached at the last refresh or toggle.
    pub fn is_available(&self) -> bool {
        self.shared.attached.load(Ordering::SeqCst)
    }

    pub fn is_editing(&self) -> bool {
        self.shared.state.borrow().editing
    }

    pub fn is_editing_for(&self, package: &str) -> bool {
        self.shared.state.borrow().is_editing_for(package)
    }

    pub fn state(&self) -> EditModeState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EditModeState> {
        self.shared.state.subscribe()
    }

    /// Re-reads attachment and state from the agent.
    pub async fn refresh(&self) -> Result<EditModeState> {
        let state = self.blocking(|shared| shared.pull()).await?;
        debug!(editing = state.editing, "Edit-mode state refreshed");
        Ok(state)
    }

    pub async fn set_editing(&self, editing: bool) -> Result<()> {
        self.blocking(move |shared| shared.update(|state| state.editing = editing))
            .await?;
        info!(editing, "Edit mode changed");
        Ok(())
    }

    /// Sets or clears (`None`) the override for one package.
    pub async fn set_app_editing(&self, package: &str, editing: Option<bool>) -> Result<()> {
        let owned = package.to_string();
        self.blocking(move |shared| {
            shared.update(|state| match editing {
                Some(value) => {
                    state.app_overrides.insert(owned, value);
                }
                None => {
                    state.app_overrides.remove(&owned);
                }
            })
        })
        .await?;
        info!(package, ?editing, "App edit mode changed");
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Shared) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || f(shared.as_ref()))
            .await
            .map_err(|e| GodModeError::Other(format!("Edit-mode task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::InProcessChannel;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_editing_reflects_last_accepted_value() {
        let channel = Arc::new(InProcessChannel::new());
        let bridge = EditModeBridge::new(channel.clone());

        bridge.set_editing(true).await.unwrap();
        assert!(bridge.is_editing());

        channel.detach();
        assert!(matches!(
            bridge.set_editing(false).await,
            Err(GodModeError::BridgeUnavailable)
        ));
        assert!(bridge.is_editing());
        assert!(!bridge.is_available());

        channel.attach();
        bridge.set_editing(false).await.unwrap();
        assert!(!bridge.is_editing());
        assert!(!channel.agent_view().editing);
    }

    #[tokio::test]
    async fn test_detached_bridge_reports_unavailable() {
        let bridge = EditModeBridge::new(Arc::new(DetachedChannel));
        assert!(matches!(
            bridge.refresh().await,
            Err(GodModeError::BridgeUnavailable)
        ));
        assert!(!bridge.is_available());
        assert!(!bridge.is_editing());
        assert!(matches!(
            bridge.set_editing(true).await,
            Err(GodModeError::BridgeUnavailable)
        ));
        assert!(matches!(
            bridge.set_app_editing("com.a", Some(true)).await,
            Err(GodModeError::BridgeUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_app_override() {
        let bridge = EditModeBridge::new(Arc::new(InProcessChannel::new()));
        bridge.set_app_editing("com.a", Some(true)).await.unwrap();
        assert!(bridge.is_editing_for("com.a"));
        assert!(!bridge.is_editing_for("com.b"));

        bridge.set_app_editing("com.a", None).await.unwrap();
        assert!(!bridge.is_editing_for("com.a"));
    }

    #[tokio::test]
    async fn test_refresh_reads_agent_state() {
        let channel = Arc::new(InProcessChannel::new());
        channel
            .publish(&EditModeState {
                editing: true,
                ..Default::default()
            })
            .unwrap();

        let bridge = EditModeBridge::new(channel);
        assert!(!bridge.is_editing());
        bridge.refresh().await.unwrap();
        assert!(bridge.is_editing());
        assert!(bridge.is_available());
    }

    #[tokio::test]
    async fn test_late_attach_keeps_agent_flag() {
        let dir = TempDir::new().unwrap();
        let channel = Arc::new(SharedFileChannel::new(
            dir.path(),
            "edit_mode.json",
            "agent.attached",
        ));
        std::fs::write(channel.state_path(), r#"{"editing":true}"#).unwrap();

        let bridge = EditModeBridge::new(channel.clone());
        assert!(bridge.refresh().await.is_err());
        assert!(!bridge.is_editing());

        std::fs::write(channel.marker_path(), b"").unwrap();
        bridge.set_app_editing("com.a", Some(true)).await.unwrap();

        let on_disk = channel.read_state().unwrap();
        assert!(on_disk.editing);
        assert_eq!(on_disk.app_overrides.get("com.a"), Some(&true));
        assert!(bridge.is_editing());
        assert!(bridge.is_available());
    }

    #[tokio::test]
    async fn test_subscribers_observe_changes() {
        let bridge = EditModeBridge::new(Arc::new(InProcessChannel::new()));
        let mut rx = bridge.subscribe();

        bridge.set_editing(true).await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().editing);
    }
}
