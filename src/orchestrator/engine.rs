use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

use super::session::{CrashReport, SessionTracker};
use super::state::OrchestratorState;
use crate::bridge::EditModeBridge;
use crate::config::{DataPaths, GodModeConfig};
use crate::error::{GodModeError, Result};
use crate::notification::{EventType, Notifier, RuleEvent};
use crate::rule::{
    AppLabelResolver, AppRules, ImportSource, MergeReport, RuleStore, TargetApp, ViewRule,
};

/// Result of a finished import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub report: MergeReport,
    pub apps: usize,
    pub rules: usize,
}

/// Completion of an import started with [`RuleOrchestrator::import_rules`].
///
/// Dropping the handle does not cancel the import.
pub struct ImportHandle {
    rx: oneshot::Receiver<Result<ImportSummary>>,
}

impl ImportHandle {
    pub async fn wait(self) -> Result<ImportSummary> {
        self.rx
            .await
            .map_err(|_| GodModeError::Other("Import task ended without a result".into()))?
    }
}

/// A presentation layer's view of the orchestrator. Dropping it detaches;
/// in-flight operations keep running and simply stop reporting here.
pub struct RuleObserver {
    snapshot: watch::Receiver<Arc<AppRules>>,
    state: watch::Receiver<OrchestratorState>,
    crash: watch::Receiver<Option<CrashReport>>,
    events: broadcast::Receiver<RuleEvent>,
}

impl RuleObserver {
    pub fn snapshot(&self) -> Arc<AppRules> {
        Arc::clone(&self.snapshot.borrow())
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    pub fn crash_report(&self) -> Option<CrashReport> {
        self.crash.borrow().clone()
    }

    /// Waits for the next published snapshot. Returns false once the
    /// orchestrator is gone.
    pub async fn changed(&mut self) -> bool {
        self.snapshot.changed().await.is_ok()
    }

    /// Waits until no operation is in flight and a load has completed.
    pub async fn settled(&mut self) -> OrchestratorState {
        let settled = self.state.wait_for(|s| s.is_settled()).await.map(|s| *s);
        settled.unwrap_or_else(|_| *self.state.borrow())
    }

    pub async fn next_event(&mut self) -> Option<RuleEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Observer lagged");
                    continue;
                }
            }
        }
    }

    pub fn try_next_event(&mut self) -> Option<RuleEvent> {
        loop {
            match self.events.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

struct OpSlot {
    state: OrchestratorState,
    last_error: Option<String>,
    /// The snapshot reflects the durable store (a load or import finished).
    loaded: bool,
}

struct Inner {
    store: RuleStore,
    bridge: Arc<EditModeBridge>,
    session: SessionTracker,
    notifier: Notifier,
    slot: Mutex<OpSlot>,
    state_tx: watch::Sender<OrchestratorState>,
    snapshot_tx: watch::Sender<Arc<AppRules>>,
    crash_tx: watch::Sender<Option<CrashReport>>,
    events: broadcast::Sender<RuleEvent>,
}

impl Inner {
    /// Claims the operation slot for `to`. `only_from` narrows which current
    /// states may start it.
    fn begin(
        &self,
        to: OrchestratorState,
        only_from: Option<OrchestratorState>,
    ) -> Result<OrchestratorState> {
        let mut slot = self.slot.lock();
        let from = slot.state;

        if from.is_busy() {
            return Err(if to == OrchestratorState::Importing {
                GodModeError::ImportBusy
            } else {
                GodModeError::Busy {
                    operation: from.to_string(),
                }
            });
        }
        if only_from.is_some_and(|required| required != from) || !from.can_transition_to(to) {
            return Err(GodModeError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
                allowed: from
                    .allowed_transitions()
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        slot.state = to;
        self.state_tx.send_replace(to);
        debug!(%from, %to, "Rule operation started");
        Ok(from)
    }

    fn finish(&self, outcome: std::result::Result<(), &GodModeError>) {
        let mut slot = self.slot.lock();
        let to = match outcome {
            Ok(()) => {
                slot.last_error = None;
                OrchestratorState::Ready
            }
            Err(e) => {
                slot.last_error = Some(e.to_string());
                OrchestratorState::Failed
            }
        };
        if !slot.state.can_transition_to(to) {
            warn!(from = %slot.state, %to, "Unexpected rule operation completion");
        }
        slot.state = to;
        self.state_tx.send_replace(to);
    }

    /// Hands the slot back in `previous` after an edit that was rejected
    /// before it touched the store.
    fn abort(&self, previous: OrchestratorState) {
        self.slot.lock().state = previous;
        self.state_tx.send_replace(previous);
    }

    /// Publishes `rules`. `durable` marks them as mirroring the store, so
    /// later mutations may start from the snapshot.
    fn publish(&self, rules: AppRules, durable: bool) -> (usize, usize) {
        let counts = (rules.len(), rules.rule_count());
        self.slot.lock().loaded = durable;
        self.snapshot_tx.send_replace(Arc::new(rules));
        counts
    }

    /// The rule set mutations start from: the published snapshot once it
    /// mirrors the store, the durable copy otherwise. A store that cannot be
    /// read fails the mutation instead of being overwritten.
    async fn current_rules(&self) -> Result<AppRules> {
        if self.slot.lock().loaded {
            return Ok((**self.snapshot_tx.borrow()).clone());
        }
        match self.store.try_load().await {
            Ok(rules) => Ok(rules),
            Err(GodModeError::StoreCorrupt(reason)) => {
                warn!(reason = %reason, "Rule store is corrupt, starting empty");
                self.store.set_aside_corrupt().await;
                Ok(AppRules::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn emit(&self, event: RuleEvent) {
        // No receivers just means nobody is watching right now.
        let _ = self.events.send(event.clone());
        self.notifier.notify(&event).await;
    }

    async fn run_load(self: Arc<Self>) {
        match self.store.try_load().await {
            Ok(rules) => {
                let (apps, count) = self.publish(rules, true);
                self.finish(Ok(()));
                info!(apps, rules = count, "Rules ready");
                self.emit(RuleEvent::new(EventType::RulesLoaded).with_counts(apps, count))
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to load rules, publishing empty set");
                // Only a corrupt file is replaced by the empty set. Anything
                // else leaves the file in place for the next mutation to re-read.
                let corrupt = matches!(e, GodModeError::StoreCorrupt(_));
                if corrupt {
                    self.store.set_aside_corrupt().await;
                }
                self.publish(AppRules::new(), corrupt);
                self.finish(Err(&e));
                self.emit(
                    RuleEvent::new(EventType::LoadFailed)
                        .with_counts(0, 0)
                        .with_message(e.to_string()),
                )
                .await;
            }
        }
    }

    async fn run_import(
        self: Arc<Self>,
        source: Box<dyn ImportSource>,
    ) -> Result<ImportSummary> {
        let result = match self.current_rules().await {
            Ok(current) => self.store.import_merge(&current, source.as_ref()).await,
            Err(e) => Err(e),
        };
        match result {
            Ok((merged, report)) => {
                let (apps, rules) = self.publish(merged, true);
                self.finish(Ok(()));
                self.emit(
                    RuleEvent::new(EventType::ImportSucceeded)
                        .with_counts(apps, rules)
                        .with_message(source.describe()),
                )
                .await;
                Ok(ImportSummary {
                    report,
                    apps,
                    rules,
                })
            }
            Err(e) => {
                warn!(error = %e, source = %source.describe(), "Import failed");
                self.finish(Err(&e));
                self.emit(RuleEvent::new(EventType::ImportFailed).with_message(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }
}

/// Owns the in-memory rule snapshot for a session and serializes every
/// background operation against the store.
pub struct RuleOrchestrator {
    inner: Arc<Inner>,
}

impl RuleOrchestrator {
    pub async fn new(config: &GodModeConfig, paths: &DataPaths) -> Result<Self> {
        let bridge = Arc::new(EditModeBridge::from_config(&config.bridge, paths));
        Self::with_bridge(config, paths, bridge).await
    }

    pub async fn with_bridge(
        config: &GodModeConfig,
        paths: &DataPaths,
        bridge: Arc<EditModeBridge>,
    ) -> Result<Self> {
        paths.ensure_dirs().await?;

        let store = RuleStore::new(paths, &config.store);
        store.init().await?;

        let session = SessionTracker::new(
            paths.session_file.clone(),
            paths.crash_trace(&config.bridge),
        );
        let crash = if config.orchestrator.detect_crashes {
            session.detect_crash().await.unwrap_or_else(|e| {
                warn!(error = %e, "Crash detection failed");
                None
            })
        } else {
            None
        };
        match bridge.refresh().await {
            Ok(_) | Err(GodModeError::BridgeUnavailable) => {}
            Err(e) => warn!(error = %e, "Failed to read edit-mode state from agent"),
        }
        if let Err(e) = session.begin(bridge.is_editing()).await {
            warn!(error = %e, "Failed to record session start");
        }

        let notifier = Notifier::new(config.notification.clone(), Some(paths.event_log()));
        let (state_tx, _) = watch::channel(OrchestratorState::Idle);
        let (snapshot_tx, _) = watch::channel(Arc::new(AppRules::new()));
        let (crash_tx, _) = watch::channel(crash.clone());
        let (events, _) = broadcast::channel(config.orchestrator.event_capacity);

        let inner = Arc::new(Inner {
            store,
            bridge,
            session,
            notifier,
            slot: Mutex::new(OpSlot {
                state: OrchestratorState::Idle,
                last_error: None,
                loaded: false,
            }),
            state_tx,
            snapshot_tx,
            crash_tx,
            events,
        });

        if let Some(report) = crash {
            inner
                .notifier
                .notify(&RuleEvent::new(EventType::CrashDetected).with_message(report.summary()))
                .await;
        }

        Ok(Self { inner })
    }

    /// Attaches an observer. The first attach of a session starts the load;
    /// later ones just see the current snapshot.
    pub fn subscribe(&self) -> RuleObserver {
        let observer = RuleObserver {
            snapshot: self.inner.snapshot_tx.subscribe(),
            state: self.inner.state_tx.subscribe(),
            crash: self.inner.crash_tx.subscribe(),
            events: self.inner.events.subscribe(),
        };
        if self
            .inner
            .begin(OrchestratorState::Loading, Some(OrchestratorState::Idle))
            .is_ok()
        {
            self.spawn_load();
        }
        observer
    }

    /// Starts a (re)load. Returns false when one is already running or another
    /// operation holds the store.
    pub fn load_rules(&self) -> bool {
        if self.inner.begin(OrchestratorState::Loading, None).is_err() {
            debug!("Load coalesced with in-flight operation");
            return false;
        }
        self.spawn_load();
        true
    }

    fn spawn_load(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_load());
    }

    /// Starts merging an external rule file. Fails immediately with
    /// `ImportBusy` while another operation runs.
    pub fn import_rules(&self, source: impl ImportSource + 'static) -> Result<ImportHandle> {
        if let Err(e) = self.inner.begin(OrchestratorState::Importing, None) {
            let _ = self.inner.events.send(
                RuleEvent::new(EventType::ImportRejected).with_message(e.to_string()),
            );
            return Err(e);
        }

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let source: Box<dyn ImportSource> = Box::new(source);
        tokio::spawn(async move {
            let result = inner.run_import(source).await;
            // The caller may have stopped waiting.
            let _ = tx.send(result);
        });

        Ok(ImportHandle { rx })
    }

    /// Applies `edit` to the current rules and persists the result. Runs on a
    /// spawned task so it completes even if the caller goes away.
    async fn update_rules<T, F>(&self, package: Option<&str>, edit: F) -> Result<T>
    where
        F: FnOnce(&mut AppRules) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let previous = self.inner.begin(OrchestratorState::Updating, None)?;

        let inner = Arc::clone(&self.inner);
        let package = package.map(str::to_string);
        let task = tokio::spawn(async move {
            let mut rules = match inner.current_rules().await {
                Ok(rules) => rules,
                Err(e) => {
                    warn!(error = %e, "Rule store unreadable, change not applied");
                    inner.finish(Err(&e));
                    return Err(e);
                }
            };
            let value = match edit(&mut rules) {
                Ok(value) => value,
                Err(e) => {
                    inner.abort(previous);
                    return Err(e);
                }
            };

            if let Err(e) = inner.store.save(&rules).await {
                warn!(error = %e, "Failed to persist rule change");
                inner.finish(Err(&e));
                return Err(e);
            }

            let (apps, count) = inner.publish(rules, true);
            inner.finish(Ok(()));
            let mut event = RuleEvent::new(EventType::RulesChanged).with_counts(apps, count);
            if let Some(package) = package {
                event = event.with_package(package);
            }
            inner.emit(event).await;
            Ok(value)
        });

        task.await
            .map_err(|e| GodModeError::Other(format!("Rule update task failed: {}", e)))?
    }

    /// Registers an app reported by the agent. Returns false if it was known.
    pub async fn record_discovered_app(&self, package: &str) -> Result<bool> {
        let owned = package.to_string();
        self.update_rules(Some(package), move |rules| Ok(rules.discover(owned)))
            .await
    }

    pub async fn save_rule(&self, package: &str, activity: &str, rule: ViewRule) -> Result<()> {
        let (pkg, act) = (package.to_string(), activity.to_string());
        self.update_rules(Some(package), move |rules| {
            rules.push_rule(pkg, act, rule);
            Ok(())
        })
        .await
    }

    pub async fn delete_rule(
        &self,
        package: &str,
        activity: &str,
        index: usize,
    ) -> Result<ViewRule> {
        let (pkg, act) = (package.to_string(), activity.to_string());
        self.update_rules(Some(package), move |rules| {
            rules.remove_rule(&pkg, &act, index)
        })
        .await
    }

    pub async fn delete_app_rules(&self, package: &str) -> Result<()> {
        let pkg = package.to_string();
        self.update_rules(Some(package), move |rules| {
            rules.remove_app(&pkg).map(|_| ())
        })
        .await
    }

    /// Drops every recorded rule. Only ever called on explicit user request.
    pub async fn reset_rules(&self) -> Result<()> {
        self.update_rules(None, |rules| {
            *rules = AppRules::new();
            Ok(())
        })
        .await
    }

    pub fn snapshot(&self) -> Arc<AppRules> {
        Arc::clone(&self.inner.snapshot_tx.borrow())
    }

    pub fn state(&self) -> OrchestratorState {
        self.inner.slot.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.slot.lock().last_error.clone()
    }

    pub fn crash_report(&self) -> Option<CrashReport> {
        self.inner.crash_tx.borrow().clone()
    }

    /// Clears the crash report once the user has seen it.
    pub fn dismiss_crash_report(&self) {
        self.inner.crash_tx.send_replace(None);
    }

    pub fn target_apps(&self, resolver: &dyn AppLabelResolver) -> Vec<TargetApp> {
        TargetApp::list(&self.snapshot(), resolver)
    }

    pub fn bridge(&self) -> &EditModeBridge {
        &self.inner.bridge
    }

    pub fn is_editing(&self) -> bool {
        self.inner.bridge.is_editing()
    }

    /// Flips the global edit flag. A detached agent is reported, not ignored.
    pub async fn set_editing(&self, editing: bool) -> Result<()> {
        self.inner.bridge.set_editing(editing).await?;
        if let Err(e) = self.inner.session.record_editing(editing).await {
            warn!(error = %e, "Failed to record edit mode in session");
        }
        self.inner
            .emit(
                RuleEvent::new(EventType::EditModeChanged)
                    .with_message(if editing { "on" } else { "off" }),
            )
            .await;
        Ok(())
    }

    pub async fn set_app_editing(&self, package: &str, editing: Option<bool>) -> Result<()> {
        self.inner.bridge.set_app_editing(package, editing).await?;
        let label = match editing {
            Some(true) => "on",
            Some(false) => "off",
            None => "inherit",
        };
        self.inner
            .emit(
                RuleEvent::new(EventType::EditModeChanged)
                    .with_package(package)
                    .with_message(label),
            )
            .await;
        Ok(())
    }

    /// Marks the session as cleanly ended.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.session.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::InProcessChannel;
    use crate::rule::BytesSource;
    use tempfile::TempDir;

    async fn orchestrator(dir: &TempDir) -> RuleOrchestrator {
        let config = GodModeConfig::default();
        let paths = DataPaths::new(dir.path().to_path_buf(), &config);
        let bridge = Arc::new(EditModeBridge::new(Arc::new(InProcessChannel::new())));
        RuleOrchestrator::with_bridge(&config, &paths, bridge)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_subscribe_loads() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;
        assert_eq!(orch.state(), OrchestratorState::Idle);

        let mut observer = orch.subscribe();
        assert_eq!(observer.settled().await, OrchestratorState::Ready);
        assert!(observer.snapshot().is_empty());

        // Second observer does not start another load.
        let _second = orch.subscribe();
        assert_eq!(orch.state(), OrchestratorState::Ready);
    }

    #[tokio::test]
    async fn test_load_coalesces() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;
        let _observer = orch.subscribe();
        assert!(!orch.load_rules());
    }

    #[tokio::test]
    async fn test_rejected_edit_keeps_state() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;
        let mut observer = orch.subscribe();
        observer.settled().await;

        let err = orch.delete_app_rules("com.missing").await.unwrap_err();
        assert!(matches!(err, GodModeError::AppNotFound(_)));
        assert_eq!(orch.state(), OrchestratorState::Ready);
        assert!(orch.last_error().is_none());
    }

    #[tokio::test]
    async fn test_import_from_bytes() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir).await;
        let mut observer = orch.subscribe();
        observer.settled().await;

        let payload = br#"{"com.example.app":{"MainActivity":[{"viewClass":"Button","depth":[0]}]}}"#;
        let summary = orch
            .import_rules(BytesSource::new("clipboard", payload.to_vec()))
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(summary.apps, 1);
        assert_eq!(summary.rules, 1);
        assert_eq!(summary.report.apps_added, 1);
        assert_eq!(orch.snapshot().rule_count(), 1);
        assert_eq!(orch.state(), OrchestratorState::Ready);
    }
}
