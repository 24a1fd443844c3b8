//! The synchronization loop and its handle.
//!
//! One long-lived task owns the local store and runs every sync cycle. Callers
//! talk to it through an [`EngineHandle`]: triggers go into a single
//! coalescing slot, commands go over a bounded channel, and state and the
//! local view come back over `watch` channels.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{Divergence, RemoteSynchronizer, SyncOutcome};
use crate::resolver::{Collaborators, ConflictAction};
use crate::settings::{SettingsChange, SettingsWatcher, SyncSettings};
use crate::state::{
    CycleOutcome, CycleReport, EngineStatus, LocalView, LoopState, OfflineReason, SyncMode,
    SyncStats, Trigger,
};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tether_protocol::{Mutation, Snapshot};
use tether_store::{LocalStore, StoreError, StoreResult, StoredState};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

type ApplyFn = Box<dyn FnOnce(&Snapshot) -> Snapshot + Send>;

enum Command {
    Apply {
        f: ApplyFn,
        reply: oneshot::Sender<SyncResult<Arc<LocalView>>>,
    },
    SyncNow {
        required: bool,
        reply: oneshot::Sender<SyncResult<CycleReport>>,
    },
    ClearOffline {
        reply: oneshot::Sender<()>,
    },
}

/// State shared between the loop and its handles.
struct Shared {
    /// At most one waiting trigger; later triggers merge into it.
    trigger: Mutex<Option<Trigger>>,
    notify: Notify,
    status: watch::Sender<EngineStatus>,
    view: watch::Sender<Arc<LocalView>>,
    stats: RwLock<SyncStats>,
}

impl Shared {
    fn push_trigger(&self, trigger: Trigger) {
        {
            let mut slot = self.trigger.lock();
            *slot = Some(match slot.take() {
                Some(waiting) => waiting.merge(trigger),
                None => trigger,
            });
        }
        self.notify.notify_one();
    }

    fn take_trigger(&self) -> Option<Trigger> {
        self.trigger.lock().take()
    }
}

/// Entry point for starting a sync loop.
pub struct SyncEngine;

impl SyncEngine {
    /// Starts the sync loop for `store` on the current tokio runtime.
    ///
    /// The store is loaded (or initialized) before this returns, so the
    /// handle's first view already shows local data. A corrupted store is
    /// reported by the loop as soon as it starts.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<S>(
        mut store: S,
        remote: Arc<dyn RemoteSynchronizer>,
        collaborators: Collaborators,
        config: EngineConfig,
        settings: watch::Receiver<SyncSettings>,
    ) -> EngineHandle
    where
        S: LocalStore + 'static,
    {
        let (view, startup_error) = match store.load_or_init() {
            Ok(state) => (LocalView::from(&state), None),
            Err(e) => (LocalView::unavailable(), Some(e)),
        };

        let (status, _) = watch::channel(EngineStatus::idle());
        let (view, _) = watch::channel(Arc::new(view));
        let shared = Arc::new(Shared {
            trigger: Mutex::new(None),
            notify: Notify::new(),
            status,
            view,
            stats: RwLock::new(SyncStats::default()),
        });

        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let settings = SettingsWatcher::new(settings);

        if config.sync_on_start && settings.current().enabled {
            shared.push_trigger(Trigger::Timer);
        }

        let sync_loop = SyncLoop {
            store,
            remote,
            collaborators,
            config,
            settings,
            shared: Arc::clone(&shared),
            commands: command_rx,
            shutdown: shutdown_rx,
            status: EngineStatus::idle(),
            prompted_this_streak: false,
            next_deadline: None,
        };
        let task = tokio::spawn(sync_loop.run(startup_error));

        EngineHandle {
            inner: Arc::new(HandleInner {
                shared,
                commands: command_tx,
                shutdown: shutdown_tx,
                task: Mutex::new(Some(task)),
            }),
        }
    }
}

struct HandleInner {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// A handle to a running sync loop.
///
/// Handles are cheap to clone. The loop stops when [`EngineHandle::shutdown`]
/// is called or when the last handle is dropped.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<HandleInner>,
}

impl EngineHandle {
    /// Asks for a sync cycle. Triggers that arrive while a cycle is running
    /// are merged into a single follow-up cycle.
    pub fn trigger(&self, trigger: Trigger) {
        self.inner.shared.push_trigger(trigger);
    }

    /// Runs a sync cycle and waits for its result.
    ///
    /// A waiting trigger is folded into this cycle. With `required` set, a
    /// failure streak that reaches the retry limit goes offline until
    /// cleared.
    ///
    /// # Errors
    ///
    /// Returns `Disabled` if sync is disabled, `OfflineHard` if the engine
    /// needs [`EngineHandle::clear_offline`] first, or `EngineStopped` if the
    /// loop is gone.
    pub async fn sync_now(&self, required: bool) -> SyncResult<CycleReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SyncNow { required, reply }).await?;
        rx.await.map_err(|_| SyncError::EngineStopped)?
    }

    /// Applies a local change.
    ///
    /// `f` receives the effective snapshot and returns the new one, which is
    /// persisted as the pending mutation. It reaches the remote on the next
    /// cycle. Changes queue behind a cycle that is already running.
    pub async fn apply<F>(&self, f: F) -> SyncResult<Arc<LocalView>>
    where
        F: FnOnce(&Snapshot) -> Snapshot + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Apply {
            f: Box::new(f),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SyncError::EngineStopped)?
    }

    /// Leaves offline mode and runs a cycle.
    pub async fn clear_offline(&self) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ClearOffline { reply }).await?;
        rx.await.map_err(|_| SyncError::EngineStopped)
    }

    /// Returns the current local view.
    pub fn view(&self) -> Arc<LocalView> {
        self.inner.shared.view.borrow().clone()
    }

    /// Subscribes to local view updates.
    pub fn subscribe_view(&self) -> watch::Receiver<Arc<LocalView>> {
        self.inner.shared.view.subscribe()
    }

    /// Returns the current loop state.
    pub fn state(&self) -> LoopState {
        self.inner.shared.status.borrow().state
    }

    /// Returns the current sync mode.
    pub fn mode(&self) -> SyncMode {
        self.inner.shared.status.borrow().mode.clone()
    }

    /// Returns state and mode together.
    pub fn status(&self) -> EngineStatus {
        self.inner.shared.status.borrow().clone()
    }

    /// Subscribes to state and mode updates.
    pub fn subscribe_state(&self) -> watch::Receiver<EngineStatus> {
        self.inner.shared.status.subscribe()
    }

    /// Returns a copy of the sync statistics.
    pub fn stats(&self) -> SyncStats {
        self.inner.shared.stats.read().clone()
    }

    /// Returns true while the loop task is alive.
    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Stops the loop and waits for it to finish. An in-flight remote call
    /// or prompt is abandoned; the store keeps its last committed state.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "sync loop task failed");
            }
        }
    }

    async fn send(&self, command: Command) -> SyncResult<()> {
        self.inner
            .commands
            .send(command)
            .await
            .map_err(|_| SyncError::EngineStopped)
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("status", &*self.inner.shared.status.borrow())
            .finish_non_exhaustive()
    }
}

struct SyncLoop<S> {
    store: S,
    remote: Arc<dyn RemoteSynchronizer>,
    collaborators: Collaborators,
    config: EngineConfig,
    settings: SettingsWatcher,
    shared: Arc<Shared>,
    commands: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
    status: EngineStatus,
    /// The offline prompter has been consulted in the current failure streak.
    prompted_this_streak: bool,
    next_deadline: Option<Instant>,
}

impl<S: LocalStore> SyncLoop<S> {
    async fn run(mut self, startup_error: Option<StoreError>) {
        info!(enabled = self.settings.current().enabled, "sync loop started");
        self.remote
            .configure_proxy(self.settings.current().effective_proxy());
        match startup_error {
            Some(e) => {
                self.store_failed(&e);
            }
            None => self.schedule_interval(),
        }

        loop {
            let stopping = *self.shutdown.borrow();
            if stopping {
                break;
            }
            // Settings first, so commands and triggers see the latest values.
            if let Some(change) = self.settings.poll_change() {
                self.apply_settings(change);
                continue;
            }
            if let Some(trigger) = self.shared.take_trigger() {
                self.on_trigger(trigger).await;
                continue;
            }

            let deadline = self.next_deadline;
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                change = self.settings.changed() => self.apply_settings(change),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = self.shared.notify.notified() => {}
                _ = deadline_elapsed(deadline) => {
                    self.next_deadline = None;
                    self.shared.push_trigger(Trigger::Timer);
                }
            }
        }

        info!("sync loop stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Apply { f, reply } => {
                let result = self.apply(f);
                let _ = reply.send(result);
            }
            Command::SyncNow { required, reply } => {
                let mut trigger = Trigger::Manual { required };
                if let Some(waiting) = self.shared.take_trigger() {
                    trigger = waiting.merge(trigger);
                }
                let result = match self.blocked() {
                    Some(e) => Err(e),
                    None => Ok(self.run_cycle(trigger).await),
                };
                let _ = reply.send(result);
            }
            Command::ClearOffline { reply } => {
                self.clear_offline();
                let _ = reply.send(());
            }
        }
    }

    /// Returns why a cycle may not start now.
    fn blocked(&self) -> Option<SyncError> {
        if !self.settings.current().enabled {
            return Some(SyncError::Disabled);
        }
        if self.status.state == LoopState::OfflineHard {
            let reason = match &self.status.mode {
                SyncMode::Offline(reason) => reason.to_string(),
                SyncMode::Online => "offline".to_string(),
            };
            return Some(SyncError::OfflineHard(reason));
        }
        None
    }

    async fn on_trigger(&mut self, trigger: Trigger) {
        if let Some(reason) = self.blocked() {
            debug!(?trigger, %reason, "trigger ignored");
            return;
        }
        let report = self.run_cycle(trigger).await;
        debug!(?trigger, outcome = ?report.outcome, "triggered cycle finished");
    }

    async fn run_cycle(&mut self, trigger: Trigger) -> CycleReport {
        let started = Instant::now();
        let previous = self.status.clone();
        debug!(?trigger, "sync cycle starting");
        self.transition(LoopState::Syncing, previous.mode.clone());

        let outcome = self.sync_once(trigger).await;
        if outcome == CycleOutcome::Cancelled {
            debug!("sync cycle cancelled by shutdown");
            self.transition(previous.state, previous.mode);
        }

        CycleReport {
            outcome,
            duration: started.elapsed(),
        }
    }

    async fn sync_once(&mut self, trigger: Trigger) -> CycleOutcome {
        let state = match self.store.load_or_init() {
            Ok(state) => state,
            Err(e) => return self.store_failed(&e),
        };

        let remote = Arc::clone(&self.remote);
        let call = tokio::time::timeout(
            self.config.timeout,
            remote.reconcile(&state.commit_ref, state.pending.as_ref()),
        );
        let outcome = match until_shutdown(&mut self.shutdown, call).await {
            None => return CycleOutcome::Cancelled,
            Some(Ok(outcome)) => outcome,
            Some(Err(_elapsed)) => SyncOutcome::Unreachable(SyncError::Timeout),
        };
        debug!(commit_ref = %state.commit_ref, outcome = outcome.name(), "reconcile finished");

        match outcome {
            SyncOutcome::NoChange => {
                self.succeeded(&state);
                CycleOutcome::NoChange
            }
            SyncOutcome::FastForwarded {
                snapshot,
                commit_ref,
            } => {
                let next = StoredState::new(snapshot, commit_ref.clone());
                if let Err(e) = self.store.save(&next) {
                    return self.store_failed(&e);
                }
                info!(commit_ref = %commit_ref, "fast-forwarded");
                self.shared.stats.write().fast_forwards += 1;
                self.succeeded(&next);
                CycleOutcome::FastForwarded { commit_ref }
            }
            SyncOutcome::Diverged(mut divergence) => {
                divergence.local_snapshot = state.effective_snapshot().clone();
                self.resolve(divergence, trigger).await
            }
            SyncOutcome::Unreachable(e) => self.unreachable(e, trigger).await,
            SyncOutcome::Corrupted(e) => self.store_failed(&e),
        }
    }

    async fn resolve(&mut self, divergence: Divergence, trigger: Trigger) -> CycleOutcome {
        self.shared.stats.write().conflicts += 1;
        info!(
            commit_ref = %divergence.local_ref,
            remote_ref = %divergence.remote_ref,
            "divergence detected"
        );
        let mode = self.status.mode.clone();
        self.transition(LoopState::ConflictPending, mode);

        let resolver = self.collaborators.resolver.clone();
        let action = match until_shutdown(&mut self.shutdown, resolver.resolve(&divergence)).await {
            Some(action) => action,
            None => return CycleOutcome::Cancelled,
        };

        match action {
            ConflictAction::AcceptServer => {
                let next = StoredState::new(divergence.remote_snapshot, divergence.remote_ref.clone());
                if let Err(e) = self.store.save(&next) {
                    return self.store_failed(&e);
                }
                info!(commit_ref = %divergence.remote_ref, "conflict resolved with remote state");
                self.succeeded(&next);
                CycleOutcome::Resolved {
                    action,
                    commit_ref: divergence.remote_ref,
                }
            }
            ConflictAction::AcceptClient => {
                let remote = Arc::clone(&self.remote);
                let call = tokio::time::timeout(
                    self.config.timeout,
                    remote.overwrite(&divergence.local_snapshot, &divergence.remote_ref),
                );
                let head = match until_shutdown(&mut self.shutdown, call).await {
                    None => return CycleOutcome::Cancelled,
                    Some(Err(_elapsed)) => return self.unreachable(SyncError::Timeout, trigger).await,
                    Some(Ok(Err(e))) => return self.unreachable(e, trigger).await,
                    Some(Ok(Ok(head))) => head,
                };
                let next = StoredState::new(divergence.local_snapshot, head.clone());
                if let Err(e) = self.store.save(&next) {
                    return self.store_failed(&e);
                }
                info!(commit_ref = %head, "conflict resolved with local state");
                self.succeeded(&next);
                CycleOutcome::Resolved {
                    action,
                    commit_ref: head,
                }
            }
            ConflictAction::StayOffline => {
                self.shared.stats.write().conflicts_deferred += 1;
                warn!(
                    remote_ref = %divergence.remote_ref,
                    reason = "conflict deferred",
                    "staying offline"
                );
                self.schedule_interval();
                self.transition(
                    LoopState::OfflineSoft,
                    SyncMode::Offline(OfflineReason::ConflictDeferred),
                );
                CycleOutcome::Deferred
            }
        }
    }

    async fn unreachable(&mut self, error: SyncError, trigger: Trigger) -> CycleOutcome {
        let message = error.to_string();
        let failures = {
            let mut stats = self.shared.stats.write();
            stats.failures += 1;
            stats.consecutive_failures = stats.consecutive_failures.saturating_add(1);
            stats.last_error = Some(message.clone());
            stats.consecutive_failures
        };
        if error.is_protocol() {
            warn!(kind = "protocol", failures, error = %error, "remote sent an invalid response");
        } else {
            warn!(failures, error = %error, "remote unreachable");
        }

        let mut hard = None;
        let required = trigger.is_required();
        if failures >= self.config.retry.max_attempts && (required || !self.prompted_this_streak) {
            self.prompted_this_streak = true;
            let offline = Arc::clone(&self.collaborators.offline);
            let keep_working =
                match until_shutdown(&mut self.shutdown, offline.prompt_offline(&error, !required))
                    .await
                {
                    Some(answer) => answer,
                    None => return CycleOutcome::Cancelled,
                };
            if required {
                hard = Some(OfflineReason::Unreachable(message.clone()));
            } else if !keep_working {
                hard = Some(OfflineReason::Declined);
            }
        }

        match hard {
            Some(reason) => {
                self.next_deadline = None;
                self.transition(LoopState::OfflineHard, SyncMode::Offline(reason));
            }
            None => {
                let delay = self
                    .config
                    .retry
                    .bounded_delay(failures, self.settings.current().interval());
                if delay.is_zero() {
                    self.schedule_interval();
                } else {
                    debug!(failures, ?delay, "retry scheduled");
                    self.next_deadline = deadline_after(delay);
                }
                self.transition(
                    LoopState::OfflineSoft,
                    SyncMode::Offline(OfflineReason::Unreachable(message.clone())),
                );
            }
        }

        CycleOutcome::Unreachable { message }
    }

    fn store_failed(&mut self, error: &StoreError) -> CycleOutcome {
        let message = error.to_string();
        self.shared.stats.write().last_error = Some(message.clone());

        if error.is_corruption() {
            self.shared.stats.write().corruptions += 1;
            error!(error = %error, "local store corrupted, sync stopped");
            self.collaborators.corruption.notify_corrupted(error);
            self.next_deadline = None;
            self.transition(
                LoopState::OfflineHard,
                SyncMode::Offline(OfflineReason::Corrupted(message.clone())),
            );
            CycleOutcome::Corrupted { message }
        } else {
            warn!(error = %error, "local store unavailable");
            self.refresh_view();
            self.schedule_interval();
            self.transition(
                LoopState::OfflineSoft,
                SyncMode::Offline(OfflineReason::StoreUnavailable(message.clone())),
            );
            CycleOutcome::StoreFailed { message }
        }
    }

    fn succeeded(&mut self, state: &StoredState) {
        {
            let mut stats = self.shared.stats.write();
            stats.cycles_completed += 1;
            stats.consecutive_failures = 0;
            stats.last_sync_time = Some(std::time::Instant::now());
        }
        self.prompted_this_streak = false;
        self.publish_view(state);
        self.schedule_interval();
        self.transition(LoopState::Idle, SyncMode::Online);
    }

    fn apply(&mut self, f: ApplyFn) -> SyncResult<Arc<LocalView>> {
        match self.record_mutation(f) {
            Ok(state) => {
                debug!(
                    commit_ref = %state.commit_ref,
                    pending = ?state.pending.as_ref().map(|m| m.id),
                    "local mutation recorded"
                );
                Ok(self.publish_view(&state))
            }
            Err(e) => {
                if e.is_corruption() {
                    self.store_failed(&e);
                } else {
                    warn!(error = %e, "failed to record local mutation");
                    self.refresh_view();
                }
                Err(e.into())
            }
        }
    }

    fn record_mutation(&mut self, f: ApplyFn) -> StoreResult<StoredState> {
        let mut state = self.store.load_or_init()?;
        let snapshot = f(state.effective_snapshot());
        state.pending = Some(Mutation::new(snapshot));
        self.store.save(&state)?;
        Ok(state)
    }

    fn clear_offline(&mut self) {
        if self.status.mode.is_online() && !self.status.state.is_offline() {
            return;
        }
        info!("offline mode cleared");
        self.prompted_this_streak = false;
        self.shared.stats.write().consecutive_failures = 0;
        self.transition(LoopState::Idle, SyncMode::Online);
        self.shared.push_trigger(Trigger::Manual { required: false });
    }

    fn apply_settings(&mut self, change: SettingsChange) {
        let settings = self.settings.current().clone();
        debug!(?change, "settings changed");

        if change.proxy_changed {
            info!(
                proxy = ?settings.effective_proxy().map(|p| p.url.as_str()),
                "sync proxy changed"
            );
            self.remote.configure_proxy(settings.effective_proxy());
        }

        if change.disabled {
            info!("sync disabled");
            self.next_deadline = None;
            self.shared.take_trigger();
        } else if change.re_enabled {
            info!("sync enabled");
            if self.status.state != LoopState::OfflineHard {
                self.schedule_interval();
            }
            self.shared.push_trigger(Trigger::SettingsChanged);
        } else if change.interval_changed && self.status.state != LoopState::OfflineHard {
            self.schedule_interval();
        }
    }

    fn schedule_interval(&mut self) {
        let settings = self.settings.current();
        self.next_deadline = if settings.enabled {
            settings.interval().and_then(deadline_after)
        } else {
            None
        };
    }

    /// Republishes whatever the store holds after a failed save, which may
    /// have persisted before reporting the failure.
    fn refresh_view(&self) {
        match self.store.load() {
            Ok(Some(state)) => {
                self.publish_view(&state);
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "store unreadable, keeping the published view"),
        }
    }

    fn publish_view(&self, state: &StoredState) -> Arc<LocalView> {
        let view = LocalView::from(state);
        self.shared.view.send_if_modified(|current| {
            if **current == view {
                false
            } else {
                *current = Arc::new(view.clone());
                true
            }
        });
        self.shared.view.borrow().clone()
    }

    fn transition(&mut self, state: LoopState, mode: SyncMode) {
        if mode != self.status.mode {
            match &mode {
                SyncMode::Online => info!("sync online"),
                SyncMode::Offline(reason) => info!(%reason, ?state, "sync offline"),
            }
        }
        let next = EngineStatus { state, mode };
        if next != self.status {
            self.status = next.clone();
            self.shared.status.send_replace(next);
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        let stopping = *rx.borrow_and_update();
        if stopping || rx.changed().await.is_err() {
            return;
        }
    }
}

/// Runs `future` unless shutdown is requested first.
async fn until_shutdown<F: Future>(rx: &mut watch::Receiver<bool>, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = wait_for_shutdown(rx) => None,
        output = future => Some(output),
    }
}

/// Returns the instant `delay` from now, or `None` if it is too far away to
/// represent. A timer that far out never fires.
fn deadline_after(delay: Duration) -> Option<Instant> {
    Instant::now().checked_add(delay)
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
