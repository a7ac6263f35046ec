// ── Connection supervisor ──
//
// Owns the one bridge session. Every transition (connect, teardown) runs
// under `transition`, so registries are only ever cleared while no other
// transition is half-done, and concurrent failure signals collapse into a
// single cleanup.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use simlink_api::{BridgeEvent, BridgeSession, SimBridge};

use crate::config::LinkConfig;
use crate::error::CoreError;
use crate::pending::PendingTable;
use crate::registry::{DefinitionRegistry, EventRegistry};

const NOTIFICATION_CHANNEL_SIZE: usize = 64;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Raised once per actual connection transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    Connected { generation: u64 },
    Disconnected { generation: u64, reason: String },
}

/// A bridge callback tagged with the generation whose session produced it.
pub(crate) type Callback = (u64, BridgeEvent);

// ── Supervisor ───────────────────────────────────────────────────

pub(crate) struct Supervisor {
    bridge: Arc<dyn SimBridge>,
    config: LinkConfig,
    session: Mutex<Option<Box<dyn BridgeSession>>>,
    transition: Mutex<()>,
    state: watch::Sender<ConnectionState>,
    generation: AtomicU64,
    definitions: Arc<DefinitionRegistry>,
    events: Arc<EventRegistry>,
    pending: Arc<PendingTable>,
    callback_tx: mpsc::UnboundedSender<Callback>,
    notifications: broadcast::Sender<LinkEvent>,
    poll_cancel: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub(crate) fn new(
        bridge: Arc<dyn SimBridge>,
        config: LinkConfig,
        definitions: Arc<DefinitionRegistry>,
        events: Arc<EventRegistry>,
        pending: Arc<PendingTable>,
        callback_tx: mpsc::UnboundedSender<Callback>,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_SIZE);

        Self {
            bridge,
            config,
            session: Mutex::new(None),
            transition: Mutex::new(()),
            state,
            generation: AtomicU64::new(0),
            definitions,
            events,
            pending,
            callback_tx,
            notifications,
            poll_cancel: Mutex::new(None),
            shutdown,
        }
    }

    // ── Observation ──────────────────────────────────────────────

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current connection generation. Zero until the first connection.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.notifications.subscribe()
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Open the bridge unless a connection already exists.
    ///
    /// A transition already underway is waited out first, so `Ok` always
    /// means the link is up. A simulator that isn't running is reported as
    /// [`CoreError::Unavailable`] and logged at debug level only.
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<(), CoreError> {
        let _transition = self.transition.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(CoreError::Unavailable);
        }
        if self.state() == ConnectionState::Connected {
            trace!("already connected");
            return Ok(());
        }

        self.state.send_replace(ConnectionState::Connecting);

        let session = match self.bridge.open(&self.config.client_name) {
            Ok(session) => session,
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                debug!(error = %e, "bridge open failed");
                return Err(e.into());
            }
        };

        // Survivors from an earlier session can never be answered now.
        self.pending.cancel_all();
        self.definitions.clear();
        self.events.clear();

        let generation = {
            let mut slot = self.session.lock().await;
            *slot = Some(session);
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let poll_cancel = self.shutdown.child_token();
        *self.poll_cancel.lock().await = Some(poll_cancel.clone());
        tokio::spawn(poll_task(Arc::clone(self), generation, poll_cancel));

        self.state.send_replace(ConnectionState::Connected);
        let _ = self.notifications.send(LinkEvent::Connected { generation });
        info!(generation, client = %self.config.client_name, "connected to simulator");
        Ok(())
    }

    /// Tear the connection down and reset everything scoped to it.
    ///
    /// `expected` pins the teardown to one generation: a late failure report
    /// from an older session must not kill a newer one. Returns `true` if
    /// this call performed the transition, `false` if it was a no-op.
    pub(crate) async fn teardown(&self, expected: Option<u64>, reason: impl Into<String>) -> bool {
        let _transition = self.transition.lock().await;
        if self.state() == ConnectionState::Disconnected {
            return false;
        }
        let generation = self.generation();
        if expected.is_some_and(|g| g != generation) {
            trace!(?expected, generation, "ignoring failure from a previous connection");
            return false;
        }
        let reason = reason.into();

        if let Some(token) = self.poll_cancel.lock().await.take() {
            token.cancel();
        }
        let cancelled = self.pending.cancel_all();
        self.definitions.clear();
        self.events.clear();

        // Dropping the session releases the bridge handle.
        drop(self.session.lock().await.take());

        self.state.send_replace(ConnectionState::Disconnected);
        let _ = self.notifications.send(LinkEvent::Disconnected {
            generation,
            reason: reason.clone(),
        });
        info!(generation, cancelled, %reason, "disconnected from simulator");
        true
    }

    /// Connect on demand, waiting at most `connect_wait` for the link.
    ///
    /// The attempt runs as its own task, so a caller that gives up never
    /// leaves a transition half-done.
    pub(crate) async fn ensure_connected(self: &Arc<Self>) -> bool {
        if self.is_connected() {
            return true;
        }
        if self.shutdown.is_cancelled() {
            return false;
        }

        let supervisor = Arc::clone(self);
        let attempt = tokio::spawn(async move { supervisor.connect().await });
        match tokio::time::timeout(self.config.connect_wait, attempt).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                trace!(error = %e, "on-demand connect failed");
                false
            }
            Ok(Err(e)) => {
                debug!(error = %e, "on-demand connect task failed");
                false
            }
            Err(_) => {
                trace!("connection not ready within connect_wait");
                false
            }
        }
    }

    /// Park until connected. Returns `false` if `cancel` fires first.
    pub(crate) async fn wait_connected(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.state.subscribe();
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            result = rx.wait_for(|state| *state == ConnectionState::Connected) => result.is_ok(),
        }
    }

    // ── Session access ───────────────────────────────────────────

    /// Run `f` against the live session of `generation`.
    ///
    /// `None` if that session is gone. The generation check happens under the
    /// session lock, so `f` can never run against a newer session.
    pub(crate) async fn with_session<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut dyn BridgeSession) -> R,
    ) -> Option<R> {
        let mut slot = self.session.lock().await;
        if self.generation() != generation {
            return None;
        }
        let session = slot.as_mut()?;
        Some(f(session.as_mut()))
    }

    fn forward(&self, generation: u64, events: Vec<BridgeEvent>) {
        for event in events {
            if self.callback_tx.send((generation, event)).is_err() {
                trace!("dispatcher stopped, dropping callback");
                return;
            }
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Pump bridge callbacks every `poll_interval` for one generation.
async fn poll_task(supervisor: Arc<Supervisor>, generation: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(supervisor.config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                match supervisor.with_session(generation, |session| session.pump()).await {
                    None => break,
                    Some(Ok(events)) => supervisor.forward(generation, events),
                    Some(Err(e)) => {
                        supervisor
                            .teardown(Some(generation), format!("callback pump failed: {e}"))
                            .await;
                        break;
                    }
                }
            }
        }
    }

    trace!(generation, "poll loop exiting");
}

/// Reconnect in the background whenever the link is down.
///
/// Backs off exponentially between failed attempts and waits at least the
/// initial delay after a drop, so a flapping simulator can't spin the loop.
pub(crate) async fn monitor_task(supervisor: Arc<Supervisor>, cancel: CancellationToken) {
    let reconnect = supervisor.config.reconnect.clone();
    let mut state_rx = supervisor.subscribe_state();
    let mut attempt: u32 = 0;

    loop {
        let connected = supervisor.is_connected()
            || (supervisor.connect().await.is_ok() && supervisor.is_connected());

        let delay = if connected {
            attempt = 0;
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = state_rx.wait_for(|state| *state == ConnectionState::Disconnected) => {
                    if result.is_err() {
                        break;
                    }
                }
            }
            reconnect.backoff(0)
        } else {
            let delay = reconnect.backoff(attempt);
            attempt = attempt.saturating_add(1);
            delay
        };

        trace!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    debug!("connection monitor exiting");
}

#[cfg(test)]
pub(crate) mod testing {
    use simlink_api::LoopbackBridge;

    use super::*;

    /// A supervisor over a loopback bridge, without the correlator around it.
    pub(crate) struct Harness {
        pub(crate) supervisor: Arc<Supervisor>,
        pub(crate) pending: Arc<PendingTable>,
        pub(crate) shutdown: CancellationToken,
        _callbacks: mpsc::UnboundedReceiver<Callback>,
    }

    pub(crate) fn harness(bridge: &LoopbackBridge) -> Harness {
        let pending = Arc::new(PendingTable::new());
        let (callback_tx, callbacks) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let config = LinkConfig {
            monitor_enabled: false,
            ..LinkConfig::default()
        };

        let supervisor = Arc::new(Supervisor::new(
            Arc::new(bridge.clone()),
            config,
            Arc::new(DefinitionRegistry::new()),
            Arc::new(EventRegistry::new()),
            Arc::clone(&pending),
            callback_tx,
            shutdown.clone(),
        ));

        Harness {
            supervisor,
            pending,
            shutdown,
            _callbacks: callbacks,
        }
    }
}
