// ── Request correlator ──
//
// Public face of the link. Turns "read/write/fire" calls from any number
// of concurrent tasks into serialized bridge calls, matches the answers
// back to their callers, and folds connectivity trouble into sentinel
// results. The background tasks are spawned by `start()` and joined by
// `shutdown()`.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use simlink_api::{BridgeSession, DefinitionId, EventId, RequestId, SimBridge};

use crate::config::LinkConfig;
use crate::dispatcher::{CallbackDispatcher, dispatcher_task};
use crate::error::CoreError;
use crate::model::{EventRef, VariableRef};
use crate::pending::{Outcome, PendingTable};
use crate::registry::{DefinitionRegistry, EventRegistry};
use crate::serializer::{CommandSerializer, serializer_task};
use crate::supervisor::{Callback, ConnectionState, LinkEvent, Supervisor, monitor_task};

// ── LinkStats ────────────────────────────────────────────────────

/// Point-in-time view of the link's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub state: ConnectionState,
    pub generation: u64,
    pub definitions: usize,
    pub events: usize,
    pub pending: usize,
}

// ── Correlator ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<CorrelatorInner>`. Every clone talks to the
/// same bridge session, so hand clones to as many tasks as you like.
#[derive(Clone)]
pub struct Correlator {
    inner: Arc<CorrelatorInner>,
}

struct CorrelatorInner {
    config: LinkConfig,
    supervisor: Arc<Supervisor>,
    serializer: CommandSerializer,
    definitions: Arc<DefinitionRegistry>,
    events: Arc<EventRegistry>,
    pending: Arc<PendingTable>,
    callback_rx: Mutex<Option<mpsc::UnboundedReceiver<Callback>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Correlator {
    /// Create a correlator over `bridge`. Does NOT connect or spawn
    /// anything -- call [`start()`](Self::start) before issuing requests.
    ///
    /// Zero timings in `config` are replaced, see [`LinkConfig::sanitized`].
    pub fn new(bridge: impl SimBridge, config: LinkConfig) -> Self {
        let config = config.sanitized();
        let definitions = Arc::new(DefinitionRegistry::new());
        let events = Arc::new(EventRegistry::new());
        let pending = Arc::new(PendingTable::new());
        let (callback_tx, callback_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let supervisor = Arc::new(Supervisor::new(
            Arc::new(bridge),
            config.clone(),
            Arc::clone(&definitions),
            Arc::clone(&events),
            Arc::clone(&pending),
            callback_tx,
            cancel.clone(),
        ));

        Self {
            inner: Arc::new(CorrelatorInner {
                config,
                supervisor,
                serializer: CommandSerializer::new(),
                definitions,
                events,
                pending,
                callback_rx: Mutex::new(Some(callback_rx)),
                cancel,
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the serializer worker, the callback dispatcher and, if
    /// enabled, the reconnect monitor. Calling it twice is a no-op.
    pub async fn start(&self) {
        let Some(action_rx) = self.inner.serializer.take_receiver().await else {
            debug!("correlator already started");
            return;
        };
        let Some(callback_rx) = self.inner.callback_rx.lock().await.take() else {
            return;
        };

        let mut handles = self.inner.task_handles.lock().await;
        let supervisor = &self.inner.supervisor;
        let cancel = &self.inner.cancel;

        handles.push(tokio::spawn(serializer_task(
            Arc::clone(supervisor),
            action_rx,
            cancel.clone(),
        )));
        handles.push(tokio::spawn(dispatcher_task(
            Arc::clone(supervisor),
            CallbackDispatcher::new(Arc::clone(&self.inner.pending)),
            callback_rx,
            cancel.clone(),
        )));
        if self.inner.config.monitor_enabled {
            handles.push(tokio::spawn(monitor_task(
                Arc::clone(supervisor),
                cancel.clone(),
            )));
        }

        debug!(tasks = handles.len(), "correlator started");
    }

    /// Stop every background task, drop queued bridge calls, and release
    /// the bridge. The correlator stays usable only for observation.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        self.inner.supervisor.teardown(None, "shutdown").await;
        debug!("correlator shut down");
    }

    /// Start a correlator, run `f` against it, then shut it down.
    ///
    /// Meant for one-off command-line use: the reconnect monitor is
    /// disabled and connections are made on demand.
    pub async fn run<F, Fut, T>(bridge: impl SimBridge, config: LinkConfig, f: F) -> T
    where
        F: FnOnce(Correlator) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut cfg = config;
        cfg.monitor_enabled = false;

        let correlator = Correlator::new(bridge, cfg);
        correlator.start().await;
        let result = f(correlator.clone()).await;
        correlator.shutdown().await;
        result
    }

    // ── Connection ───────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.inner.supervisor.is_connected()
    }

    /// Current connection generation. Zero until the first connection.
    pub fn generation(&self) -> u64 {
        self.inner.supervisor.generation()
    }

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.supervisor.subscribe_state()
    }

    /// Subscribe to connect/disconnect notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.supervisor.subscribe()
    }

    /// Open the bridge now instead of waiting for the monitor.
    ///
    /// Waits out a connect or disconnect already in progress. `Ok` means
    /// the link is up.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.inner.supervisor.connect().await
    }

    /// Drop the connection and cancel everything in flight. Returns
    /// `false` if there was nothing to disconnect.
    pub async fn disconnect(&self) -> bool {
        self.inner
            .supervisor
            .teardown(None, "disconnect requested")
            .await
    }

    /// Definition id currently assigned to `variable`, if any.
    pub fn definition_id(&self, variable: &VariableRef) -> Option<DefinitionId> {
        self.inner.definitions.get(&variable.key())
    }

    /// Client event id currently assigned to `event`, if any.
    pub fn event_id(&self, event: &EventRef) -> Option<EventId> {
        self.inner.events.get(&event.name().to_owned())
    }

    pub fn stats(&self) -> LinkStats {
        let supervisor = &self.inner.supervisor;
        LinkStats {
            state: supervisor.state(),
            generation: supervisor.generation(),
            definitions: self.inner.definitions.len(),
            events: self.inner.events.len(),
            pending: self.inner.pending.len(),
        }
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Read one variable.
    ///
    /// Never fails: if the simulator is away, the request times out, or the
    /// link breaks mid-call, the result carries the NaN sentinel instead.
    pub async fn get_value(&self, variable: &VariableRef) -> VariableRef {
        match self.try_get_value(variable).await {
            Ok(result) => result,
            Err(e) => {
                log_failure("get_value", variable, &e);
                variable.unavailable()
            }
        }
    }

    /// Read one variable, reporting why it failed.
    pub async fn try_get_value(&self, variable: &VariableRef) -> Result<VariableRef, CoreError> {
        variable.validate()?;
        let generation = self.connected_generation().await?;
        let definition = self.define(variable, generation)?;
        let value = self.request(variable, definition, generation).await?;
        Ok(variable.with_value(value))
    }

    /// Read many variables concurrently. Failed reads are left out.
    pub async fn get_multiple(&self, variables: &[VariableRef]) -> Vec<VariableRef> {
        let results = join_all(variables.iter().map(|v| self.try_get_value(v))).await;

        variables
            .iter()
            .zip(results)
            .filter_map(|(variable, result)| match result {
                Ok(read) => Some(read),
                Err(e) => {
                    log_failure("get_multiple", variable, &e);
                    None
                }
            })
            .collect()
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Write one variable and read it back.
    ///
    /// Returns the variable carrying the value the simulator confirmed, or
    /// `None` if the write could not be confirmed.
    pub async fn set_value(&self, variable: &VariableRef) -> Option<VariableRef> {
        match self.try_set_value(variable).await {
            Ok(result) => Some(result),
            Err(e) => {
                log_failure("set_value", variable, &e);
                None
            }
        }
    }

    /// Write one variable, reporting why it failed.
    pub async fn try_set_value(&self, variable: &VariableRef) -> Result<VariableRef, CoreError> {
        variable.validate()?;
        let value = variable.value();
        if !value.is_finite() {
            return Err(CoreError::ValidationFailed {
                message: format!("cannot write non-finite value to {}", variable.key()),
            });
        }

        let generation = self.connected_generation().await?;
        let definition = self.define(variable, generation)?;
        self.submit(generation, "set_data", move |session| {
            session.set_data(definition, value).map(drop)
        })?;

        let confirmed = self.request(variable, definition, generation).await?;
        Ok(variable.with_value(confirmed))
    }

    /// Write many variables one after another, in order. Each write is
    /// confirmed before the next starts; failed writes are left out.
    pub async fn set_multiple(&self, variables: &[VariableRef]) -> Vec<VariableRef> {
        let mut written = Vec::with_capacity(variables.len());
        for variable in variables {
            match self.try_set_value(variable).await {
                Ok(result) => written.push(result),
                Err(e) => log_failure("set_multiple", variable, &e),
            }
        }
        written
    }

    // ── Events ───────────────────────────────────────────────────

    /// Fire an event. Fire-and-forget: the bridge never confirms delivery,
    /// so `true` only means the event was queued.
    pub async fn send_event(&self, event: &EventRef) -> bool {
        match self.try_send_event(event).await {
            Ok(_) => true,
            Err(e) => {
                if e.is_connectivity() {
                    debug!(event = event.name(), error = %e, "send_event skipped");
                } else {
                    warn!(event = event.name(), error = %e, "send_event failed");
                }
                false
            }
        }
    }

    /// Fire an event, returning the client event id it went out under.
    pub async fn try_send_event(&self, event: &EventRef) -> Result<EventId, CoreError> {
        event.validate()?;
        let generation = self.connected_generation().await?;
        let group = self.inner.config.notification_group;

        let name = event.name().to_owned();
        let (id, _) = self
            .inner
            .events
            .get_or_assign(name.clone(), generation, |id| {
                self.submit(generation, "map_event", move |session| {
                    session.map_event_to_name(id, &name)?;
                    session.add_event_to_group(group, id).map(drop)
                })
            })?;

        let value = event.value();
        self.submit(generation, "transmit_event", move |session| {
            session.transmit_event(id, value, group).map(drop)
        })?;
        trace!(event = event.name(), %id, value, "event queued");
        Ok(id)
    }

    /// Wait until every bridge call queued so far has been executed.
    ///
    /// Returns `false` if the link dropped first or nothing ran within the
    /// request timeout. Useful before shutting down after fire-and-forget
    /// calls such as [`send_event`](Self::send_event).
    pub async fn flush(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        let queued = self.inner.serializer.submit(self.generation(), "flush", move |_| {
            let _ = tx.send(());
            Ok(())
        });
        if !queued {
            return false;
        }
        matches!(
            tokio::time::timeout(self.inner.config.request_timeout, rx).await,
            Ok(Ok(()))
        )
    }

    // ── Internals ────────────────────────────────────────────────

    async fn connected_generation(&self) -> Result<u64, CoreError> {
        if !self.inner.supervisor.ensure_connected().await {
            return Err(CoreError::Unavailable);
        }
        Ok(self.inner.supervisor.generation())
    }

    /// Definition id for `variable`, registering it with the bridge the
    /// first time it is seen in this generation.
    fn define(&self, variable: &VariableRef, generation: u64) -> Result<DefinitionId, CoreError> {
        let (id, _) = self
            .inner
            .definitions
            .get_or_assign(variable.key(), generation, |definition| {
                let name = variable.name().to_owned();
                let unit = variable.unit().to_owned();
                debug!(%definition, variable = %variable.key(), generation, "registering definition");
                self.submit(generation, "add_definition", move |session| {
                    session.add_definition(definition, &name, &unit).map(drop)
                })
            })?;
        Ok(id)
    }

    fn submit<F>(&self, generation: u64, label: &'static str, op: F) -> Result<(), CoreError>
    where
        F: FnOnce(&mut dyn BridgeSession) -> Result<(), simlink_api::Error> + Send + 'static,
    {
        if self.inner.serializer.submit(generation, label, op) {
            Ok(())
        } else {
            Err(CoreError::Unavailable)
        }
    }

    /// Issue one "request data once" and wait for its answer.
    async fn request(
        &self,
        variable: &VariableRef,
        definition: DefinitionId,
        generation: u64,
    ) -> Result<f64, CoreError> {
        let pending = &self.inner.pending;
        let (request, rx) = pending.register(Some(variable.key()), generation);

        // A teardown between connecting and registering would never cancel us.
        if self.inner.supervisor.generation() != generation || !self.is_connected() {
            pending.abandon(request);
            return Err(CoreError::Cancelled { request });
        }

        let slots = Arc::clone(pending);
        let queued = self.submit(generation, "request_once", move |session| {
            match session.request_once(request, definition) {
                Ok(send_id) => {
                    slots.bind_send(request, send_id);
                    Ok(())
                }
                Err(e) => {
                    slots.complete(
                        request,
                        Outcome::Failed {
                            reason: e.to_string(),
                        },
                    );
                    Err(e)
                }
            }
        });
        if let Err(e) = queued {
            pending.abandon(request);
            return Err(e);
        }

        self.await_response(request, rx).await
    }

    async fn await_response(
        &self,
        request: RequestId,
        rx: oneshot::Receiver<Outcome>,
    ) -> Result<f64, CoreError> {
        let timeout = self.inner.config.request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                // Late answers must find nothing to complete.
                self.inner.pending.abandon(request);
                Err(CoreError::Timeout {
                    request,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
            Ok(Err(_) | Ok(Outcome::Cancelled)) => Err(CoreError::Cancelled { request }),
            Ok(Ok(Outcome::Value(value))) => Ok(value),
            Ok(Ok(Outcome::Rejected { code })) => Err(CoreError::Rejected { request, code }),
            Ok(Ok(Outcome::Failed { reason })) => Err(CoreError::TransportFailure { reason }),
        }
    }
}

fn log_failure(operation: &'static str, variable: &VariableRef, error: &CoreError) {
    let variable = variable.key();
    match error {
        CoreError::Unavailable => trace!(operation, %variable, "simulator unavailable"),
        e if e.is_connectivity() => debug!(operation, %variable, error = %e, "request failed"),
        e => warn!(operation, %variable, error = %e, "request failed"),
    }
}
