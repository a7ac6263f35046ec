//! In-process bridge that behaves like a running simulator.
//!
//! Values live in a shared table keyed by variable name. Reads echo the
//! stored value, writes replace it, and calls against unknown ids come back
//! as exceptions on the next pump, the same way a real bridge reports them.
//! The simulator can be started, stopped, asked to quit, or told to
//! withhold responses for chosen variables, which is enough to drive every
//! connection and timeout path of `simlink-core`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::bridge::{
    BridgeEvent, BridgeSession, DefinitionId, EventId, GroupId, RequestId, SendId, SimBridge,
};
use crate::error::Error;

/// Exception code for a call that references an id the session never registered.
pub const EXCEPTION_UNRECOGNIZED_ID: u32 = 1;
/// Exception code for an event name that was mapped twice.
pub const EXCEPTION_DUPLICATE_ID: u32 = 2;

/// Most recent calls kept in the call log; older entries are dropped.
pub const CALL_LOG_LIMIT: usize = 1024;

// ── Call log ─────────────────────────────────────────────────────────

/// A call a session received. See [`LoopbackBridge::calls`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum BridgeCall {
    AddDefinition {
        definition: DefinitionId,
        name: String,
        unit: String,
    },
    RequestOnce {
        request: RequestId,
        definition: DefinitionId,
    },
    SetData {
        definition: DefinitionId,
        value: f64,
    },
    MapEventToName {
        event: EventId,
        name: String,
    },
    AddEventToGroup {
        group: GroupId,
        event: EventId,
    },
    TransmitEvent {
        event: EventId,
        value: u32,
        group: GroupId,
    },
}

// ── LoopbackBridge ───────────────────────────────────────────────────

/// Cheaply cloneable handle to a simulated simulator.
///
/// Clones share state, so a test can keep one handle to poke the simulator
/// while another is owned by the correlator.
#[derive(Clone, Default)]
pub struct LoopbackBridge {
    shared: Arc<Mutex<Shared>>,
}

#[derive(Default)]
struct Shared {
    running: bool,
    /// Bumped whenever the simulator goes away; sessions from older epochs are dead.
    epoch: u64,
    /// Whether the last shutdown was announced with a quit callback.
    graceful: bool,
    failing_calls: bool,
    values: HashMap<String, f64>,
    withheld: HashSet<String>,
    calls: VecDeque<BridgeCall>,
    opens: u64,
    open_sessions: usize,
}

impl LoopbackBridge {
    /// A simulator that is not running yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A simulator that is already up.
    pub fn running() -> Self {
        let bridge = Self::new();
        bridge.start();
        bridge
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Simulator lifecycle ──────────────────────────────────────────

    /// Bring the simulator up. Existing sessions stay dead.
    pub fn start(&self) {
        self.lock().running = true;
    }

    /// Shut the simulator down gracefully: live sessions see a quit
    /// callback on their next pump.
    pub fn quit(&self) {
        let mut shared = self.lock();
        shared.running = false;
        shared.graceful = true;
        shared.epoch += 1;
    }

    /// Kill the simulator: live sessions fail their next call.
    pub fn crash(&self) {
        let mut shared = self.lock();
        shared.running = false;
        shared.graceful = false;
        shared.epoch += 1;
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Make every subsequent session call fail with [`Error::Call`].
    pub fn fail_calls(&self, failing: bool) {
        self.lock().failing_calls = failing;
    }

    // ── Data ─────────────────────────────────────────────────────────

    /// Set a variable's value as the simulator sees it.
    pub fn seed(&self, name: &str, value: f64) {
        self.lock().values.insert(name.to_owned(), value);
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.lock().values.get(name).copied()
    }

    /// Stop answering reads of `name` until [`release`](Self::release) is called.
    pub fn withhold(&self, name: &str) {
        self.lock().withheld.insert(name.to_owned());
    }

    pub fn release(&self, name: &str) {
        self.lock().withheld.remove(name);
    }

    // ── Inspection ───────────────────────────────────────────────────

    /// The last [`CALL_LOG_LIMIT`] calls sessions received, oldest first.
    pub fn calls(&self) -> Vec<BridgeCall> {
        self.lock().calls.iter().cloned().collect()
    }

    /// Number of successful `open` calls so far.
    pub fn opens(&self) -> u64 {
        self.lock().opens
    }

    /// Number of sessions that have been opened and not yet dropped.
    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }
}

impl SimBridge for LoopbackBridge {
    fn open(&self, client_name: &str) -> Result<Box<dyn BridgeSession>, Error> {
        let mut shared = self.lock();
        if !shared.running {
            return Err(Error::NotRunning);
        }
        shared.opens += 1;
        shared.open_sessions += 1;
        tracing::debug!(client_name, epoch = shared.epoch, "loopback session opened");

        let mut queue = VecDeque::new();
        queue.push_back(BridgeEvent::Opened {
            application: "loopback".into(),
        });

        Ok(Box::new(LoopbackSession {
            bridge: self.clone(),
            epoch: shared.epoch,
            definitions: HashMap::new(),
            events: HashMap::new(),
            queue,
            next_send: 0,
            quit_delivered: false,
        }))
    }
}

// ── LoopbackSession ──────────────────────────────────────────────────

struct LoopbackSession {
    bridge: LoopbackBridge,
    epoch: u64,
    definitions: HashMap<DefinitionId, String>,
    events: HashMap<EventId, String>,
    queue: VecDeque<BridgeEvent>,
    next_send: u32,
    quit_delivered: bool,
}

impl LoopbackSession {
    /// Validate the session is alive, log the call, and hand out a send id.
    fn begin(&mut self, call: &'static str, record: BridgeCall) -> Result<SendId, Error> {
        let mut shared = self.bridge.lock();
        if shared.epoch != self.epoch || self.quit_delivered {
            return Err(Error::Closed);
        }
        if shared.failing_calls {
            return Err(Error::Call {
                call,
                reason: "injected failure".into(),
            });
        }
        if shared.calls.len() == CALL_LOG_LIMIT {
            shared.calls.pop_front();
        }
        shared.calls.push_back(record);
        drop(shared);

        self.next_send += 1;
        Ok(SendId(self.next_send))
    }

    fn reject(&mut self, send_id: SendId, code: u32) {
        self.queue.push_back(BridgeEvent::Exception { send_id, code });
    }
}

impl BridgeSession for LoopbackSession {
    fn add_definition(
        &mut self,
        definition: DefinitionId,
        name: &str,
        unit: &str,
    ) -> Result<SendId, Error> {
        let send_id = self.begin(
            "add_definition",
            BridgeCall::AddDefinition {
                definition,
                name: name.to_owned(),
                unit: unit.to_owned(),
            },
        )?;
        self.definitions.insert(definition, name.to_owned());
        Ok(send_id)
    }

    fn request_once(
        &mut self,
        request: RequestId,
        definition: DefinitionId,
    ) -> Result<SendId, Error> {
        let send_id = self.begin(
            "request_once",
            BridgeCall::RequestOnce {
                request,
                definition,
            },
        )?;

        let Some(name) = self.definitions.get(&definition).cloned() else {
            self.reject(send_id, EXCEPTION_UNRECOGNIZED_ID);
            return Ok(send_id);
        };

        let shared = self.bridge.lock();
        if !shared.withheld.contains(&name) {
            let value = shared.values.get(&name).copied().unwrap_or(0.0);
            self.queue.push_back(BridgeEvent::Data { request, value });
        }
        Ok(send_id)
    }

    fn set_data(&mut self, definition: DefinitionId, value: f64) -> Result<SendId, Error> {
        let send_id = self.begin("set_data", BridgeCall::SetData { definition, value })?;
        match self.definitions.get(&definition).cloned() {
            Some(name) => {
                self.bridge.lock().values.insert(name, value);
            }
            None => self.reject(send_id, EXCEPTION_UNRECOGNIZED_ID),
        }
        Ok(send_id)
    }

    fn map_event_to_name(&mut self, event: EventId, name: &str) -> Result<SendId, Error> {
        let send_id = self.begin(
            "map_event_to_name",
            BridgeCall::MapEventToName {
                event,
                name: name.to_owned(),
            },
        )?;
        if self.events.insert(event, name.to_owned()).is_some() {
            self.reject(send_id, EXCEPTION_DUPLICATE_ID);
        }
        Ok(send_id)
    }

    fn add_event_to_group(&mut self, group: GroupId, event: EventId) -> Result<SendId, Error> {
        let send_id = self.begin(
            "add_event_to_group",
            BridgeCall::AddEventToGroup { group, event },
        )?;
        if !self.events.contains_key(&event) {
            self.reject(send_id, EXCEPTION_UNRECOGNIZED_ID);
        }
        Ok(send_id)
    }

    fn transmit_event(
        &mut self,
        event: EventId,
        value: u32,
        group: GroupId,
    ) -> Result<SendId, Error> {
        let send_id = self.begin(
            "transmit_event",
            BridgeCall::TransmitEvent {
                event,
                value,
                group,
            },
        )?;
        if !self.events.contains_key(&event) {
            self.reject(send_id, EXCEPTION_UNRECOGNIZED_ID);
        }
        Ok(send_id)
    }

    fn pump(&mut self) -> Result<Vec<BridgeEvent>, Error> {
        if self.quit_delivered {
            return Err(Error::Closed);
        }

        let (alive, graceful) = {
            let shared = self.bridge.lock();
            (shared.epoch == self.epoch, shared.graceful)
        };

        if !alive {
            if !graceful {
                return Err(Error::Pump {
                    reason: "simulator process exited".into(),
                });
            }
            self.quit_delivered = true;
            let mut events: Vec<_> = self.queue.drain(..).collect();
            events.push(BridgeEvent::Quit);
            return Ok(events);
        }

        Ok(self.queue.drain(..).collect())
    }
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        let mut shared = self.bridge.lock();
        shared.open_sessions = shared.open_sessions.saturating_sub(1);
    }
}

// ── Tests ────────────────────────────────────────────────────────────
