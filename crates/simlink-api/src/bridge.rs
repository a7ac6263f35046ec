//! The simulator bridge contract.
//!
//! A bridge is single-threaded and callback-driven: calls are fire-and-forget,
//! and their answers arrive later as [`BridgeEvent`]s when the owner pumps
//! the session. Nothing here is safe to call concurrently, which is why
//! [`BridgeSession`] methods take `&mut self`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── Identifiers ──────────────────────────────────────────────────────

macro_rules! bridge_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }
    };
}

bridge_id!(
    /// Identifies a registered `(name, unit)` data definition.
    DefinitionId
);
bridge_id!(
    /// Identifies one in-flight data request.
    RequestId
);
bridge_id!(
    /// Identifies a client event mapped to a simulator event name.
    EventId
);
bridge_id!(
    /// Identifies a notification group events are added to.
    GroupId
);
bridge_id!(
    /// Packet id the bridge assigns to each outgoing call; exceptions refer to it.
    SendId
);

// ── Callbacks ────────────────────────────────────────────────────────

/// A callback delivered by [`BridgeSession::pump`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// The simulator acknowledged the session.
    Opened { application: String },
    /// The simulator is shutting down; the session is dead.
    Quit,
    /// A previously sent call was rejected.
    Exception { send_id: SendId, code: u32 },
    /// Data for a `request_once` call.
    Data { request: RequestId, value: f64 },
}

// ── Traits ───────────────────────────────────────────────────────────

/// Factory for bridge sessions.
///
/// Opening is the only operation that can happen while no session exists.
pub trait SimBridge: Send + Sync + 'static {
    /// Open a session under the given client name.
    ///
    /// Returns [`Error::NotRunning`] when the simulator isn't up.
    fn open(&self, client_name: &str) -> Result<Box<dyn BridgeSession>, Error>;
}

/// A live connection to the simulator.
///
/// Dropping the session releases the underlying handle.
pub trait BridgeSession: Send {
    /// Register a variable under `definition`.
    fn add_definition(
        &mut self,
        definition: DefinitionId,
        name: &str,
        unit: &str,
    ) -> Result<SendId, Error>;

    /// Ask for the current value of `definition` once, tagged with `request`.
    fn request_once(
        &mut self,
        request: RequestId,
        definition: DefinitionId,
    ) -> Result<SendId, Error>;

    /// Write a value to `definition`.
    fn set_data(&mut self, definition: DefinitionId, value: f64) -> Result<SendId, Error>;

    /// Map a client event id to a simulator event name.
    fn map_event_to_name(&mut self, event: EventId, name: &str) -> Result<SendId, Error>;

    /// Add a mapped event to a notification group.
    fn add_event_to_group(&mut self, group: GroupId, event: EventId) -> Result<SendId, Error>;

    /// Fire an event with a payload.
    fn transmit_event(
        &mut self,
        event: EventId,
        value: u32,
        group: GroupId,
    ) -> Result<SendId, Error>;

    /// Deliver every callback queued since the last pump.
    fn pump(&mut self) -> Result<Vec<BridgeEvent>, Error>;
}
