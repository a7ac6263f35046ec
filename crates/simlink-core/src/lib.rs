// simlink-core: Request correlation and connection resilience over a simulator bridge.

pub mod config;
pub mod correlator;
pub mod error;
pub mod model;

mod dispatcher;
mod pending;
mod registry;
mod serializer;
mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{LinkConfig, ReconnectConfig};
pub use correlator::{Correlator, LinkStats};
pub use error::CoreError;
pub use model::{EventRef, VariableKey, VariableRef};
pub use supervisor::{ConnectionState, LinkEvent};

// Bridge types consumers need without depending on simlink-api directly.
pub use simlink_api::{DefinitionId, EventId, GroupId, RequestId, SimBridge};
