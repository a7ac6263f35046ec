// simlink-api: Bridge boundary for single-threaded simulator interop APIs

pub mod bridge;
pub mod error;
pub mod loopback;

pub use bridge::{
    BridgeEvent, BridgeSession, DefinitionId, EventId, GroupId, RequestId, SendId, SimBridge,
};
pub use error::Error;
pub use loopback::{BridgeCall, LoopbackBridge};
