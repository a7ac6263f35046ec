use thiserror::Error;

/// Top-level error type for the `simlink-api` crate.
///
/// Every bridge call can fail with one of these. `simlink-core` treats any
/// of them raised mid-session as "the connection can no longer be trusted".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // ── Open ────────────────────────────────────────────────────────
    /// The simulator process isn't running. Expected steady state, not a fault.
    #[error("Simulator is not running")]
    NotRunning,

    /// The bridge refused to open a session for some other reason.
    #[error("Failed to open bridge session: {reason}")]
    Open { reason: String },

    // ── Session ─────────────────────────────────────────────────────
    /// The session was closed underneath us (simulator quit, handle released).
    #[error("Bridge session closed")]
    Closed,

    /// A bridge call itself failed.
    #[error("Bridge call '{call}' failed: {reason}")]
    Call { call: &'static str, reason: String },

    /// The callback pump failed.
    #[error("Callback pump failed: {reason}")]
    Pump { reason: String },
}

impl Error {
    /// Returns `true` if the simulator simply isn't there yet.
    pub fn is_not_running(&self) -> bool {
        matches!(self, Self::NotRunning)
    }

    /// Returns `true` if a later connection attempt might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotRunning | Self::Closed | Self::Open { .. })
    }
}
