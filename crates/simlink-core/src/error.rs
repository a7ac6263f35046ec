// ── Core error types ──
//
// Callers of the correlator rarely see these: connectivity loss is folded
// into sentinel results (NaN reads, `None` writes, partial batches). They
// surface through the `try_*` variants and in logs. The
// `From<simlink_api::Error>` impl translates bridge failures into the
// taxonomy below.

use thiserror::Error;

use simlink_api::RequestId;

/// Unified error type for the core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // ── Connectivity ─────────────────────────────────────────────────
    /// No connection at all; no bridge call was attempted.
    #[error("Simulator unavailable")]
    Unavailable,

    /// The call was made but nothing came back in time.
    #[error("No response to request {request} after {timeout_ms}ms")]
    Timeout { request: RequestId, timeout_ms: u64 },

    /// A bridge call raised a low-level error. Always followed by a full reset.
    #[error("Bridge transport failure: {reason}")]
    TransportFailure { reason: String },

    /// The connection dropped while the request was outstanding.
    #[error("Request {request} cancelled: connection lost")]
    Cancelled { request: RequestId },

    // ── Bridge responses ─────────────────────────────────────────────
    /// The bridge rejected the request with an exception callback.
    #[error("Request {request} rejected by simulator (exception {code})")]
    Rejected { request: RequestId, code: u32 },

    // ── Defects ──────────────────────────────────────────────────────
    /// Two registrations raced for the same key. Indicates a logic bug.
    #[error("Registration conflict for {key}")]
    RegistrationConflict { key: String },

    // ── Input ────────────────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

impl CoreError {
    /// Returns `true` for the ordinary "simulator isn't there" family that
    /// callers recover from with a sentinel.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Unavailable
                | Self::Timeout { .. }
                | Self::TransportFailure { .. }
                | Self::Cancelled { .. }
        )
    }
}

// ── Conversion from bridge errors ────────────────────────────────────

impl From<simlink_api::Error> for CoreError {
    fn from(err: simlink_api::Error) -> Self {
        match err {
            simlink_api::Error::NotRunning => CoreError::Unavailable,
            other => CoreError::TransportFailure {
                reason: other.to_string(),
            },
        }
    }
}
