//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` variants into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use simlink_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Simulator is not available")]
    #[diagnostic(
        code(simlink::unavailable),
        help(
            "Check that the simulator is running.\n\
             With the loopback bridge, drop --offline."
        )
    )]
    Unavailable,

    #[error("Bridge connection failed: {reason}")]
    #[diagnostic(
        code(simlink::transport),
        help("The link was reset. Retry the command once the simulator is stable.")
    )]
    Transport { reason: String },

    #[error("No response after {millis}ms")]
    #[diagnostic(
        code(simlink::timeout),
        help("Increase the timeout with --timeout-ms or check the simulator is responsive.")
    )]
    Timeout { millis: u64 },

    // ── Bridge responses ─────────────────────────────────────────────

    #[error("Simulator rejected the request (exception {code})")]
    #[diagnostic(
        code(simlink::rejected),
        help("Check the variable or event name and unit are known to the simulator.")
    )]
    Rejected { code: u32 },

    #[error("{failed} of {total} writes were not confirmed: {names}")]
    #[diagnostic(
        code(simlink::unconfirmed),
        help("Unconfirmed writes may still have taken effect. Read the values back to check.")
    )]
    WritesUnconfirmed {
        failed: usize,
        total: usize,
        names: String,
    },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(simlink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(simlink::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(simlink::config))]
    Config(Box<figment::Error>),

    #[error("Failed to serialize config: {0}")]
    #[diagnostic(code(simlink::config))]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(simlink::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(simlink::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML: {0}")]
    #[diagnostic(code(simlink::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unavailable | Self::Transport { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ConfigExists { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Unavailable => CliError::Unavailable,

            CoreError::Timeout { timeout_ms, .. } => CliError::Timeout { millis: timeout_ms },

            CoreError::TransportFailure { reason } => CliError::Transport { reason },

            CoreError::Cancelled { request } => CliError::Transport {
                reason: format!("connection lost while request {request} was outstanding"),
            },

            CoreError::Rejected { code, .. } => CliError::Rejected { code },

            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::RegistrationConflict { key } => {
                CliError::Internal(format!("registration conflict for {key}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors_share_exit_code() {
        assert_eq!(CliError::from(CoreError::Unavailable).exit_code(), 7);
        assert_eq!(
            CliError::from(CoreError::TransportFailure {
                reason: "pipe closed".into()
            })
            .exit_code(),
            7
        );
    }

    #[test]
    fn timeout_keeps_duration() {
        let err = CliError::from(CoreError::Timeout {
            request: simlink_core::RequestId(3),
            timeout_ms: 2000,
        });
        assert_eq!(err.exit_code(), exit_code::TIMEOUT);
        assert_eq!(err.to_string(), "No response after 2000ms");
    }

    #[test]
    fn validation_is_usage_error() {
        let err = CliError::from(CoreError::ValidationFailed {
            message: "variable name is empty".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
