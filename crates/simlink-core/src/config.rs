// ── Runtime link configuration ──
//
// These types describe *how* to talk to the bridge: timings, backoff,
// and the client name to open under. They never touch disk; the CLI
// builds a `LinkConfig` and hands it in.

use std::time::Duration;

use simlink_api::GroupId;
use tracing::warn;

/// Backoff between reconnection attempts while the simulator is away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay after the first failed attempt. Default: 2s.
    pub initial_delay: Duration,
    /// Upper bound on the delay. Default: 10s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectConfig {
    /// Exponential backoff with jitter.
    ///
    /// `delay = min(initial * 2^attempt, max) * (1 +- 0.25)`
    ///
    /// The jitter is deterministic, seeded from the attempt number, and
    /// never drops the delay below `initial_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.min(16)).unwrap_or(16);
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
        let with_jitter = (capped * jitter_factor).max(self.initial_delay.as_secs_f64());

        Duration::from_secs_f64(with_jitter)
    }
}

/// Configuration for one bridge link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Name the session is opened under.
    pub client_name: String,
    /// How often pending callbacks are pumped while connected.
    pub poll_interval: Duration,
    /// How long a read or write waits for its response.
    pub request_timeout: Duration,
    /// How long `ensure_connected` waits for a connection to come up.
    pub connect_wait: Duration,
    /// Background reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// Notification group every mapped event joins.
    pub notification_group: GroupId,
    /// Run the background reconnect monitor.
    pub monitor_enabled: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            client_name: "simlink".into(),
            poll_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(2),
            connect_wait: Duration::from_millis(500),
            reconnect: ReconnectConfig::default(),
            notification_group: GroupId(1),
            monitor_enabled: true,
        }
    }
}

impl LinkConfig {
    /// Replace timings the link cannot run with by their defaults.
    ///
    /// A zero poll interval or request timeout would stall the link (the
    /// poll timer cannot tick at zero), and a zero reconnect delay would
    /// spin the monitor. `max_delay` is raised to at least `initial_delay`.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.poll_interval.is_zero() {
            warn!("poll_interval of zero is not usable, using the default");
            self.poll_interval = defaults.poll_interval;
        }
        if self.request_timeout.is_zero() {
            warn!("request_timeout of zero is not usable, using the default");
            self.request_timeout = defaults.request_timeout;
        }
        if self.reconnect.initial_delay.is_zero() {
            warn!("reconnect initial_delay of zero is not usable, using the default");
            self.reconnect.initial_delay = defaults.reconnect.initial_delay;
        }
        self.reconnect.max_delay = self.reconnect.max_delay.max(self.reconnect.initial_delay);
        self
    }
}
