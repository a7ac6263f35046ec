//! CLI-owned configuration: TOML file, environment overrides, and
//! translation to `simlink_core::LinkConfig`.
//!
//! Core never sees these types -- it receives a pre-built `LinkConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use simlink_core::{GroupId, LinkConfig, ReconnectConfig};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;

// ── TOML config structs ──────────────────────────────────────────────

/// CLI-owned TOML configuration. Core never touches this type.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Bridge link timings.
    #[serde(default)]
    pub link: LinkSection,

    /// Values the loopback simulator starts with, by variable name.
    #[serde(default)]
    pub seeds: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub offline: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            offline: false,
        }
    }
}

fn default_output() -> String {
    "plain".into()
}

/// Link timings in milliseconds. Missing keys fall back to the core defaults.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkSection {
    pub client_name: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub connect_wait_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub notification_group: u32,
}

impl Default for LinkSection {
    fn default() -> Self {
        let link = LinkConfig::default();
        Self {
            client_name: link.client_name,
            poll_interval_ms: millis(link.poll_interval),
            request_timeout_ms: millis(link.request_timeout),
            connect_wait_ms: millis(link.connect_wait),
            reconnect_initial_ms: millis(link.reconnect.initial_delay),
            reconnect_max_ms: millis(link.reconnect.max_delay),
            notification_group: link.notification_group.0,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ── Config file path ─────────────────────────────────────────────────

/// Resolve the config file path: `--config` first, then platform conventions.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    if let Some(path) = &global.config {
        return path.clone();
    }
    ProjectDirs::from("com", "simlink", "simlink")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        })
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("simlink");
    p
}

// ── Config loading ───────────────────────────────────────────────────

/// Load the full Config from defaults, file, and `SIMLINK_` environment.
///
/// Nested keys use a double underscore: `SIMLINK_LINK__REQUEST_TIMEOUT_MS`.
pub fn load_config(path: &Path) -> Result<Config, CliError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SIMLINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Resolution ───────────────────────────────────────────────────────

/// Output format: flag > env > config file > plain.
pub fn output_format(global: &GlobalOpts, config: &Config) -> Result<OutputFormat, CliError> {
    if let Some(format) = global.output {
        return Ok(format);
    }
    OutputFormat::from_str(&config.defaults.output, true).map_err(|_| CliError::Validation {
        field: "defaults.output".into(),
        reason: format!(
            "unknown output format '{}'. Valid formats: plain, table, json, json-compact, yaml",
            config.defaults.output
        ),
    })
}

/// Translate the config file + global flags into a `LinkConfig`.
///
/// This is the single boundary where CLI config types cross into core types.
pub fn resolve_link(config: &Config, global: &GlobalOpts) -> Result<LinkConfig, CliError> {
    let link = &config.link;

    let client_name = global
        .client_name
        .clone()
        .unwrap_or_else(|| link.client_name.clone());
    if client_name.trim().is_empty() {
        return Err(CliError::Validation {
            field: "client_name".into(),
            reason: "must not be empty".into(),
        });
    }

    let poll_interval = positive_ms(
        "poll_interval_ms",
        global.poll_interval_ms.unwrap_or(link.poll_interval_ms),
    )?;
    let request_timeout = positive_ms(
        "request_timeout_ms",
        global.timeout_ms.unwrap_or(link.request_timeout_ms),
    )?;
    let connect_wait = positive_ms("connect_wait_ms", link.connect_wait_ms)?;
    let initial_delay = positive_ms("reconnect_initial_ms", link.reconnect_initial_ms)?;
    let max_delay = positive_ms("reconnect_max_ms", link.reconnect_max_ms)?;
    if max_delay < initial_delay {
        return Err(CliError::Validation {
            field: "reconnect_max_ms".into(),
            reason: "must not be below reconnect_initial_ms".into(),
        });
    }

    Ok(LinkConfig {
        client_name,
        poll_interval,
        request_timeout,
        connect_wait,
        reconnect: ReconnectConfig {
            initial_delay,
            max_delay,
        },
        notification_group: GroupId(link.notification_group),
        monitor_enabled: false,
    })
}

fn positive_ms(field: &str, value: u64) -> Result<Duration, CliError> {
    if value == 0 {
        return Err(CliError::Validation {
            field: field.into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_millis(value))
}

/// Merge file seeds with `--seed NAME=VALUE` flags; flags win.
pub fn resolve_seeds(config: &Config, global: &GlobalOpts) -> Result<BTreeMap<String, f64>, CliError> {
    let mut seeds = config.seeds.clone();
    for raw in &global.seeds {
        let (name, value) = parse_assignment("seed", raw)?;
        seeds.insert(name.trim().to_owned(), value);
    }
    Ok(seeds)
}

/// Split `LHS=VALUE` on the last `=` and parse the value as a number.
pub fn parse_assignment<'a>(field: &str, raw: &'a str) -> Result<(&'a str, f64), CliError> {
    let invalid = |reason: String| CliError::Validation {
        field: field.into(),
        reason,
    };

    let (lhs, value) = raw
        .rsplit_once('=')
        .ok_or_else(|| invalid(format!("expected NAME=VALUE, got '{raw}'")))?;
    if lhs.trim().is_empty() {
        return Err(invalid(format!("missing name in '{raw}'")));
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| invalid(format!("'{}' is not a number", value.trim())))?;
    if !value.is_finite() {
        return Err(invalid(format!("'{raw}' is not a finite number")));
    }
    Ok((lhs, value))
}
