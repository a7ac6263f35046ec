//! Clap derive structures for the `simlink` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// simlink -- read, write and fire events on a simulator bridge
#[derive(Debug, Parser)]
#[command(
    name = "simlink",
    version,
    about = "Read, write and fire events on a flight simulator bridge",
    long_about = "Talks to a simulator through a single-threaded bridge session.\n\n\
        Variables are written as NAME[UNIT]|ALIAS, for example\n\
        'PLANE ALTITUDE[feet]|alt'. Unit and alias are optional.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Clone, Args)]
pub struct GlobalOpts {
    /// Config file to use instead of the platform default
    #[arg(long, env = "SIMLINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Bridge implementation to talk to
    #[arg(long, env = "SIMLINK_BRIDGE", default_value = "loopback", global = true)]
    pub bridge: BridgeKind,

    /// Seed a loopback simulator value (NAME=VALUE, repeatable)
    #[arg(long = "seed", value_name = "NAME=VALUE", global = true)]
    pub seeds: Vec<String>,

    /// Start with the simulator stopped
    #[arg(long, env = "SIMLINK_OFFLINE", global = true)]
    pub offline: bool,

    /// Client name the bridge session is opened under
    #[arg(long, env = "SIMLINK_CLIENT_NAME", global = true)]
    pub client_name: Option<String>,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "SIMLINK_TIMEOUT_MS", global = true)]
    pub timeout_ms: Option<u64>,

    /// Callback poll interval in milliseconds
    #[arg(long, env = "SIMLINK_POLL_INTERVAL_MS", global = true)]
    pub poll_interval_ms: Option<u64>,

    /// Output format
    #[arg(long, short = 'o', env = "SIMLINK_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Shared Enums ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BridgeKind {
    /// In-process simulator that echoes stored values
    Loopback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `name = value`, one per line (default)
    Plain,
    /// Pretty table
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read one or more variables
    #[command(alias = "g")]
    Get(GetArgs),

    /// Write one or more variables, in order
    #[command(alias = "s")]
    Set(SetArgs),

    /// Fire a simulator event
    #[command(alias = "e")]
    Event(EventArgs),

    /// Read variables repeatedly
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Connect and show link bookkeeping
    Status,

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Value Commands ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Variables to read (NAME[UNIT]|ALIAS)
    #[arg(required = true, value_name = "SPEC")]
    pub specs: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Assignments to write (NAME[UNIT]|ALIAS=VALUE)
    #[arg(required = true, value_name = "SPEC=VALUE")]
    pub assignments: Vec<String>,
}

#[derive(Debug, Args)]
pub struct EventArgs {
    /// Simulator event name (e.g. TOGGLE_NAV_LIGHTS)
    pub name: String,

    /// Event payload
    #[arg(default_value = "0")]
    pub value: u32,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Variables to read (NAME[UNIT]|ALIAS)
    #[arg(required = true, value_name = "SPEC")]
    pub specs: Vec<String>,

    /// Delay between reads in milliseconds
    #[arg(long, default_value = "1000")]
    pub interval_ms: u64,

    /// Stop after this many rounds (default: until interrupted)
    #[arg(long, short = 'n')]
    pub count: Option<u32>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display current resolved configuration
    Show,

    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
