//! Command dispatch: bridges CLI args -> correlator calls -> output formatting.

pub mod config_cmd;
pub mod event;
pub mod status;
pub mod values;

use simlink_core::{Correlator, VariableRef};

use crate::cli::{Command, OutputFormat};
use crate::error::CliError;

/// Per-invocation settings every handler needs.
#[derive(Debug, Clone, Copy)]
pub struct Ctx {
    pub format: OutputFormat,
    pub quiet: bool,
}

/// Dispatch a bridge-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, correlator: &Correlator, ctx: Ctx) -> Result<(), CliError> {
    match cmd {
        Command::Get(args) => values::get(correlator, args, ctx).await,
        Command::Set(args) => values::set(correlator, args, ctx).await,
        Command::Watch(args) => values::watch(correlator, args, ctx).await,
        Command::Event(args) => event::handle(correlator, args, ctx).await,
        Command::Status => status::handle(correlator, ctx).await,
        // Config and Completions never reach a bridge.
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "command does not use the bridge".into(),
        )),
    }
}

/// Parse `NAME[UNIT]|ALIAS` specs, failing on the first bad one.
pub fn parse_specs(specs: &[String]) -> Result<Vec<VariableRef>, CliError> {
    specs
        .iter()
        .map(|spec| spec.parse::<VariableRef>().map_err(CliError::from))
        .collect()
}
