//! Variable read/write handlers.

use std::time::Duration;

use tokio::time::MissedTickBehavior;

use simlink_core::{Correlator, VariableRef};

use crate::cli::{GetArgs, SetArgs, WatchArgs};
use crate::config::parse_assignment;
use crate::error::CliError;
use crate::output::{self, Reading};

use super::{Ctx, parse_specs};

pub async fn get(correlator: &Correlator, args: GetArgs, ctx: Ctx) -> Result<(), CliError> {
    let variables = parse_specs(&args.specs)?;

    // Unreadable values still print, as n/a.
    let reads = match variables.as_slice() {
        [single] => vec![correlator.get_value(single).await],
        many => read_all(correlator, many).await,
    };

    print_readings(&reads, ctx)
}

pub async fn set(correlator: &Correlator, args: SetArgs, ctx: Ctx) -> Result<(), CliError> {
    let variables = args
        .assignments
        .iter()
        .map(|raw| -> Result<VariableRef, CliError> {
            let (spec, value) = parse_assignment("assignment", raw)?;
            let variable: VariableRef = spec.parse()?;
            Ok(variable.with_value(value))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if let [single] = variables.as_slice() {
        let written = correlator.try_set_value(single).await?;
        return print_readings(&[written], ctx);
    }

    let written = correlator.set_multiple(&variables).await;
    print_readings(&written, ctx)?;

    if written.len() < variables.len() {
        let failed: Vec<&str> = variables
            .iter()
            .filter(|v| !written.iter().any(|w| w.key() == v.key()))
            .map(VariableRef::output_name)
            .collect();
        return Err(CliError::WritesUnconfirmed {
            failed: failed.len(),
            total: variables.len(),
            names: failed.join(", "),
        });
    }
    Ok(())
}

pub async fn watch(correlator: &Correlator, args: WatchArgs, ctx: Ctx) -> Result<(), CliError> {
    let variables = parse_specs(&args.specs)?;
    if args.interval_ms == 0 {
        return Err(CliError::Validation {
            field: "interval-ms".into(),
            reason: "must be greater than zero".into(),
        });
    }

    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rounds = 0u32;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = interval.tick() => {
                let reads = read_all(correlator, &variables).await;
                print_readings(&reads, ctx)?;
                rounds += 1;
                if args.count.is_some_and(|count| rounds >= count) {
                    break;
                }
            }
        }
    }

    tracing::debug!(rounds, "watch finished");
    Ok(())
}

/// Read every variable, keeping the input order and marking the ones that
/// could not be read.
async fn read_all(correlator: &Correlator, variables: &[VariableRef]) -> Vec<VariableRef> {
    let reads = correlator.get_multiple(variables).await;
    variables
        .iter()
        .map(|variable| {
            reads
                .iter()
                .find(|read| {
                    read.key() == variable.key() && read.output_name() == variable.output_name()
                })
                .cloned()
                .unwrap_or_else(|| variable.unavailable())
        })
        .collect()
}

fn print_readings(variables: &[VariableRef], ctx: Ctx) -> Result<(), CliError> {
    let readings: Vec<Reading> = variables.iter().map(Reading::from).collect();
    let out = output::render_readings(ctx.format, &readings)?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
