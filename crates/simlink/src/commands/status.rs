//! Link status handler.

use simlink_core::Correlator;

use crate::error::CliError;
use crate::output;

use super::Ctx;

pub async fn handle(correlator: &Correlator, ctx: Ctx) -> Result<(), CliError> {
    // A failed connect is reported through the state below, not as an error.
    if let Err(e) = correlator.connect().await {
        tracing::debug!(error = %e, "connect failed");
    }

    let stats = correlator.stats();
    let out = output::render_single(ctx.format, &stats, |s| {
        format!(
            "state:       {}\ngeneration:  {}\ndefinitions: {}\nevents:      {}\npending:     {}",
            s.state, s.generation, s.definitions, s.events, s.pending
        )
    })?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
