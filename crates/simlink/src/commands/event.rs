//! Event handler.

use serde::Serialize;

use simlink_core::{Correlator, EventId, EventRef};

use crate::cli::EventArgs;
use crate::error::CliError;
use crate::output;

use super::Ctx;

#[derive(Serialize)]
struct Sent<'a> {
    event: &'a str,
    value: u32,
    id: EventId,
}

pub async fn handle(correlator: &Correlator, args: EventArgs, ctx: Ctx) -> Result<(), CliError> {
    let event = EventRef::new(args.name, args.value);
    let id = correlator.try_send_event(&event).await?;
    // The transmit is queued, not executed; shutdown would discard it.
    if !correlator.flush().await {
        return Err(CliError::Transport {
            reason: format!("link dropped before {} was sent", event.name()),
        });
    }

    let sent = Sent {
        event: event.name(),
        value: event.value(),
        id,
    };
    let out = output::render_single(ctx.format, &sent, |s| {
        format!("sent {} = {} (event id {})", s.event, s.value, s.id)
    })?;
    output::print_output(&out, ctx.quiet);
    Ok(())
}
