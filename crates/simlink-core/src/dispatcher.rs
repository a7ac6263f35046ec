// ── Callback dispatcher ──
//
// Routes pumped bridge callbacks to their waiters. Data and exceptions
// resolve pending slots; a quit notice hands control back to the
// supervisor. Callbacks from a previous connection are dropped on arrival.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use simlink_api::BridgeEvent;

use crate::pending::{Outcome, PendingTable};
use crate::supervisor::{Callback, Supervisor};

/// What the caller must do after a callback was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Handled,
    /// The simulator is going away; tear the link down.
    Quit,
}

pub(crate) struct CallbackDispatcher {
    pending: Arc<PendingTable>,
}

impl CallbackDispatcher {
    pub(crate) fn new(pending: Arc<PendingTable>) -> Self {
        Self { pending }
    }

    pub(crate) fn dispatch(&self, event: BridgeEvent) -> Dispatch {
        match event {
            BridgeEvent::Data { request, value } => {
                if !self.pending.complete(request, Outcome::Value(value)) {
                    debug!(%request, value, "late or unknown response ignored");
                }
                Dispatch::Handled
            }
            BridgeEvent::Exception { send_id, code } => {
                match self
                    .pending
                    .complete_send(send_id, Outcome::Rejected { code })
                {
                    Some(request) => warn!(%request, %send_id, code, "request rejected by simulator"),
                    None => warn!(%send_id, code, "simulator exception for an untracked call"),
                }
                Dispatch::Handled
            }
            BridgeEvent::Opened { application } => {
                info!(%application, "simulator acknowledged connection");
                Dispatch::Handled
            }
            BridgeEvent::Quit => Dispatch::Quit,
        }
    }
}

/// Drain the callback channel until cancelled.
pub(crate) async fn dispatcher_task(
    supervisor: Arc<Supervisor>,
    dispatcher: CallbackDispatcher,
    mut rx: mpsc::UnboundedReceiver<Callback>,
    cancel: CancellationToken,
) {
    loop {
        let (generation, event) = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            callback = rx.recv() => {
                let Some(callback) = callback else { break };
                callback
            }
        };

        if generation != supervisor.generation() {
            trace!(generation, ?event, "dropping callback from a previous connection");
            continue;
        }

        if dispatcher.dispatch(event) == Dispatch::Quit {
            supervisor.teardown(Some(generation), "simulator quit").await;
        }
    }

    debug!("callback dispatcher exiting");
}
