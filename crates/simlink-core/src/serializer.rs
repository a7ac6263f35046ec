// ── Command serializer ──
//
// The bridge forbids concurrent calls, so every call is wrapped in a
// `BridgeAction` and pushed through one unbounded queue. A single worker
// drains it in FIFO order against whatever session is live.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use simlink_api::BridgeSession;

use crate::supervisor::Supervisor;

type BridgeOp = Box<dyn FnOnce(&mut dyn BridgeSession) -> Result<(), simlink_api::Error> + Send>;

/// One queued call against the bridge, bound to the generation it was built for.
pub(crate) struct BridgeAction {
    generation: u64,
    label: &'static str,
    op: BridgeOp,
}

/// Producer side of the queue plus the receiver, until the worker claims it.
pub(crate) struct CommandSerializer {
    tx: mpsc::UnboundedSender<BridgeAction>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<BridgeAction>>>,
}

impl CommandSerializer {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Queue `op` to run against the session of `generation`.
    ///
    /// Never blocks. Returns `false` once the worker has shut down.
    pub(crate) fn submit<F>(&self, generation: u64, label: &'static str, op: F) -> bool
    where
        F: FnOnce(&mut dyn BridgeSession) -> Result<(), simlink_api::Error> + Send + 'static,
    {
        let action = BridgeAction {
            generation,
            label,
            op: Box::new(op),
        };
        if self.tx.send(action).is_err() {
            debug!(label, "serializer stopped, dropping action");
            return false;
        }
        true
    }

    /// Hand the receiver to the worker. `None` if a worker already owns it.
    pub(crate) async fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<BridgeAction>> {
        self.rx.lock().await.take()
    }
}

// ── Worker ───────────────────────────────────────────────────────────

/// Execute queued actions one at a time until cancelled.
///
/// Waits for a live connection before each action. Actions built for an
/// older generation are dropped: their ids mean nothing to the new session.
/// On shutdown, whatever is still queued is discarded unexecuted.
pub(crate) async fn serializer_task(
    supervisor: Arc<Supervisor>,
    mut rx: mpsc::UnboundedReceiver<BridgeAction>,
    cancel: CancellationToken,
) {
    loop {
        let action = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            action = rx.recv() => {
                let Some(action) = action else { break };
                action
            }
        };

        if !supervisor.wait_connected(&cancel).await {
            break;
        }

        execute(&supervisor, action).await;
    }

    rx.close();
    let mut discarded = 0usize;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    debug!(discarded, "serializer stopped");
}

async fn execute(supervisor: &Supervisor, action: BridgeAction) {
    let BridgeAction {
        generation,
        label,
        op,
    } = action;

    let Some(result) = supervisor.with_session(generation, op).await else {
        trace!(label, generation, "dropping action from a previous connection");
        return;
    };

    if let Err(e) = result {
        warn!(label, generation, error = %e, "bridge call failed");
        supervisor
            .teardown(Some(generation), format!("{label} failed: {e}"))
            .await;
    }
}
