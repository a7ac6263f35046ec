// ── Pending request table ──
//
// One slot per in-flight request. A slot leaves the table exactly once:
// the dispatcher removes it when the response arrives, the caller removes
// it on timeout, or the supervisor removes it on disconnect. Removal is
// the completion marker, so whoever loses the race simply finds nothing
// to complete.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use simlink_api::{RequestId, SendId};

use crate::model::VariableKey;

/// How a pending request ended, as seen by the waiting caller.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    /// The bridge answered with a value.
    Value(f64),
    /// The bridge rejected the call with an exception callback.
    Rejected { code: u32 },
    /// The bridge call itself failed; the link is being torn down.
    Failed { reason: String },
    /// The connection went away while the request was outstanding.
    Cancelled,
}

struct Slot {
    owner: Option<VariableKey>,
    generation: u64,
    send_id: Option<SendId>,
    tx: oneshot::Sender<Outcome>,
}

pub(crate) struct PendingTable {
    slots: DashMap<RequestId, Slot>,
    /// Packet ids of issued requests, so exception callbacks can find their slot.
    sends: DashMap<SendId, RequestId>,
    next_request: AtomicU32,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: DashMap::new(),
            sends: DashMap::new(),
            next_request: AtomicU32::new(1),
        }
    }

    /// Allocate a fresh request id and park a completion slot under it.
    pub(crate) fn register(
        &self,
        owner: Option<VariableKey>,
        generation: u64,
    ) -> (RequestId, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let request = RequestId(self.next_request.fetch_add(1, Ordering::Relaxed));
        self.slots.insert(
            request,
            Slot {
                owner,
                generation,
                send_id: None,
                tx,
            },
        );
        (request, rx)
    }

    /// Remember which packet carried `request`. No-op if it already completed.
    pub(crate) fn bind_send(&self, request: RequestId, send_id: SendId) {
        if let Some(mut slot) = self.slots.get_mut(&request) {
            slot.send_id = Some(send_id);
            self.sends.insert(send_id, request);
        }
    }

    /// Complete `request` if it is still pending. Returns `false` when it
    /// was already completed, timed out, cancelled, or never existed.
    pub(crate) fn complete(&self, request: RequestId, outcome: Outcome) -> bool {
        let Some((_, slot)) = self.slots.remove(&request) else {
            return false;
        };
        if let Some(send_id) = slot.send_id {
            self.sends.remove(&send_id);
        }
        trace!(
            %request,
            owner = slot.owner.as_ref().map(tracing::field::display),
            generation = slot.generation,
            ?outcome,
            "request completed"
        );
        // The caller may have stopped waiting; nothing to do then.
        let _ = slot.tx.send(outcome);
        true
    }

    /// Complete whichever request was carried by `send_id`.
    pub(crate) fn complete_send(&self, send_id: SendId, outcome: Outcome) -> Option<RequestId> {
        let (_, request) = self.sends.remove(&send_id)?;
        self.complete(request, outcome).then_some(request)
    }

    /// Drop `request` without resolving it. Used by the caller after its
    /// own wait has timed out, so a late response finds nothing.
    pub(crate) fn abandon(&self, request: RequestId) -> bool {
        let Some((_, slot)) = self.slots.remove(&request) else {
            return false;
        };
        if let Some(send_id) = slot.send_id {
            self.sends.remove(&send_id);
        }
        true
    }

    /// Cancel every outstanding request. Returns how many were cancelled.
    pub(crate) fn cancel_all(&self) -> usize {
        let requests: Vec<RequestId> = self.slots.iter().map(|slot| *slot.key()).collect();
        let cancelled = requests
            .into_iter()
            .filter(|request| self.complete(*request, Outcome::Cancelled))
            .count();
        self.sends.clear();
        if cancelled > 0 {
            debug!(cancelled, "cancelled outstanding requests");
        }
        cancelled
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::VariableRef;

    fn owner() -> Option<VariableKey> {
        Some(VariableRef::new("ALT", "feet").key())
    }

    #[test]
    fn request_ids_are_monotonic() {
        let table = PendingTable::new();
        let (a, _rx_a) = table.register(None, 1);
        let (b, _rx_b) = table.register(None, 1);
        assert!(b > a);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn complete_delivers_value_once() {
        let table = PendingTable::new();
        let (request, rx) = table.register(owner(), 1);

        assert!(table.complete(request, Outcome::Value(3500.0)));
        assert!(!table.complete(request, Outcome::Value(1.0)));
        assert_eq!(rx.await.unwrap(), Outcome::Value(3500.0));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn abandoned_request_ignores_late_response() {
        let table = PendingTable::new();
        let (request, mut rx) = table.register(owner(), 1);

        assert!(table.abandon(request));
        assert!(!table.complete(request, Outcome::Value(1.0)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn exception_resolves_through_send_id() {
        let table = PendingTable::new();
        let (request, rx) = table.register(owner(), 1);
        table.bind_send(request, SendId(12));

        assert_eq!(
            table.complete_send(SendId(12), Outcome::Rejected { code: 1 }),
            Some(request)
        );
        assert_eq!(rx.await.unwrap(), Outcome::Rejected { code: 1 });
        assert_eq!(table.complete_send(SendId(12), Outcome::Cancelled), None);
    }

    #[test]
    fn bind_after_completion_is_ignored() {
        let table = PendingTable::new();
        let (request, _rx) = table.register(None, 1);
        table.complete(request, Outcome::Value(0.0));
        table.bind_send(request, SendId(5));
        assert_eq!(table.complete_send(SendId(5), Outcome::Cancelled), None);
    }

    #[test]
    fn waiter_stays_pending_until_completed() {
        let table = PendingTable::new();
        let (request, rx) = table.register(owner(), 1);
        let mut waiter = tokio_test::task::spawn(rx);

        tokio_test::assert_pending!(waiter.poll());
        table.complete(request, Outcome::Value(42.0));
        assert!(waiter.is_woken());
        let outcome = tokio_test::assert_ready_ok!(waiter.poll());
        assert_eq!(outcome, Outcome::Value(42.0));
    }

    #[tokio::test]
    async fn cancel_all_resolves_every_waiter() {
        let table = PendingTable::new();
        let receivers: Vec<_> = (0..3).map(|_| table.register(owner(), 1).1).collect();

        assert_eq!(table.cancel_all(), 3);
        assert_eq!(table.len(), 0);
        for rx in receivers {
            assert_eq!(rx.await.unwrap(), Outcome::Cancelled);
        }
    }
}
