//! Publisher-side correlation bookkeeping (§3 "Correlator"): pairs a
//! message id with the channel its responses are delivered on.

use crate::error::HandlerError;
use crate::frame::Frame;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, Notify};

/// One item delivered to a publisher's result channel: either a
/// successfully defragmented response frame, or a reconstituted handler
/// error (§4.4 step 7).
#[derive(Debug, Clone)]
pub enum RpcResult {
    Response(Frame),
    Error(HandlerError),
}

pub(crate) struct Correlator {
    pub(crate) sender: mpsc::Sender<RpcResult>,
    pub(crate) created_at: Instant,
    pub(crate) destination: String,
    /// `Some(n)` once the known-responder tracker has a warm hint for this
    /// destination; `None` on a cold multicast, where there is nothing yet
    /// to terminate early on and collection runs until the deadline fires
    /// (§4.6: the hint "sizes the response channel and terminates the
    /// collect loop early" only once it exists — it must never cause a
    /// first-ever multicast to stop after a single response).
    pub(crate) expected_responders: Option<usize>,
    pub(crate) known_responders: HashSet<String>,
    pub(crate) received_acks: usize,
    pub(crate) received_responses: usize,
    pub(crate) unicast: bool,
    pub(crate) ack_notify: Arc<Notify>,
}

/// Connector-wide table of in-flight correlators, keyed by message id.
/// Guarded by its own lock, mutated only in-memory (§5 "Shared-resource
/// policy").
#[derive(Default)]
pub struct CorrelatorTable {
    entries: Mutex<HashMap<String, Correlator>>,
}

impl CorrelatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn register(
        &self,
        msg_id: String,
        sender: mpsc::Sender<RpcResult>,
        destination: String,
        expected_responders: Option<usize>,
        unicast: bool,
    ) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            msg_id,
            Correlator {
                sender,
                created_at: Instant::now(),
                destination,
                expected_responders,
                known_responders: HashSet::new(),
                received_acks: 0,
                received_responses: 0,
                unicast,
                ack_notify: Arc::new(Notify::new()),
            },
        );
    }

    pub(crate) async fn destination(&self, msg_id: &str) -> Option<String> {
        self.entries.lock().await.get(msg_id).map(|c| c.destination.clone())
    }

    /// Returns a clone of the correlator's ack notifier, so a caller can
    /// `select!` on it against an ack-window timeout without holding the
    /// table lock while waiting (§4.4 step 5).
    pub(crate) async fn ack_notify(&self, msg_id: &str) -> Option<Arc<Notify>> {
        self.entries.lock().await.get(msg_id).map(|c| c.ack_notify.clone())
    }

    pub(crate) async fn release(&self, msg_id: &str) {
        self.entries.lock().await.remove(msg_id);
    }

    pub(crate) async fn record_ack(&self, msg_id: &str, from_id: &str) -> Option<usize> {
        let mut entries = self.entries.lock().await;
        let correlator = entries.get_mut(msg_id)?;
        correlator.known_responders.insert(from_id.to_string());
        correlator.received_acks += 1;
        correlator.ack_notify.notify_waiters();
        Some(correlator.known_responders.len())
    }

    pub(crate) async fn known_responders(&self, msg_id: &str) -> HashSet<String> {
        self.entries
            .lock()
            .await
            .get(msg_id)
            .map(|c| c.known_responders.clone())
            .unwrap_or_default()
    }

    /// Delivers a result, returning `true` if this was (one of) the
    /// expected responses and the correlator should keep waiting, `false`
    /// if the caller should stop collecting (unicast complete, or
    /// multicast cardinality reached).
    pub(crate) async fn deliver(&self, msg_id: &str, result: RpcResult) -> bool {
        // Clone the sender and decide the keep-waiting verdict while
        // holding the lock only long enough to mutate counters, then drop
        // the lock before the (possibly-blocking) channel send (§5
        // "Shared-resource policy": never await while holding a lock).
        let (sender, keep_waiting) = {
            let mut entries = self.entries.lock().await;
            let Some(correlator) = entries.get_mut(msg_id) else {
                return false;
            };
            correlator.received_responses += 1;
            let keep_waiting = !correlator.unicast
                && match correlator.expected_responders {
                    Some(expected) => correlator.received_responses < expected.max(1),
                    None => true,
                };
            (correlator.sender.clone(), keep_waiting)
        };
        let _ = sender.send(result).await;
        keep_waiting
    }

    pub(crate) async fn expected_responders(&self, msg_id: &str) -> Option<usize> {
        self.entries.lock().await.get(msg_id).and_then(|c| c.expected_responders)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
