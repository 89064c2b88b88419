//! Message Queue (spec.md §2 bullet 3, §4.3): fair multiplexing of
//! multiple emitters by `opNr`, retry/backoff, the BootNotification-
//! Pending gate, and a bounded meter-value cache.
//!
//! Grounded on the teacher's `application/commands/mod.rs` `CommandSender`
//! (a `DashMap` of in-flight requests keyed by message id, resolved via
//! `oneshot`). The direction here is reversed (charger → CSMS rather than
//! CSMS → charger) and driven by an explicit `tick`/`next_due` rather than
//! `tokio::time::timeout`, since spec.md §5 requires the core to run
//! without internal threads or timers of its own — the host pumps time.

use std::collections::VecDeque;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::QueueError;

/// An outbound request waiting to be written to the wire.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub unique_id: String,
    pub op_nr: u64,
    pub action: String,
    pub payload: Value,
}

struct Pending {
    op_nr: u64,
    action: String,
    payload: Value,
    attempt_nr: u32,
    last_sent_ms: Option<u64>,
    /// `true` once this message has been handed to the host at least once;
    /// distinguishes "never sent" from "sent, awaiting retry window".
    sent: bool,
    /// StartTransaction/StopTransaction/TransactionEvent messages are
    /// withheld while a BootNotification is pending (spec.md §4.3).
    transaction_scoped: bool,
}

/// Fair, retrying, boot-gated outbound message queue. One instance is
/// shared by every connector on the charge point; ordering across
/// connectors is by `opNr`, a single monotonic counter assigned at
/// enqueue time (spec.md §4.3 "opNr is the sole ordering key; two
/// messages from different connectors interleave strictly by opNr").
pub struct MessageQueue {
    order: VecDeque<String>,
    pending: DashMap<String, Pending>,
    boot_pending: bool,
    max_attempts: u32,
    retry_interval_ms: u64,
    next_op_nr: u64,
}

impl MessageQueue {
    pub fn new(max_attempts: u32, retry_interval_ms: u64) -> Self {
        Self {
            order: VecDeque::new(),
            pending: DashMap::new(),
            boot_pending: true,
            max_attempts,
            retry_interval_ms,
            next_op_nr: 0,
        }
    }

    /// Gate tx-scoped messages until BootNotification succeeds (spec.md
    /// §4.3, §8 scenario S4: "messages queued before boot succeeds are
    /// admitted strictly in opNr order once the gate opens").
    pub fn set_boot_pending(&mut self, pending: bool) {
        self.boot_pending = pending;
    }

    pub fn is_boot_pending(&self) -> bool {
        self.boot_pending
    }

    pub fn enqueue(&mut self, op_nr: u64, action: impl Into<String>, payload: Value, transaction_scoped: bool) -> String {
        let unique_id = Uuid::new_v4().to_string();
        self.pending.insert(
            unique_id.clone(),
            Pending {
                op_nr,
                action: action.into(),
                payload,
                attempt_nr: 0,
                last_sent_ms: None,
                sent: false,
                transaction_scoped,
            },
        );
        let pos = self
            .order
            .iter()
            .position(|id| {
                self.pending
                    .get(id)
                    .map(|p| p.op_nr > op_nr)
                    .unwrap_or(false)
            })
            .unwrap_or(self.order.len());
        self.order.insert(pos, unique_id.clone());
        unique_id
    }

    /// Like `enqueue`, but assigns the next `opNr` from this queue's own
    /// monotonic counter rather than taking one from the caller — the
    /// natural entry point for emitters (the transaction engine) that
    /// have no other source of a globally unique, strictly increasing
    /// ordering key. Returns the assigned `opNr` alongside the message id.
    pub fn enqueue_next(&mut self, action: impl Into<String>, payload: Value, transaction_scoped: bool) -> (u64, String) {
        let op_nr = self.next_op_nr;
        self.next_op_nr += 1;
        let unique_id = self.enqueue(op_nr, action, payload, transaction_scoped);
        (op_nr, unique_id)
    }

    /// The next message due to be (re-)sent, honoring the retry interval
    /// and the boot-pending gate. Does not remove it from the queue —
    /// call `mark_sent` once the host has actually written it.
    pub fn next_due(&self, now_ms: u64) -> Option<OutboundMessage> {
        for id in self.order.iter() {
            let entry = self.pending.get(id)?;
            if entry.transaction_scoped && self.boot_pending {
                continue;
            }
            let due = match entry.last_sent_ms {
                None => true,
                Some(last) => now_ms.saturating_sub(last) >= self.retry_interval_ms,
            };
            if due {
                return Some(OutboundMessage {
                    unique_id: id.clone(),
                    op_nr: entry.op_nr,
                    action: entry.action.clone(),
                    payload: entry.payload.clone(),
                });
            }
        }
        None
    }

    pub fn mark_sent(&mut self, unique_id: &str, now_ms: u64) {
        if let Some(mut entry) = self.pending.get_mut(unique_id) {
            entry.attempt_nr += 1;
            entry.last_sent_ms = Some(now_ms);
            entry.sent = true;
        }
    }

    /// Resolve a message on success, removing it from the queue.
    pub fn resolve(&mut self, unique_id: &str) -> Result<(), QueueError> {
        self.pending.remove(unique_id);
        self.order.retain(|id| id != unique_id);
        Ok(())
    }

    /// A CallError arrived. Returns `Err` if attempts are exhausted
    /// (caller should then mark the owning transaction silent, per
    /// spec.md §4.2), `Ok(())` if it should keep retrying.
    pub fn fail(&mut self, unique_id: &str, code: &str, description: &str) -> Result<(), QueueError> {
        let exhausted = self
            .pending
            .get(unique_id)
            .map(|p| p.attempt_nr >= self.max_attempts)
            .unwrap_or(true);
        if exhausted {
            warn!(unique_id, code, description, "message attempts exhausted");
            self.pending.remove(unique_id);
            self.order.retain(|id| id != unique_id);
            return Err(QueueError::CallError {
                code: code.to_string(),
                description: description.to_string(),
            });
        }
        debug!(unique_id, code, description, "retrying after CallError");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn front_op_nr(&self) -> Option<u64> {
        self.order.front().and_then(|id| self.pending.get(id).map(|p| p.op_nr))
    }
}

/// Bounded cache of not-yet-sent meter values, used while offline.
/// Oldest entries are dropped once `capacity` is exceeded (spec.md §4.3
/// "bounded meter-value cache, oldest-drop eviction").
pub struct MeterValueCache<T> {
    capacity: usize,
    items: VecDeque<T>,
    dropped: u64,
}

impl<T> MeterValueCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
            self.dropped += 1;
        }
        self.items.push_back(item);
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transaction_scoped_messages_wait_for_boot_gate() {
        let mut q = MessageQueue::new(3, 1000);
        q.enqueue(1, "StartTransaction", json!({}), true);
        assert!(q.next_due(0).is_none());
        q.set_boot_pending(false);
        assert!(q.next_due(0).is_some());
    }

    #[test]
    fn orders_strictly_by_op_nr_across_enqueue_order() {
        let mut q = MessageQueue::new(3, 1000);
        q.set_boot_pending(false);
        q.enqueue(5, "B", json!({}), false);
        q.enqueue(1, "A", json!({}), false);
        let first = q.next_due(0).unwrap();
        assert_eq!(first.action, "A");
    }

    #[test]
    fn retry_interval_gates_resend() {
        let mut q = MessageQueue::new(3, 1000);
        q.set_boot_pending(false);
        let id = q.enqueue(1, "Heartbeat", json!({}), false);
        q.mark_sent(&id, 0);
        assert!(q.next_due(500).is_none());
        assert!(q.next_due(1000).is_some());
    }

    #[test]
    fn fail_exhausts_after_max_attempts() {
        let mut q = MessageQueue::new(2, 0);
        q.set_boot_pending(false);
        let id = q.enqueue(1, "StartTransaction", json!({}), true);
        q.mark_sent(&id, 0);
        q.fail(&id, "GenericError", "nope").unwrap();
        q.mark_sent(&id, 0);
        let err = q.fail(&id, "GenericError", "nope").unwrap_err();
        assert!(matches!(err, QueueError::CallError { .. }));
    }

    #[test]
    fn resolve_removes_from_queue() {
        let mut q = MessageQueue::new(3, 1000);
        q.set_boot_pending(false);
        let id = q.enqueue(1, "Heartbeat", json!({}), false);
        q.resolve(&id).unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn enqueue_next_assigns_increasing_op_nrs() {
        let mut q = MessageQueue::new(3, 1000);
        q.set_boot_pending(false);
        let (first, _) = q.enqueue_next("StartTransaction", json!({}), true);
        let (second, _) = q.enqueue_next("StopTransaction", json!({}), true);
        assert_eq!(first, 0);
        assert_eq!(second, 1);
    }

    #[test]
    fn meter_value_cache_drops_oldest() {
        let mut cache = MeterValueCache::new(2);
        cache.push(1);
        cache.push(2);
        cache.push(3);
        assert_eq!(cache.dropped_count(), 1);
        assert_eq!(cache.drain(), vec![2, 3]);
    }
}
