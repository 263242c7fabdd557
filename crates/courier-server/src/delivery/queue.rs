//! Bounded FIFO of envelopes waiting for an identity.

use std::collections::VecDeque;

use courier_core::Envelope;

/// Pending envelopes for one identity.
///
/// When full, the oldest envelope is dropped to make room.
#[derive(Debug)]
pub struct UserQueue {
    entries: VecDeque<Envelope>,
    capacity: usize,
}

impl UserQueue {
    /// Create an empty queue holding at most `capacity` envelopes.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append an envelope, returning the envelope evicted to make room.
    pub fn push(&mut self, envelope: Envelope) -> Option<Envelope> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(envelope);
        evicted
    }

    /// Remove up to `max` envelopes from the front, in FIFO order.
    pub fn drain(&mut self, max: usize) -> Vec<Envelope> {
        let n = max.min(self.entries.len());
        self.entries.drain(..n).collect()
    }

    /// Put envelopes back at the front, ahead of anything queued since.
    ///
    /// Returns how many of the oldest envelopes had to be dropped to stay
    /// within capacity.
    pub fn requeue_front(&mut self, envelopes: Vec<Envelope>) -> usize {
        for envelope in envelopes.into_iter().rev() {
            self.entries.push_front(envelope);
        }
        let overflow = self.entries.len().saturating_sub(self.capacity);
        let _ = self.entries.drain(..overflow);
        overflow
    }

    /// Number of queued envelopes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of envelopes held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(id: &str) -> Envelope {
        Envelope::new("a".into(), "b".into(), json!(null)).with_id(id)
    }

    fn ids(envelopes: &[Envelope]) -> Vec<&str> {
        envelopes.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn drain_is_fifo() {
        let mut q = UserQueue::new(10);
        for id in ["m1", "m2", "m3"] {
            assert!(q.push(env(id)).is_none());
        }
        assert_eq!(ids(&q.drain(2)), vec!["m1", "m2"]);
        assert_eq!(ids(&q.drain(2)), vec!["m3"]);
        assert!(q.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut q = UserQueue::new(2);
        let _ = q.push(env("m1"));
        let _ = q.push(env("m2"));
        let evicted = q.push(env("m3")).unwrap();
        assert_eq!(evicted.id.as_str(), "m1");
        assert_eq!(q.len(), 2);
        assert_eq!(ids(&q.drain(10)), vec!["m2", "m3"]);
    }

    #[test]
    fn requeue_goes_ahead_of_new_arrivals() {
        let mut q = UserQueue::new(10);
        let _ = q.push(env("m1"));
        let _ = q.push(env("m2"));
        let batch = q.drain(2);
        let _ = q.push(env("m3"));
        assert_eq!(q.requeue_front(batch), 0);
        assert_eq!(ids(&q.drain(10)), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn requeue_trims_oldest_over_capacity() {
        let mut q = UserQueue::new(3);
        let _ = q.push(env("m1"));
        let _ = q.push(env("m2"));
        let batch = q.drain(2);
        let _ = q.push(env("m3"));
        let _ = q.push(env("m4"));
        assert_eq!(q.requeue_front(batch), 1);
        assert_eq!(ids(&q.drain(10)), vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let q = UserQueue::new(0);
        assert_eq!(q.capacity(), 1);
    }
}
