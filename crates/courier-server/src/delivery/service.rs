//! Connection registry and offline queues behind one lock.

use std::collections::HashMap;
use std::sync::Arc;

use courier_core::{ConnectionId, Envelope, Identity};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use super::connection::Connection;
use super::queue::UserQueue;
use super::registry::ConnectionSet;
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, ENVELOPES_DROPPED_TOTAL, ENVELOPES_QUEUED_TOTAL,
};

/// Point-in-time registry counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Live connections across all identities.
    pub connections: usize,
    /// Identities with at least one live connection.
    pub identities: usize,
    /// Envelopes waiting in offline queues.
    pub queued_envelopes: usize,
    /// Identities with a non-empty queue.
    pub queued_identities: usize,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<Identity, ConnectionSet>,
    queues: HashMap<Identity, UserQueue>,
}

/// Owns every connection set and every offline queue.
///
/// All methods are synchronous; the lock is never held across an `.await`.
pub struct RegistryService {
    state: Mutex<RegistryState>,
    queue_capacity: usize,
}

impl RegistryService {
    /// Create an empty registry whose queues hold at most `queue_capacity`
    /// envelopes each.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            queue_capacity,
        }
    }

    /// Register a connection. Returns how many envelopes are already queued
    /// for its identity.
    pub fn register(&self, connection: Arc<Connection>) -> usize {
        let kind = connection.kind().as_str();
        let identity = connection.identity.clone();
        let backlog = {
            let mut state = self.state.lock();
            state
                .connections
                .entry(identity.clone())
                .or_default()
                .insert(connection);
            state.queues.get(&identity).map_or(0, UserQueue::len)
        };
        counter!(CONNECTIONS_TOTAL, "transport" => kind).increment(1);
        gauge!(CONNECTIONS_ACTIVE, "transport" => kind).increment(1.0);
        debug!(%identity, backlog, transport = kind, "connection registered");
        backlog
    }

    /// Remove one connection and cancel its timers.
    ///
    /// Drops the identity entry once its last connection is gone. Removing a
    /// connection that is not registered is a no-op returning `None`.
    pub fn unregister(&self, identity: &Identity, id: &ConnectionId) -> Option<Arc<Connection>> {
        let removed = {
            let mut state = self.state.lock();
            let set = state.connections.get_mut(identity)?;
            let removed = set.remove(id)?;
            removed.cancel_token().cancel();
            if set.is_empty() {
                let _ = state.connections.remove(identity);
            }
            removed
        };
        gauge!(CONNECTIONS_ACTIVE, "transport" => removed.kind().as_str()).decrement(1.0);
        debug!(%identity, conn_id = %id, "connection unregistered");
        Some(removed)
    }

    /// Live connections of an identity (empty for unknown identities).
    pub fn connections_for(&self, identity: &Identity) -> Vec<Arc<Connection>> {
        self.state
            .lock()
            .connections
            .get(identity)
            .map(ConnectionSet::snapshot)
            .unwrap_or_default()
    }

    /// Whether an identity has at least one live connection.
    pub fn is_online(&self, identity: &Identity) -> bool {
        self.state.lock().connections.contains_key(identity)
    }

    /// Look up one connection.
    pub fn connection(&self, identity: &Identity, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.state
            .lock()
            .connections
            .get(identity)
            .and_then(|set| set.get(id).cloned())
    }

    /// Every live connection.
    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.state
            .lock()
            .connections
            .values()
            .flat_map(ConnectionSet::iter)
            .cloned()
            .collect()
    }

    /// Append an envelope to an identity's queue.
    pub fn enqueue(&self, identity: &Identity, envelope: Envelope) {
        let envelope_id = envelope.id.clone();
        let evicted = {
            let mut state = self.state.lock();
            state
                .queues
                .entry(identity.clone())
                .or_insert_with(|| UserQueue::new(self.queue_capacity))
                .push(envelope)
        };
        counter!(ENVELOPES_QUEUED_TOTAL).increment(1);
        if let Some(dropped) = evicted {
            counter!(ENVELOPES_DROPPED_TOTAL).increment(1);
            warn!(
                %identity,
                dropped_envelope_id = %dropped.id,
                capacity = self.queue_capacity,
                "offline queue full, dropped oldest envelope"
            );
        }
        debug!(%identity, %envelope_id, "envelope queued");
    }

    /// Remove up to `max` envelopes from the head of an identity's queue.
    pub fn drain(&self, identity: &Identity, max: usize) -> Vec<Envelope> {
        let mut state = self.state.lock();
        let Some(queue) = state.queues.get_mut(identity) else {
            return Vec::new();
        };
        let batch = queue.drain(max);
        if queue.is_empty() {
            let _ = state.queues.remove(identity);
        }
        batch
    }

    /// Restore a drained batch at the head of an identity's queue.
    pub fn requeue_front(&self, identity: &Identity, envelopes: Vec<Envelope>) {
        if envelopes.is_empty() {
            return;
        }
        let dropped = self
            .state
            .lock()
            .queues
            .entry(identity.clone())
            .or_insert_with(|| UserQueue::new(self.queue_capacity))
            .requeue_front(envelopes);
        if dropped > 0 {
            counter!(ENVELOPES_DROPPED_TOTAL).increment(dropped as u64);
            warn!(%identity, dropped, "offline queue full after requeue, dropped oldest envelopes");
        }
    }

    /// Identities with a non-empty queue and at least one live connection.
    pub fn deliverable_identities(&self) -> Vec<Identity> {
        let state = self.state.lock();
        let mut identities: Vec<Identity> = state
            .queues
            .iter()
            .filter(|(identity, queue)| {
                !queue.is_empty() && state.connections.contains_key(*identity)
            })
            .map(|(identity, _)| identity.clone())
            .collect();
        identities.sort_unstable();
        identities
    }

    /// Number of envelopes queued for an identity.
    pub fn queued_len(&self, identity: &Identity) -> usize {
        self.state.lock().queues.get(identity).map_or(0, UserQueue::len)
    }

    /// Current counters.
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            connections: state.connections.values().map(ConnectionSet::len).sum(),
            identities: state.connections.len(),
            queued_envelopes: state.queues.values().map(UserQueue::len).sum(),
            queued_identities: state.queues.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::testing::{RecordingTransport, connection_with};
    use serde_json::json;

    fn env(id: &str, receiver: &str) -> Envelope {
        Envelope::new("sender".into(), receiver.into(), json!(null)).with_id(id)
    }

    fn ids(envelopes: &[Envelope]) -> Vec<&str> {
        envelopes.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn connections_for_unknown_identity_is_empty() {
        let registry = RegistryService::new(10);
        assert!(registry.connections_for(&"nobody".into()).is_empty());
        assert!(!registry.is_online(&"nobody".into()));
    }

    #[test]
    fn register_many_per_identity() {
        let registry = RegistryService::new(10);
        let (a, _) = connection_with("alice", RecordingTransport::duplex());
        let (b, _) = connection_with("alice", RecordingTransport::event_stream());
        let _ = registry.register(Arc::clone(&a));
        let _ = registry.register(Arc::clone(&b));
        assert_eq!(registry.connections_for(&"alice".into()).len(), 2);
        assert_eq!(registry.stats().connections, 2);
        assert_eq!(registry.stats().identities, 1);
    }

    #[test]
    fn unregister_last_connection_drops_identity() {
        let registry = RegistryService::new(10);
        let (a, _) = connection_with("alice", RecordingTransport::duplex());
        let _ = registry.register(Arc::clone(&a));

        let removed = registry.unregister(&a.identity, &a.id).unwrap();
        assert_eq!(removed.id, a.id);
        assert!(a.cancel_token().is_cancelled());
        assert!(!registry.is_online(&"alice".into()));
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn duplicate_unregister_is_noop() {
        let registry = RegistryService::new(10);
        let (a, _) = connection_with("alice", RecordingTransport::duplex());
        let (b, _) = connection_with("alice", RecordingTransport::duplex());
        let _ = registry.register(Arc::clone(&a));
        let _ = registry.register(Arc::clone(&b));

        assert!(registry.unregister(&a.identity, &a.id).is_some());
        assert!(registry.unregister(&a.identity, &a.id).is_none());
        assert!(!b.cancel_token().is_cancelled());
        assert_eq!(registry.connections_for(&"alice".into()).len(), 1);
    }

    #[test]
    fn register_reports_backlog() {
        let registry = RegistryService::new(10);
        registry.enqueue(&"bob".into(), env("m1", "bob"));
        registry.enqueue(&"bob".into(), env("m2", "bob"));
        let (b, _) = connection_with("bob", RecordingTransport::duplex());
        assert_eq!(registry.register(b), 2);
    }

    #[test]
    fn queue_accumulates_in_order_while_offline() {
        let registry = RegistryService::new(10);
        let bob = Identity::from("bob");
        for id in ["m1", "m2", "m3"] {
            registry.enqueue(&bob, env(id, "bob"));
        }
        assert_eq!(registry.queued_len(&bob), 3);
        assert!(registry.deliverable_identities().is_empty());
        assert_eq!(ids(&registry.drain(&bob, 10)), vec!["m1", "m2", "m3"]);
        assert_eq!(registry.stats().queued_identities, 0);
    }

    #[test]
    fn queue_overflow_drops_oldest_and_warns() {
        let (logs, _guard) = courier_core::logging::capture_logs();
        let registry = RegistryService::new(2);
        let bob = Identity::from("bob");
        for id in ["m1", "m2", "m3"] {
            registry.enqueue(&bob, env(id, "bob"));
        }
        assert_eq!(ids(&registry.drain(&bob, 10)), vec!["m2", "m3"]);
        assert!(logs.has_event(tracing::Level::WARN, "offline queue full"));
    }

    #[test]
    fn deliverable_requires_connection_and_backlog() {
        let registry = RegistryService::new(10);
        registry.enqueue(&"bob".into(), env("m1", "bob"));
        registry.enqueue(&"carol".into(), env("m2", "carol"));
        let (b, _) = connection_with("bob", RecordingTransport::duplex());
        let (d, _) = connection_with("dave", RecordingTransport::duplex());
        let _ = registry.register(b);
        let _ = registry.register(d);
        assert_eq!(registry.deliverable_identities(), vec![Identity::from("bob")]);
    }

    #[test]
    fn requeue_front_restores_order() {
        let registry = RegistryService::new(10);
        let bob = Identity::from("bob");
        registry.enqueue(&bob, env("m1", "bob"));
        registry.enqueue(&bob, env("m2", "bob"));
        let batch = registry.drain(&bob, 10);
        registry.enqueue(&bob, env("m3", "bob"));
        registry.requeue_front(&bob, batch);
        assert_eq!(ids(&registry.drain(&bob, 10)), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn all_connections_spans_identities() {
        let registry = RegistryService::new(10);
        let (a, _) = connection_with("alice", RecordingTransport::duplex());
        let (b, _) = connection_with("bob", RecordingTransport::duplex());
        let _ = registry.register(a);
        let _ = registry.register(b);
        assert_eq!(registry.all_connections().len(), 2);
    }
}
