//! Facade wiring registry, dispatcher, liveness and the immediate path.

use std::sync::Arc;

use courier_core::codec::InboundFrame;
use courier_core::{ConnectionId, Envelope, Identity};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::broadcast::{DeliveryReport, ImmediateBroadcaster};
use super::connection::Connection;
use super::dispatcher::{BatchDispatcher, TickReport};
use super::inbound::{InboundDecoder, InboundError};
use super::liveness::{self, LivenessMonitor};
use super::service::{RegistryService, RegistryStats};
use super::transport::{CloseReason, DeliveryTransport};
use crate::config::EngineConfig;
use crate::notify::WebhookNotifier;
use crate::store::MessageStore;

/// The delivery engine shared by every transport handler.
pub struct DeliveryEngine {
    config: EngineConfig,
    registry: Arc<RegistryService>,
    dispatcher: Arc<BatchDispatcher>,
    monitor: LivenessMonitor,
    broadcaster: ImmediateBroadcaster,
    inbound: InboundDecoder,
    shutdown: CancellationToken,
}

impl DeliveryEngine {
    /// Build an engine. Background tasks start with [`DeliveryEngine::start`].
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn MessageStore>,
        notifier: Option<WebhookNotifier>,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = Arc::new(RegistryService::new(config.queue_capacity));
        let dispatcher = Arc::new(BatchDispatcher::new(
            Arc::clone(&registry),
            config.batch_cap,
            config.batch_interval,
        ));
        let monitor =
            LivenessMonitor::new(Arc::clone(&registry), config.probe_interval, config.ack_timeout);
        let broadcaster = ImmediateBroadcaster::new(Arc::clone(&registry));
        let inbound = InboundDecoder::new(store, broadcaster.clone(), notifier);
        Self {
            config,
            registry,
            dispatcher,
            monitor,
            broadcaster,
            inbound,
            shutdown,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<RegistryService> {
        &self.registry
    }

    /// Spawn the batch dispatcher and the registry sweeper.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let dispatcher =
            tokio::spawn(Arc::clone(&self.dispatcher).run(self.shutdown.child_token()));
        let sweeper = tokio::spawn(
            self.monitor
                .clone()
                .run_sweeper(self.config.sweep_interval, self.shutdown.child_token()),
        );
        info!(
            batch_interval_ms = self.config.batch_interval.as_millis(),
            batch_cap = self.config.batch_cap,
            probe_interval_ms = self.config.probe_interval.as_millis(),
            ack_timeout_ms = self.config.ack_timeout.as_millis(),
            "delivery engine started"
        );
        vec![dispatcher, sweeper]
    }

    /// Register a new connection and start watching its liveness.
    ///
    /// Wakes the dispatcher when the identity already has queued envelopes.
    pub fn attach(
        &self,
        id: ConnectionId,
        identity: Identity,
        transport: Box<dyn DeliveryTransport>,
    ) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(
            id,
            identity,
            transport,
            self.shutdown.child_token(),
        ));
        let backlog = self.registry.register(Arc::clone(&connection));
        let _ = self.monitor.watch(Arc::clone(&connection));
        if backlog > 0 {
            self.dispatcher.wake();
        }
        info!(
            identity = %connection.identity,
            conn_id = %connection.id,
            transport = connection.kind().as_str(),
            backlog,
            "client connected"
        );
        connection
    }

    /// Unregister a connection whose transport has gone away.
    ///
    /// Returns `false` if it was already removed.
    pub fn detach(&self, connection: &Connection) -> bool {
        let removed = self
            .registry
            .unregister(&connection.identity, &connection.id)
            .is_some();
        if removed {
            info!(
                identity = %connection.identity,
                conn_id = %connection.id,
                age_secs = connection.age().as_secs(),
                delivered = connection.delivered_count(),
                dropped = connection.drop_count(),
                "client disconnected"
            );
        }
        removed
    }

    /// Close and unregister a connection.
    pub fn evict(&self, connection: &Connection, reason: CloseReason) -> bool {
        liveness::evict(&self.registry, connection, reason)
    }

    /// Close every live connection. Returns how many were closed.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        self.registry
            .all_connections()
            .iter()
            .filter(|c| self.evict(c, reason))
            .count()
    }

    /// Queue an envelope for its receiver and sender; the dispatcher
    /// delivers it on its next pass.
    pub fn publish(&self, envelope: &Envelope) {
        self.broadcaster.publish(envelope);
    }

    /// Deliver an already-persisted envelope right away.
    pub fn deliver_now(&self, envelope: &Envelope) -> DeliveryReport {
        self.broadcaster.deliver(envelope)
    }

    /// Handle a frame a client sent on one of its connections.
    pub async fn receive(
        &self,
        sender: &Identity,
        frame: InboundFrame<'_>,
    ) -> Result<DeliveryReport, InboundError> {
        self.inbound.handle(sender, frame).await
    }

    /// Run one dispatcher pass now.
    pub fn flush(&self) -> TickReport {
        self.dispatcher.tick()
    }

    /// Registry counters.
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}
