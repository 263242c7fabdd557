//! Periodic batch flush of offline queues.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::service::RegistryService;
use super::transport::Outgoing;
use crate::metrics::{BATCHES_SENT_TOTAL, ENVELOPES_DELIVERED_TOTAL};

/// What one dispatcher pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Identities a batch was drained for.
    pub identities: usize,
    /// Envelopes accepted by at least one connection.
    pub envelopes: usize,
    /// Connection-level batch sends that succeeded.
    pub deliveries: usize,
    /// Envelopes put back because no connection accepted them.
    pub requeued: usize,
}

/// Drains offline queues to connected identities.
///
/// The dispatcher is the only consumer of the queues, which keeps delivery
/// for one identity in enqueue order.
pub struct BatchDispatcher {
    registry: Arc<RegistryService>,
    batch_cap: usize,
    interval: Duration,
    wake: Notify,
}

impl BatchDispatcher {
    /// Create a dispatcher sending at most `batch_cap` envelopes per identity
    /// every `interval`.
    pub fn new(registry: Arc<RegistryService>, batch_cap: usize, interval: Duration) -> Self {
        Self {
            registry,
            batch_cap: batch_cap.max(1),
            interval,
            wake: Notify::new(),
        }
    }

    /// Request an immediate pass (a new connection has a backlog).
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Run one pass over every deliverable identity.
    ///
    /// Never suspends: every send is a non-blocking hand-off to a
    /// connection's channel.
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        for identity in self.registry.deliverable_identities() {
            let batch = self.registry.drain(&identity, self.batch_cap);
            if batch.is_empty() {
                continue;
            }
            report.identities += 1;

            let connections = self.registry.connections_for(&identity);
            let outgoing = Outgoing::batch(&batch);
            let delivered = connections.iter().filter(|c| c.deliver(&outgoing)).count();

            if delivered == 0 {
                debug!(
                    %identity,
                    envelopes = batch.len(),
                    connections = connections.len(),
                    "no connection accepted batch, requeueing"
                );
                report.requeued += batch.len();
                self.registry.requeue_front(&identity, batch);
                continue;
            }

            counter!(BATCHES_SENT_TOTAL).increment(delivered as u64);
            counter!(ENVELOPES_DELIVERED_TOTAL, "path" => "batch")
                .increment((batch.len() * delivered) as u64);
            report.envelopes += batch.len();
            report.deliveries += delivered;
            trace!(%identity, envelopes = batch.len(), delivered, "batch sent");
        }
        if report.identities > 0 {
            debug!(
                identities = report.identities,
                envelopes = report.envelopes,
                requeued = report.requeued,
                "dispatcher tick"
            );
        }
        report
    }

    /// Tick every interval, and whenever woken, until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = self.wake.notified() => {}
                () = cancel.cancelled() => {
                    debug!("batch dispatcher stopped");
                    return;
                }
            }
            let _ = self.tick();
        }
    }
}
