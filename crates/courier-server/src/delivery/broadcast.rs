//! Immediate fan-out of one persisted envelope.

use std::sync::Arc;

use courier_core::{Envelope, Identity};
use metrics::counter;
use serde::Serialize;
use tracing::debug;

use super::service::RegistryService;
use super::transport::Outgoing;
use crate::metrics::ENVELOPES_DELIVERED_TOTAL;

/// Outcome of delivering one envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    /// ID of the delivered envelope.
    pub envelope_id: String,
    /// Connections that accepted the envelope.
    pub delivered: usize,
    /// Target identities the envelope was queued for instead.
    pub queued_for: Vec<Identity>,
}

/// Sends an envelope straight to the receiver's and sender's connections,
/// falling back to their queues.
#[derive(Clone)]
pub struct ImmediateBroadcaster {
    registry: Arc<RegistryService>,
}

impl ImmediateBroadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<RegistryService>) -> Self {
        Self { registry }
    }

    /// Deliver now to every connection of every target identity.
    ///
    /// The envelope is encoded once and shared by all connections. A target
    /// with no connection, or whose connections all refused, gets the
    /// envelope queued.
    pub fn deliver(&self, envelope: &Envelope) -> DeliveryReport {
        let outgoing = Outgoing::single(envelope);
        let mut report = DeliveryReport {
            envelope_id: envelope.id.to_string(),
            ..DeliveryReport::default()
        };
        for target in envelope.targets() {
            let connections = self.registry.connections_for(target);
            let delivered = connections.iter().filter(|c| c.deliver(&outgoing)).count();
            if delivered == 0 {
                self.registry.enqueue(target, envelope.clone());
                report.queued_for.push(target.clone());
            }
            report.delivered += delivered;
        }
        if report.delivered > 0 {
            counter!(ENVELOPES_DELIVERED_TOTAL, "path" => "immediate")
                .increment(report.delivered as u64);
        }
        debug!(
            envelope_id = %envelope.id,
            sender = %envelope.sender,
            receiver = %envelope.receiver,
            delivered = report.delivered,
            queued = report.queued_for.len(),
            "immediate delivery"
        );
        report
    }

    /// Queue an envelope for every target identity; the dispatcher delivers
    /// it on its next pass.
    pub fn publish(&self, envelope: &Envelope) {
        for target in envelope.targets() {
            self.registry.enqueue(target, envelope.clone());
        }
    }
}
