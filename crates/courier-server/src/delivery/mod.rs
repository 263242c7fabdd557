//! Transport-independent delivery core.
//!
//! - [`service::RegistryService`] owns the connection sets and offline queues
//! - [`dispatcher::BatchDispatcher`] flushes queues in capped batches
//! - [`liveness::LivenessMonitor`] probes connections and sweeps dead ones
//! - [`broadcast::ImmediateBroadcaster`] pushes one envelope right away
//! - [`inbound::InboundDecoder`] turns client frames into deliveries
//! - [`engine::DeliveryEngine`] ties them together for the transports

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod engine;
pub mod inbound;
pub mod liveness;
pub mod queue;
pub mod registry;
pub mod service;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use broadcast::DeliveryReport;
pub use connection::{Connection, LivenessState};
pub use engine::DeliveryEngine;
pub use service::RegistryStats;
pub use transport::{
    CloseReason, DeliveryError, DeliveryTransport, Outgoing, ProbeMode, TransportKind,
};
