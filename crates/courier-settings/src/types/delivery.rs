//! Queue, dispatcher, liveness and event-stream settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-identity queue and batch dispatcher settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliverySettings {
    /// Batch dispatcher tick interval in milliseconds.
    pub batch_interval_ms: u64,
    /// Maximum envelopes sent to one identity per tick.
    pub batch_cap: usize,
    /// Sanity cap on a single identity's queue; the oldest entries are
    /// dropped beyond it.
    pub queue_capacity: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            batch_interval_ms: 250,
            batch_cap: 50,
            queue_capacity: 1_000,
        }
    }
}

impl DeliverySettings {
    /// Dispatcher tick interval.
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }
}

/// Keepalive probe, acknowledgement timeout and registry sweep settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivenessSettings {
    /// Interval between liveness probes, in milliseconds.
    pub probe_interval_ms: u64,
    /// How long to wait for a probe acknowledgement, in milliseconds.
    pub ack_timeout_ms: u64,
    /// Interval of the registry sweep, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            probe_interval_ms: 30_000,
            ack_timeout_ms: 10_000,
            sweep_interval_ms: 60_000,
        }
    }
}

impl LivenessSettings {
    /// Probe interval.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Acknowledgement timeout.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Registry sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Server-sent events settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventStreamSettings {
    /// Interval between keep-alive comments, in milliseconds.
    pub keepalive_interval_ms: u64,
}

impl Default for EventStreamSettings {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: 15_000,
        }
    }
}

impl EventStreamSettings {
    /// Keep-alive interval.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}
