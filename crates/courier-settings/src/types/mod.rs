//! Settings types, grouped by concern.

mod delivery;
mod server;

pub use delivery::{DeliverySettings, EventStreamSettings, LivenessSettings};
pub use server::{InjectionSettings, LoggingSettings, ServerSettings, WebhookSettings};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierSettings {
    /// HTTP / WebSocket listener settings.
    pub server: ServerSettings,
    /// Queue and batch dispatcher settings.
    pub delivery: DeliverySettings,
    /// Keepalive probe and registry sweep settings.
    pub liveness: LivenessSettings,
    /// Server-sent events settings.
    pub event_stream: EventStreamSettings,
    /// Server-to-server injection endpoint.
    pub injection: InjectionSettings,
    /// New-message webhook.
    pub webhook: WebhookSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl CourierSettings {
    /// Reject combinations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let delivery = &self.delivery;
        let liveness = &self.liveness;
        if delivery.batch_cap == 0 {
            return Err(SettingsError::invalid("delivery.batchCap", "must be at least 1"));
        }
        if delivery.queue_capacity < delivery.batch_cap {
            return Err(SettingsError::invalid(
                "delivery.queueCapacity",
                "must not be smaller than delivery.batchCap",
            ));
        }
        if delivery.batch_interval_ms == 0 {
            return Err(SettingsError::invalid("delivery.batchIntervalMs", "must be positive"));
        }
        if liveness.ack_timeout_ms == 0 || liveness.probe_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "liveness",
                "probe and ack intervals must be positive",
            ));
        }
        if liveness.ack_timeout_ms >= liveness.probe_interval_ms {
            return Err(SettingsError::invalid(
                "liveness.ackTimeoutMs",
                "must be shorter than liveness.probeIntervalMs",
            ));
        }
        if self.server.outbound_buffer == 0 {
            return Err(SettingsError::invalid("server.outboundBuffer", "must be at least 1"));
        }
        Ok(())
    }
}
