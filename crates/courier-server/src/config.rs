//! Server configuration.

use std::time::Duration;

use courier_settings::CourierSettings;

/// Timing and sizing of the delivery core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Dispatcher tick period.
    pub batch_interval: Duration,
    /// Maximum envelopes sent to one identity per tick.
    pub batch_cap: usize,
    /// Maximum envelopes held per offline queue.
    pub queue_capacity: usize,
    /// Time between liveness probes.
    pub probe_interval: Duration,
    /// Time allowed for a probe to be acknowledged.
    pub ack_timeout: Duration,
    /// Registry sweep period.
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&CourierSettings::default())
    }
}

impl From<&CourierSettings> for EngineConfig {
    fn from(settings: &CourierSettings) -> Self {
        Self {
            batch_interval: settings.delivery.batch_interval(),
            batch_cap: settings.delivery.batch_cap,
            queue_capacity: settings.delivery.queue_capacity,
            probe_interval: settings.liveness.probe_interval(),
            ack_timeout: settings.liveness.ack_timeout(),
            sweep_interval: settings.liveness.sweep_interval(),
        }
    }
}

/// Configuration for the Courier server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Bounded outbound channel size per connection.
    pub outbound_buffer: usize,
    /// SSE keep-alive comment period.
    pub keepalive_interval: Duration,
    /// Delivery core settings.
    pub engine: EngineConfig,
    /// Header carrying the injection secret.
    pub injection_header: String,
    /// Shared secret for `POST /internal/deliver`; `None` disables it.
    pub injection_secret: Option<String>,
    /// Webhook target; `None` disables notifications.
    pub webhook_url: Option<String>,
    /// Webhook request timeout.
    pub webhook_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let settings = CourierSettings::default();
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Self::from(&settings)
        }
    }
}

impl From<&CourierSettings> for ServerConfig {
    fn from(settings: &CourierSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            outbound_buffer: settings.server.outbound_buffer,
            keepalive_interval: settings.event_stream.keepalive_interval(),
            engine: EngineConfig::from(settings),
            injection_header: settings.injection.header_name.clone(),
            injection_secret: settings.injection.secret.clone(),
            webhook_url: settings.webhook.url.clone(),
            webhook_timeout: settings.webhook.timeout(),
        }
    }
}
