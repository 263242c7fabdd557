//! Prometheus metrics recorder and `/metrics` endpoint support.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Fails if a
/// recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names, shared by every module that records.

/// Live connections (gauge, labels: transport).
pub const CONNECTIONS_ACTIVE: &str = "courier_connections_active";
/// Connections opened (counter, labels: transport).
pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
/// Envelopes handed to a connection (counter, labels: path).
pub const ENVELOPES_DELIVERED_TOTAL: &str = "courier_envelopes_delivered_total";
/// Envelopes put on an offline queue (counter).
pub const ENVELOPES_QUEUED_TOTAL: &str = "courier_envelopes_queued_total";
/// Envelopes lost to queue overflow (counter).
pub const ENVELOPES_DROPPED_TOTAL: &str = "courier_envelopes_dropped_total";
/// Connections evicted by the liveness monitor or sweep (counter, labels: reason).
pub const LIVENESS_EVICTIONS_TOTAL: &str = "courier_liveness_evictions_total";
/// Inbound frames that could not be decoded (counter).
pub const DECODE_FAILURES_TOTAL: &str = "courier_decode_failures_total";
/// Batches sent by the dispatcher (counter).
pub const BATCHES_SENT_TOTAL: &str = "courier_batches_sent_total";
/// Webhook notifications that failed (counter).
pub const WEBHOOK_FAILURES_TOTAL: &str = "courier_webhook_failures_total";
