//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::delivery::RegistryStats;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open connections across both transports.
    pub connections: usize,
    /// Identities with at least one open connection.
    pub identities: usize,
    /// Envelopes waiting in offline queues.
    pub queued_envelopes: usize,
}

/// Build a health response from a registry snapshot.
pub fn health_check(start_time: Instant, stats: &RegistryStats) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: stats.connections,
        identities: stats.identities,
        queued_envelopes: stats.queued_envelopes,
    }
}
