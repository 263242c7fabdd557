//! Probe/ack liveness monitoring and the registry sweep.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{Connection, LivenessState};
use super::service::RegistryService;
use super::transport::{CloseReason, ProbeMode};
use crate::metrics::LIVENESS_EVICTIONS_TOTAL;

/// How a connection's liveness loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessOutcome {
    /// The client did not acknowledge a probe within the ack timeout.
    TimedOut,
    /// The probe could not be written.
    TransportFailed,
    /// The connection left the registry for another reason.
    Cancelled,
}

/// Terminate, close and unregister a connection.
///
/// Returns `true` if this call removed the connection from the registry.
pub fn evict(registry: &RegistryService, connection: &Connection, reason: CloseReason) -> bool {
    let _ = connection.terminate();
    connection.close(reason);
    let removed = registry
        .unregister(&connection.identity, &connection.id)
        .is_some();
    if removed {
        counter!(LIVENESS_EVICTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    }
    removed
}

/// Drives the `CONNECTED → AWAITING_ACK → TERMINATED` cycle.
#[derive(Clone)]
pub struct LivenessMonitor {
    registry: Arc<RegistryService>,
    probe_interval: Duration,
    ack_timeout: Duration,
}

impl LivenessMonitor {
    /// Create a monitor over `registry`.
    pub fn new(
        registry: Arc<RegistryService>,
        probe_interval: Duration,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            probe_interval,
            ack_timeout,
        }
    }

    /// Spawn the liveness loop for a connection.
    ///
    /// The loop ends when the connection's cancel token fires.
    pub fn watch(&self, connection: Arc<Connection>) -> JoinHandle<LivenessOutcome> {
        let monitor = self.clone();
        tokio::spawn(async move { monitor.run(connection).await })
    }

    /// Run the liveness loop for a connection until it ends.
    pub async fn run(&self, connection: Arc<Connection>) -> LivenessOutcome {
        let cancel = connection.cancel_token().clone();
        let start = Instant::now() + self.probe_interval;
        let mut ticker = time::interval_at(start, self.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = cancel.cancelled() => return LivenessOutcome::Cancelled,
            }

            match connection.probe() {
                Ok(ProbeMode::Acknowledged) => continue,
                Ok(ProbeMode::AwaitAck) => {}
                Err(error) => {
                    warn!(
                        identity = %connection.identity,
                        conn_id = %connection.id,
                        %error,
                        "liveness probe failed, closing connection"
                    );
                    let _ = evict(&self.registry, &connection, CloseReason::TransportError);
                    return LivenessOutcome::TransportFailed;
                }
            }

            tokio::select! {
                () = time::sleep(self.ack_timeout) => {}
                () = cancel.cancelled() => return LivenessOutcome::Cancelled,
            }

            if connection.state() == LivenessState::AwaitingAck {
                info!(
                    identity = %connection.identity,
                    conn_id = %connection.id,
                    age_secs = connection.age().as_secs(),
                    "client stopped acknowledging probes, disconnecting"
                );
                let _ = evict(&self.registry, &connection, CloseReason::LivenessTimeout);
                return LivenessOutcome::TimedOut;
            }
        }
    }

    /// Whether a connection should be swept from the registry.
    fn is_stale(&self, connection: &Connection) -> bool {
        connection.is_closed()
            || connection.last_ack_elapsed() > self.probe_interval + self.ack_timeout
    }

    /// Remove terminated, closed and stale connections. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        let removed = self
            .registry
            .all_connections()
            .into_iter()
            .filter(|c| self.is_stale(c))
            .filter(|c| evict(&self.registry, c, CloseReason::Stale))
            .count();
        if removed > 0 {
            info!(removed, "registry sweep removed dead connections");
        } else {
            debug!("registry sweep found nothing to remove");
        }
        removed
    }

    /// Sweep every `interval` until cancelled.
    pub async fn run_sweeper(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.sweep();
                }
                () = cancel.cancelled() => {
                    debug!("registry sweeper stopped");
                    return;
                }
            }
        }
    }
}
