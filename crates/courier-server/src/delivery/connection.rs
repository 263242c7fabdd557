//! State of one live transport connection.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_core::{ConnectionId, Identity};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::transport::{
    CloseReason, DeliveryError, DeliveryTransport, Outgoing, ProbeMode, TransportKind,
};

/// Liveness state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LivenessState {
    /// Acknowledged its last probe (or has not been probed yet).
    Connected = 0,
    /// A probe is outstanding.
    AwaitingAck = 1,
    /// Evicted. Terminal.
    Terminated = 2,
}

impl LivenessState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connected,
            1 => Self::AwaitingAck,
            _ => Self::Terminated,
        }
    }
}

/// A connected client bound to one identity.
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Identity the connection was opened for.
    pub identity: Identity,
    /// Wall-clock time the connection opened.
    pub opened_at: DateTime<Utc>,
    transport: Box<dyn DeliveryTransport>,
    opened: Instant,
    last_ack: Mutex<Instant>,
    state: AtomicU8,
    cancel: CancellationToken,
    delivered_envelopes: AtomicU64,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a connection in the `Connected` state.
    ///
    /// `cancel` stops every task tied to this connection once cancelled.
    pub fn new(
        id: ConnectionId,
        identity: Identity,
        transport: Box<dyn DeliveryTransport>,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            identity,
            opened_at: Utc::now(),
            transport,
            opened: now,
            last_ack: Mutex::new(now),
            state: AtomicU8::new(LivenessState::Connected as u8),
            cancel,
            delivered_envelopes: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Transport kind.
    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Push envelopes to the client.
    ///
    /// Returns `false` if the transport refused them, and increments the
    /// dropped message counter.
    pub fn deliver(&self, outgoing: &Outgoing<'_>) -> bool {
        if self.state() == LivenessState::Terminated {
            return false;
        }
        match self.transport.deliver(outgoing) {
            Ok(()) => {
                let _ = self
                    .delivered_envelopes
                    .fetch_add(outgoing.len() as u64, Ordering::Relaxed);
                true
            }
            Err(error) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                debug!(
                    connection_id = %self.id,
                    identity = %self.identity,
                    envelopes = outgoing.len(),
                    %error,
                    "transport refused delivery"
                );
                false
            }
        }
    }

    /// Move to `AwaitingAck` and send a probe.
    ///
    /// Half-duplex transports acknowledge on write, which returns the
    /// connection straight to `Connected`.
    pub fn probe(&self) -> Result<ProbeMode, DeliveryError> {
        if self
            .state
            .compare_exchange(
                LivenessState::Connected as u8,
                LivenessState::AwaitingAck as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
            && self.state() == LivenessState::Terminated
        {
            return Err(DeliveryError::Closed);
        }
        let mode = self.transport.probe()?;
        if mode == ProbeMode::Acknowledged {
            self.acknowledge();
        }
        Ok(mode)
    }

    /// Record a liveness acknowledgement (pong or successful write).
    ///
    /// A terminated connection stays terminated.
    pub fn acknowledge(&self) {
        if self
            .state
            .compare_exchange(
                LivenessState::AwaitingAck as u8,
                LivenessState::Connected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
            || self.state() == LivenessState::Connected
        {
            *self.last_ack.lock() = Instant::now();
        }
    }

    /// Current liveness state.
    pub fn state(&self) -> LivenessState {
        LivenessState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `Terminated`. Returns `true` for the first caller only.
    pub fn terminate(&self) -> bool {
        self.state.swap(LivenessState::Terminated as u8, Ordering::AcqRel)
            != LivenessState::Terminated as u8
    }

    /// Ask the transport to close.
    pub fn close(&self, reason: CloseReason) {
        self.transport.close(reason);
    }

    /// Whether the connection can no longer carry envelopes.
    pub fn is_closed(&self) -> bool {
        self.state() == LivenessState::Terminated || self.transport.is_closed()
    }

    /// Token cancelled when the connection leaves the registry.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Time since the last acknowledgement (or since opening).
    pub fn last_ack_elapsed(&self) -> Duration {
        self.last_ack.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.opened.elapsed()
    }

    /// Envelopes successfully handed to the transport.
    pub fn delivered_count(&self) -> u64 {
        self.delivered_envelopes.load(Ordering::Relaxed)
    }

    /// Deliveries the transport refused.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::testing::{RecordingTransport, connection_with};
    use courier_core::Envelope;
    use serde_json::json;

    #[test]
    fn new_connection_is_connected() {
        let (conn, _log) = connection_with("alice", RecordingTransport::duplex());
        assert_eq!(conn.state(), LivenessState::Connected);
        assert_eq!(conn.kind(), TransportKind::Duplex);
        assert!(!conn.is_closed());
    }

    #[test]
    fn deliver_counts_envelopes() {
        let (conn, log) = connection_with("alice", RecordingTransport::duplex());
        let batch = vec![
            Envelope::new("b".into(), "alice".into(), json!(1)),
            Envelope::new("b".into(), "alice".into(), json!(2)),
        ];
        assert!(conn.deliver(&Outgoing::batch(&batch)));
        assert_eq!(conn.delivered_count(), 2);
        assert_eq!(log.delivered_ids().len(), 2);
    }

    #[test]
    fn refused_delivery_counts_drop() {
        let transport = RecordingTransport::duplex();
        transport.refuse(true);
        let (conn, _log) = connection_with("alice", transport);
        let env = Envelope::new("b".into(), "alice".into(), json!(1));
        assert!(!conn.deliver(&Outgoing::single(&env)));
        assert_eq!(conn.drop_count(), 1);
        assert_eq!(conn.delivered_count(), 0);
    }

    #[test]
    fn duplex_probe_awaits_ack() {
        let (conn, log) = connection_with("alice", RecordingTransport::duplex());
        assert_eq!(conn.probe().unwrap(), ProbeMode::AwaitAck);
        assert_eq!(conn.state(), LivenessState::AwaitingAck);
        assert_eq!(log.probe_count(), 1);
        conn.acknowledge();
        assert_eq!(conn.state(), LivenessState::Connected);
    }

    #[test]
    fn half_duplex_probe_acknowledges_itself() {
        let (conn, _log) = connection_with("alice", RecordingTransport::event_stream());
        assert_eq!(conn.probe().unwrap(), ProbeMode::Acknowledged);
        assert_eq!(conn.state(), LivenessState::Connected);
    }

    #[test]
    fn terminate_is_terminal() {
        let (conn, _log) = connection_with("alice", RecordingTransport::duplex());
        assert!(conn.terminate());
        assert!(!conn.terminate());
        conn.acknowledge();
        assert_eq!(conn.state(), LivenessState::Terminated);
        assert!(conn.is_closed());
        assert!(conn.probe().is_err());
    }

    #[test]
    fn terminated_connection_refuses_delivery() {
        let (conn, log) = connection_with("alice", RecordingTransport::duplex());
        let _ = conn.terminate();
        let env = Envelope::new("b".into(), "alice".into(), json!(1));
        assert!(!conn.deliver(&Outgoing::single(&env)));
        assert!(log.delivered_ids().is_empty());
    }

    #[test]
    fn close_reaches_transport() {
        let (conn, log) = connection_with("alice", RecordingTransport::duplex());
        conn.close(CloseReason::LivenessTimeout);
        assert_eq!(log.closed_with(), Some(CloseReason::LivenessTimeout));
        assert!(conn.is_closed());
    }

    #[test]
    fn acknowledge_refreshes_last_ack() {
        let (conn, _log) = connection_with("alice", RecordingTransport::duplex());
        std::thread::sleep(Duration::from_millis(5));
        let before = conn.last_ack_elapsed();
        conn.acknowledge();
        assert!(conn.last_ack_elapsed() < before);
    }
}
