//! In-memory transport for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use courier_core::{ConnectionId, Identity};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::connection::Connection;
use super::transport::{
    CloseReason, DeliveryError, DeliveryTransport, Outgoing, ProbeMode, TransportKind,
};

/// What a [`RecordingTransport`] has seen.
#[derive(Default)]
pub(crate) struct TransportLog {
    frames: Mutex<Vec<Vec<String>>>,
    probes: AtomicUsize,
    refuse: AtomicBool,
    closed: Mutex<Option<CloseReason>>,
}

impl TransportLog {
    /// Envelope IDs per delivered frame.
    pub(crate) fn frames(&self) -> Vec<Vec<String>> {
        self.frames.lock().clone()
    }

    /// Every delivered envelope ID, in order.
    pub(crate) fn delivered_ids(&self) -> Vec<String> {
        self.frames.lock().iter().flatten().cloned().collect()
    }

    pub(crate) fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn closed_with(&self) -> Option<CloseReason> {
        *self.closed.lock()
    }

    /// Make every later delivery fail with [`DeliveryError::Full`].
    pub(crate) fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

pub(crate) struct RecordingTransport {
    kind: TransportKind,
    log: Arc<TransportLog>,
}

impl RecordingTransport {
    pub(crate) fn duplex() -> Self {
        Self {
            kind: TransportKind::Duplex,
            log: Arc::default(),
        }
    }

    pub(crate) fn event_stream() -> Self {
        Self {
            kind: TransportKind::EventStream,
            log: Arc::default(),
        }
    }

    pub(crate) fn refuse(&self, refuse: bool) {
        self.log.refuse(refuse);
    }

    pub(crate) fn log(&self) -> Arc<TransportLog> {
        Arc::clone(&self.log)
    }
}

impl DeliveryTransport for RecordingTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn deliver(&self, outgoing: &Outgoing<'_>) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        if self.log.refuse.load(Ordering::SeqCst) {
            return Err(DeliveryError::Full);
        }
        let ids = outgoing
            .envelopes()
            .iter()
            .map(|e| e.id.as_str().to_owned())
            .collect();
        self.log.frames.lock().push(ids);
        Ok(())
    }

    fn probe(&self) -> Result<ProbeMode, DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        let _ = self.log.probes.fetch_add(1, Ordering::SeqCst);
        Ok(match self.kind {
            TransportKind::Duplex => ProbeMode::AwaitAck,
            TransportKind::EventStream => ProbeMode::Acknowledged,
        })
    }

    fn close(&self, reason: CloseReason) {
        let mut closed = self.log.closed.lock();
        if closed.is_none() {
            *closed = Some(reason);
        }
    }

    fn is_closed(&self) -> bool {
        self.log.closed.lock().is_some()
    }
}

/// Wrap a recording transport in a fresh connection for `identity`.
pub(crate) fn connection_with(
    identity: &str,
    transport: RecordingTransport,
) -> (Arc<Connection>, Arc<TransportLog>) {
    let log = transport.log();
    let conn = Connection::new(
        ConnectionId::new(),
        Identity::from(identity),
        Box::new(transport),
        CancellationToken::new(),
    );
    (Arc::new(conn), log)
}
