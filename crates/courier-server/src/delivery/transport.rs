//! The seam between the shared delivery core and a concrete transport.
//!
//! Registry, queues, dispatcher and liveness monitor only ever talk to a
//! [`DeliveryTransport`]. The duplex WebSocket and the half-duplex event
//! stream each provide one implementation.

use std::sync::OnceLock;

use bytes::Bytes;
use courier_core::codec::{self, CodecError};
use courier_core::Envelope;
use serde::Serialize;
use thiserror::Error;

/// Which transport a connection uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Persistent duplex WebSocket connection.
    Duplex,
    /// Server-sent event stream.
    EventStream,
}

impl TransportKind {
    /// Stable label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Duplex => "duplex",
            Self::EventStream => "event_stream",
        }
    }
}

/// Why a send to a transport failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The connection's outbound channel is full.
    #[error("outbound channel full")]
    Full,
    /// The transport has shut down.
    #[error("transport closed")]
    Closed,
    /// The payload could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// How a transport answered a liveness probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeMode {
    /// A probe went out; the peer must acknowledge it within the timeout.
    AwaitAck,
    /// The probe write itself proves liveness (half-duplex transports).
    Acknowledged,
}

/// Why the server is closing a transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The connection request carried no usable identity.
    BadRequest,
    /// The peer did not acknowledge a liveness probe in time.
    LivenessTimeout,
    /// Writing to the transport failed.
    TransportError,
    /// Evicted by the registry sweep.
    Stale,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// WebSocket close code sent to the peer.
    pub fn code(self) -> u16 {
        match self {
            Self::BadRequest => 4400,
            Self::LivenessTimeout => 4408,
            Self::Stale => 4410,
            Self::TransportError => 1011,
            Self::Shutdown => 1001,
        }
    }

    /// Human-readable close reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "identity required",
            Self::LivenessTimeout => "liveness timeout",
            Self::TransportError => "transport error",
            Self::Stale => "stale connection",
            Self::Shutdown => "server shutting down",
        }
    }
}

enum Shape<'a> {
    Batch(&'a [Envelope]),
    Single(&'a Envelope),
}

/// One outbound payload fanned out to every connection of an identity.
///
/// The compressed encoding is computed at most once, on first use, so a
/// batch sent to several duplex connections is serialized and compressed
/// only once.
pub struct Outgoing<'a> {
    shape: Shape<'a>,
    compressed: OnceLock<Bytes>,
}

impl<'a> Outgoing<'a> {
    /// A dispatcher batch.
    pub fn batch(envelopes: &'a [Envelope]) -> Self {
        Self {
            shape: Shape::Batch(envelopes),
            compressed: OnceLock::new(),
        }
    }

    /// A single envelope on the immediate path.
    pub fn single(envelope: &'a Envelope) -> Self {
        Self {
            shape: Shape::Single(envelope),
            compressed: OnceLock::new(),
        }
    }

    /// The envelopes carried, in delivery order.
    pub fn envelopes(&self) -> &'a [Envelope] {
        match self.shape {
            Shape::Batch(envelopes) => envelopes,
            Shape::Single(envelope) => std::slice::from_ref(envelope),
        }
    }

    /// Number of envelopes carried.
    pub fn len(&self) -> usize {
        self.envelopes().len()
    }

    /// Whether no envelopes are carried.
    pub fn is_empty(&self) -> bool {
        self.envelopes().is_empty()
    }

    /// zlib-compressed JSON: an array for batches, an object for singles.
    pub fn compressed(&self) -> Result<Bytes, CodecError> {
        if let Some(bytes) = self.compressed.get() {
            return Ok(bytes.clone());
        }
        let bytes = match self.shape {
            Shape::Batch(envelopes) => codec::encode_batch(envelopes)?,
            Shape::Single(envelope) => codec::encode_envelope(envelope)?,
        };
        let _ = self.compressed.set(bytes.clone());
        Ok(bytes)
    }
}

/// A live transport the delivery core can push to.
///
/// Every method is non-blocking: implementations hand frames to a bounded
/// channel drained by the transport's own writer task.
pub trait DeliveryTransport: Send + Sync {
    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Push envelopes to the peer.
    fn deliver(&self, outgoing: &Outgoing<'_>) -> Result<(), DeliveryError>;

    /// Send a liveness probe.
    fn probe(&self) -> Result<ProbeMode, DeliveryError>;

    /// Ask the writer to close the transport.
    fn close(&self, reason: CloseReason);

    /// Whether the writer side has gone away.
    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_outgoing_exposes_one_envelope() {
        let env = Envelope::new("a".into(), "b".into(), json!(1));
        let out = Outgoing::single(&env);
        assert_eq!(out.len(), 1);
        assert_eq!(out.envelopes()[0].id, env.id);
    }

    #[test]
    fn compressed_is_cached() {
        let batch = vec![Envelope::new("a".into(), "b".into(), json!(1))];
        let out = Outgoing::batch(&batch);
        let first = out.compressed().unwrap();
        let second = out.compressed().unwrap();
        assert_eq!(first, second);
        assert_eq!(codec::decode_batch(&first).unwrap().len(), 1);
    }

    #[test]
    fn single_compresses_to_object() {
        let env = Envelope::new("a".into(), "b".into(), json!(1)).with_id("m1");
        let out = Outgoing::single(&env);
        let decoded = codec::decode_envelope(&out.compressed().unwrap()).unwrap();
        assert_eq!(decoded.id.as_str(), "m1");
    }

    #[test]
    fn close_codes_are_distinct() {
        let reasons = [
            CloseReason::BadRequest,
            CloseReason::LivenessTimeout,
            CloseReason::TransportError,
            CloseReason::Stale,
            CloseReason::Shutdown,
        ];
        let mut codes: Vec<u16> = reasons.iter().map(|r| r.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), reasons.len());
        assert_eq!(CloseReason::BadRequest.code(), 4400);
    }

    #[test]
    fn kind_labels() {
        assert_eq!(TransportKind::Duplex.as_str(), "duplex");
        assert_eq!(TransportKind::EventStream.as_str(), "event_stream");
    }
}
