//! Half-duplex server-sent-events implementation of [`DeliveryTransport`].

use axum::response::sse::Event;
use courier_core::codec::CodecError;
use courier_core::{ConnectionId, Envelope, Identity};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::delivery::transport::{
    CloseReason, DeliveryError, DeliveryTransport, Outgoing, ProbeMode, TransportKind,
};

/// Name of the first event on every stream.
pub const CONNECTED_EVENT: &str = "connected";

/// An item queued for an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// A named event carrying JSON data.
    Named {
        /// `event:` field.
        event: String,
        /// `id:` field.
        id: Option<String>,
        /// `data:` field.
        data: String,
    },
    /// Several events that share one channel slot, in order.
    Batch(Vec<SseFrame>),
    /// Keep-alive comment used as the liveness probe.
    Probe,
    /// End the stream.
    Close,
}

/// Strip characters the SSE field syntax cannot carry.
fn field_value(raw: &str) -> String {
    raw.chars()
        .map(|c| if matches!(c, '\r' | '\n' | '\0') { ' ' } else { c })
        .collect()
}

impl SseFrame {
    /// One envelope as an event named after `envelope.event`.
    pub fn envelope(envelope: &Envelope) -> Result<Self, CodecError> {
        let data = serde_json::to_string(envelope).map_err(CodecError::Serialize)?;
        Ok(Self::Named {
            event: field_value(&envelope.event),
            id: Some(field_value(envelope.id.as_str())),
            data,
        })
    }

    /// The synthetic `connected` event.
    pub fn connected(connection_id: &ConnectionId, identity: &Identity) -> Self {
        let data = serde_json::json!({
            "connectionId": connection_id,
            "identity": identity,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        Self::Named {
            event: CONNECTED_EVENT.to_owned(),
            id: None,
            data: data.to_string(),
        }
    }

    /// Flatten into single-event frames, expanding any `Batch`.
    pub fn into_frames(self) -> Vec<Self> {
        match self {
            Self::Batch(frames) => frames.into_iter().flat_map(Self::into_frames).collect(),
            frame => vec![frame],
        }
    }

    /// Render as an axum SSE event. `Close` renders as `None`, as does a
    /// `Batch` that was not expanded with [`SseFrame::into_frames`].
    pub fn into_event(self) -> Option<Event> {
        match self {
            Self::Named { event, id, data } => {
                let rendered = Event::default().event(event).data(data);
                Some(match id {
                    Some(id) => rendered.id(id),
                    None => rendered,
                })
            }
            Self::Probe => Some(Event::default().comment("probe")),
            Self::Close | Self::Batch(_) => None,
        }
    }
}

fn map_send_error<T>(error: TrySendError<T>) -> DeliveryError {
    match error {
        TrySendError::Full(_) => DeliveryError::Full,
        TrySendError::Closed(_) => DeliveryError::Closed,
    }
}

/// Hands events to one open event stream.
pub struct SseTransport {
    tx: mpsc::Sender<SseFrame>,
}

impl SseTransport {
    /// Wrap the sending half of a stream's channel.
    pub fn new(tx: mpsc::Sender<SseFrame>) -> Self {
        Self { tx }
    }
}

impl DeliveryTransport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::EventStream
    }

    /// Queues one event per envelope. A batch takes a single channel slot,
    /// so it is sent whole or not at all whatever its size.
    fn deliver(&self, outgoing: &Outgoing<'_>) -> Result<(), DeliveryError> {
        let mut frames = outgoing
            .envelopes()
            .iter()
            .map(SseFrame::envelope)
            .collect::<Result<Vec<_>, _>>()?;
        let frame = if frames.len() == 1 {
            frames.swap_remove(0)
        } else {
            SseFrame::Batch(frames)
        };
        self.tx.try_send(frame).map_err(map_send_error)
    }

    fn probe(&self) -> Result<ProbeMode, DeliveryError> {
        self.tx.try_send(SseFrame::Probe).map_err(map_send_error)?;
        Ok(ProbeMode::Acknowledged)
    }

    fn close(&self, _reason: CloseReason) {
        let _ = self.tx.try_send(SseFrame::Close);
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
