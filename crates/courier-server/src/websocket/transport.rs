//! Duplex WebSocket implementation of [`DeliveryTransport`].

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::delivery::transport::{
    CloseReason, DeliveryError, DeliveryTransport, Outgoing, ProbeMode, TransportKind,
};

/// A frame queued for the session's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsOutbound {
    /// Compressed envelope payload, sent as a binary frame.
    Payload(Bytes),
    /// Empty Ping control frame.
    Probe,
    /// Close the socket with this reason, then stop writing.
    Close(CloseReason),
}

/// Hands frames to the writer task of one WebSocket session.
pub struct WsTransport {
    tx: mpsc::Sender<WsOutbound>,
}

impl WsTransport {
    /// Wrap the sending half of a session's outbound channel.
    pub fn new(tx: mpsc::Sender<WsOutbound>) -> Self {
        Self { tx }
    }

    fn push(&self, frame: WsOutbound) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

impl DeliveryTransport for WsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Duplex
    }

    fn deliver(&self, outgoing: &Outgoing<'_>) -> Result<(), DeliveryError> {
        let bytes = outgoing.compressed()?;
        self.push(WsOutbound::Payload(bytes))
    }

    fn probe(&self) -> Result<ProbeMode, DeliveryError> {
        self.push(WsOutbound::Probe)?;
        Ok(ProbeMode::AwaitAck)
    }

    fn close(&self, reason: CloseReason) {
        let _ = self.push(WsOutbound::Close(reason));
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
