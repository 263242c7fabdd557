//! Decoding and routing of client-sent frames.

use std::sync::Arc;

use courier_core::codec::{self, CodecError, InboundFrame};
use courier_core::Identity;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::broadcast::{DeliveryReport, ImmediateBroadcaster};
use crate::metrics::DECODE_FAILURES_TOTAL;
use crate::notify::WebhookNotifier;
use crate::store::{MessageStore, StoreError};

/// Why an inbound frame was dropped.
#[derive(Debug, Error)]
pub enum InboundError {
    /// The frame was neither compressed nor plain JSON.
    #[error(transparent)]
    Decode(#[from] CodecError),
    /// The message store refused the message.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Decode → persist → deliver → notify.
pub struct InboundDecoder {
    store: Arc<dyn MessageStore>,
    broadcaster: ImmediateBroadcaster,
    notifier: Option<WebhookNotifier>,
}

impl InboundDecoder {
    /// Create a decoder.
    pub fn new(
        store: Arc<dyn MessageStore>,
        broadcaster: ImmediateBroadcaster,
        notifier: Option<WebhookNotifier>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            notifier,
        }
    }

    /// Handle one frame sent by `sender`.
    ///
    /// Errors are already logged; callers keep the connection open.
    pub async fn handle(
        &self,
        sender: &Identity,
        frame: InboundFrame<'_>,
    ) -> Result<DeliveryReport, InboundError> {
        let message = match codec::decode_inbound(frame) {
            Ok(message) => message,
            Err(error) => {
                counter!(DECODE_FAILURES_TOTAL).increment(1);
                warn!(identity = %sender, %error, "dropping undecodable frame");
                return Err(error.into());
            }
        };
        debug!(identity = %sender, receiver = %message.receiver, "inbound message decoded");

        let envelope = match self.store.save(sender, message).await {
            Ok(envelope) => envelope,
            Err(store_error) => {
                error!(identity = %sender, error = %store_error, "failed to persist message");
                return Err(store_error.into());
            }
        };

        let report = self.broadcaster.deliver(&envelope);
        if let Some(notifier) = &self.notifier {
            let _ = notifier.notify(&envelope);
        }
        Ok(report)
    }
}
