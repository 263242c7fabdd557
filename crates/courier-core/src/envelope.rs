//! The unit of delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{EnvelopeId, Identity};

/// Event name used when a producer does not supply one.
pub const DEFAULT_EVENT: &str = "message";

fn default_event() -> String {
    DEFAULT_EVENT.to_owned()
}

/// A message or activity event on its way from a sender to a receiver.
///
/// Envelopes are immutable once created; the engine discards them after
/// delivery and leaves durable history to the message store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Stable envelope ID.
    pub id: EnvelopeId,
    /// Identity that produced the envelope.
    pub sender: Identity,
    /// Identity (user, group or conversation) the envelope is addressed to.
    pub receiver: Identity,
    /// Application-defined event name (`"message"` for direct messages).
    #[serde(default = "default_event")]
    pub event: String,
    /// Opaque application payload.
    pub payload: Value,
    /// When the envelope was created.
    pub created_at: DateTime<Utc>,
    /// Token the client attached to its optimistic local copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

impl Envelope {
    /// Create an envelope with a fresh ID and the default event name.
    #[must_use]
    pub fn new(sender: Identity, receiver: Identity, payload: Value) -> Self {
        Self {
            id: EnvelopeId::new(),
            sender,
            receiver,
            event: default_event(),
            payload,
            created_at: Utc::now(),
            client_token: None,
        }
    }

    /// Override the event name.
    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    /// Override the envelope ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<EnvelopeId>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach a client reconciliation token.
    #[must_use]
    pub fn with_client_token(mut self, token: impl Into<String>) -> Self {
        self.client_token = Some(token.into());
        self
    }

    /// Whether the envelope was sent by an identity to itself.
    pub fn is_self_addressed(&self) -> bool {
        self.sender == self.receiver
    }

    /// Identities the envelope must reach: the receiver, then the sender
    /// (so the sender's other devices see their own outgoing message).
    pub fn targets(&self) -> Vec<&Identity> {
        if self.is_self_addressed() {
            vec![&self.receiver]
        } else {
            vec![&self.receiver, &self.sender]
        }
    }
}

/// A message decoded from a client frame, before persistence.
///
/// Carries no sender: the sender is the identity bound to the connection the
/// frame arrived on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Identity the message is addressed to.
    pub receiver: Identity,
    /// Application payload.
    pub payload: Value,
    /// Optional event name; defaults to [`DEFAULT_EVENT`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Client-side reconciliation token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

impl InboundMessage {
    /// Turn the message into an envelope sent by `sender`.
    #[must_use]
    pub fn into_envelope(self, sender: Identity) -> Envelope {
        Envelope {
            id: EnvelopeId::new(),
            sender,
            receiver: self.receiver,
            event: self.event.unwrap_or_else(default_event),
            payload: self.payload,
            created_at: Utc::now(),
            client_token: self.client_token,
        }
    }
}
