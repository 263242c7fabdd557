//! Message persistence collaborator.
//!
//! The engine persists every inbound message before delivering it but keeps
//! no history itself. Durable storage lives behind [`MessageStore`].

use async_trait::async_trait;
use courier_core::{Envelope, Identity, InboundMessage};
use parking_lot::Mutex;
use thiserror::Error;

/// Errors returned by a message store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store refused the message (validation, authorization).
    #[error("message rejected: {0}")]
    Rejected(String),
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persists inbound messages and assigns their envelope identity.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message sent by `sender` and return the stored envelope.
    async fn save(
        &self,
        sender: &Identity,
        message: InboundMessage,
    ) -> Result<Envelope, StoreError>;
}

/// Process-local store, for development and tests.
#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: Mutex<Vec<Envelope>>,
}

impl InMemoryMessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored envelopes.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Envelopes exchanged between two identities, oldest first.
    pub fn conversation(&self, a: &Identity, b: &Identity) -> Vec<Envelope> {
        self.messages
            .lock()
            .iter()
            .filter(|e| {
                (&e.sender == a && &e.receiver == b) || (&e.sender == b && &e.receiver == a)
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save(
        &self,
        sender: &Identity,
        message: InboundMessage,
    ) -> Result<Envelope, StoreError> {
        let envelope = message.into_envelope(sender.clone());
        self.messages.lock().push(envelope.clone());
        Ok(envelope)
    }
}
