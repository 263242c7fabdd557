//! # courier-core
//!
//! Foundation types shared by every Courier crate:
//!
//! - [`ids`]: branded ID newtypes ([`Identity`], [`ConnectionId`], [`EnvelopeId`])
//! - [`envelope`]: the [`Envelope`] delivery unit and the client-sent [`InboundMessage`]
//! - [`codec`]: zlib + JSON wire encoding for outbound batches and inbound frames
//! - [`logging`]: `tracing` subscriber setup and an in-memory capture layer for tests

#![deny(unsafe_code)]

pub mod codec;
pub mod envelope;
pub mod ids;
pub mod logging;

pub use codec::CodecError;
pub use envelope::{DEFAULT_EVENT, Envelope, InboundMessage};
pub use ids::{ConnectionId, EnvelopeId, Identity};
