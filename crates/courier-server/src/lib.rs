//! # courier-server
//!
//! Real-time fan-out delivery over WebSocket and server-sent events.
//!
//! - Delivery core: connection registry, bounded offline queues, a batching
//!   dispatcher, liveness probing and the immediate broadcast path
//! - `WebSocket` (duplex) and SSE (half-duplex) transports behind one
//!   [`delivery::DeliveryTransport`] trait
//! - Server-to-server injection, health and Prometheus metrics endpoints
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod delivery;
pub mod event_stream;
pub mod health;
pub mod identity;
pub mod inject;
pub mod metrics;
pub mod notify;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod websocket;

pub use config::{EngineConfig, ServerConfig};
pub use delivery::{DeliveryEngine, DeliveryReport};
pub use identity::{IdentityResolver, PassthroughResolver};
pub use server::{CourierServer, ServerError};
pub use store::{InMemoryMessageStore, MessageStore};
