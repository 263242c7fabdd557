//! Half-duplex server-sent-events transport.

pub mod handler;
pub mod transport;

pub use handler::sse_handler;
pub use transport::{CONNECTED_EVENT, SseFrame, SseTransport};
