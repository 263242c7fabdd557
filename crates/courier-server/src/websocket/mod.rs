//! Duplex WebSocket transport.

pub mod session;
pub mod transport;

pub use session::{ConnectParams, run_ws_session, ws_handler};
pub use transport::{WsOutbound, WsTransport};
