//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use bytes::Bytes;
use courier_core::codec::InboundFrame;
use courier_core::{ConnectionId, Identity};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use super::transport::{WsOutbound, WsTransport};
use crate::delivery::{CloseReason, DeliveryEngine};
use crate::server::AppState;

/// How long the writer may take to flush a final close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Query parameters of a connection request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Raw identity, resolved by the [`IdentityResolver`](crate::identity::IdentityResolver).
    pub identity: Option<String>,
}

/// GET /ws?identity=…
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let identity = match params.identity.as_deref() {
                Some(raw) => state.resolver.resolve(raw).await,
                None => None,
            };
            match identity {
                Some(identity) => {
                    run_ws_session(socket, identity, state.engine, state.config.outbound_buffer)
                        .await;
                }
                None => reject(socket).await,
            }
        })
}

fn close_message(reason: CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code(),
        reason: Utf8Bytes::from_static(reason.as_str()),
    }))
}

/// Close a socket whose request carried no usable identity.
async fn reject(mut socket: WebSocket) {
    info!("rejecting websocket without identity");
    let _ = socket.send(close_message(CloseReason::BadRequest)).await;
}

fn established_message(connection_id: &ConnectionId, identity: &Identity) -> String {
    serde_json::json!({
        "type": "connection.established",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "data": {
            "connectionId": connection_id,
            "identity": identity,
        },
    })
    .to_string()
}

/// Run a WebSocket session for a connected client.
///
/// 1. Sends a `connection.established` text frame
/// 2. Registers the connection (flushing any backlog)
/// 3. Forwards batches, probes and close requests via the writer task
/// 4. Routes inbound frames to the engine and pongs to liveness
/// 5. Unregisters on disconnect or eviction
#[instrument(skip_all, fields(identity = %identity, conn_id))]
pub async fn run_ws_session(
    socket: WebSocket,
    identity: Identity,
    engine: Arc<DeliveryEngine>,
    outbound_buffer: usize,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let connection_id = ConnectionId::new();
    let _ = tracing::Span::current().record("conn_id", connection_id.as_str());

    let established = established_message(&connection_id, &identity);
    if ws_tx.send(Message::Text(established.into())).await.is_err() {
        debug!("client went away before registration");
        return;
    }

    let (send_tx, mut send_rx) = mpsc::channel::<WsOutbound>(outbound_buffer);
    let connection = engine.attach(connection_id, identity, Box::new(WsTransport::new(send_tx)));

    let mut outbound = tokio::spawn(async move {
        while let Some(frame) = send_rx.recv().await {
            let (message, closing) = match frame {
                WsOutbound::Payload(bytes) => (Message::Binary(bytes), false),
                WsOutbound::Probe => (Message::Ping(Bytes::new()), false),
                WsOutbound::Close(reason) => (close_message(reason), true),
            };
            if ws_tx.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let cancel = connection.cancel_token().clone();
    loop {
        let next = tokio::select! {
            next = ws_rx.next() => next,
            () = cancel.cancelled() => {
                debug!("connection evicted");
                break;
            }
        };
        let Some(Ok(message)) = next else { break };
        match message {
            Message::Binary(data) => {
                let _ = engine
                    .receive(&connection.identity, InboundFrame::Binary(&data))
                    .await;
            }
            Message::Text(text) => {
                let _ = engine
                    .receive(&connection.identity, InboundFrame::Text(text.as_str()))
                    .await;
            }
            Message::Ping(_) | Message::Pong(_) => connection.acknowledge(),
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
        }
    }

    let _ = engine.detach(&connection);
    drop(connection);
    if tokio::time::timeout(CLOSE_GRACE, &mut outbound).await.is_err() {
        outbound.abort();
    }
}
