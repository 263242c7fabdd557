//! `GET /events`: one server-sent-events stream per client.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use courier_core::ConnectionId;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::transport::{SseFrame, SseTransport};
use crate::delivery::{Connection, DeliveryEngine};
use crate::server::AppState;
use crate::websocket::ConnectParams;

/// Detaches the connection when the response body is dropped.
struct Attachment {
    engine: Arc<DeliveryEngine>,
    connection: Arc<Connection>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if self.engine.detach(&self.connection) {
            debug!(conn_id = %self.connection.id, "event stream closed");
        }
    }
}

struct StreamState {
    rx: mpsc::Receiver<SseFrame>,
    pending: VecDeque<SseFrame>,
    cancel: CancellationToken,
    _attachment: Attachment,
}

fn event_stream(state: StreamState) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    futures::stream::unfold(state, |mut state| async move {
        while state.pending.is_empty() {
            let frame = tokio::select! {
                biased;
                () = state.cancel.cancelled() => None,
                frame = state.rx.recv() => frame,
            };
            state.pending.extend(frame?.into_frames());
        }
        let event = state.pending.pop_front()?.into_event()?;
        Some((Ok(event), state))
    })
}

/// GET /events?identity=…
///
/// The `connected` event is queued before the connection is registered, so
/// it always precedes any flushed backlog.
pub async fn sse_handler(
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let identity = match params.identity.as_deref() {
        Some(raw) => state.resolver.resolve(raw).await,
        None => None,
    };
    let Some(identity) = identity else {
        return (StatusCode::BAD_REQUEST, "identity required").into_response();
    };

    let (tx, rx) = mpsc::channel(state.config.outbound_buffer.max(1));
    let connection_id = ConnectionId::new();
    let _ = tx.try_send(SseFrame::connected(&connection_id, &identity));

    let engine = Arc::clone(&state.engine);
    let connection = engine.attach(connection_id, identity, Box::new(SseTransport::new(tx)));

    let stream = event_stream(StreamState {
        rx,
        pending: VecDeque::new(),
        cancel: connection.cancel_token().clone(),
        _attachment: Attachment { engine, connection },
    });
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(state.config.keepalive_interval))
        .into_response()
}
