//! `CourierServer`: Axum HTTP, WebSocket and SSE front end of the engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::delivery::{CloseReason, DeliveryEngine};
use crate::event_stream::sse_handler;
use crate::health::{self, HealthResponse};
use crate::identity::IdentityResolver;
use crate::inject::{InjectionGuard, inject_handler};
use crate::metrics;
use crate::notify::{NotifyError, WebhookNotifier};
use crate::shutdown::ShutdownCoordinator;
use crate::store::MessageStore;
use crate::websocket::ws_handler;

/// Errors building or starting a server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The webhook client could not be built.
    #[error("webhook notifier: {0}")]
    Notifier(#[from] NotifyError),
    /// Binding the listener failed.
    #[error("bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The delivery engine.
    pub engine: Arc<DeliveryEngine>,
    /// Maps raw `identity` parameters to identities.
    pub resolver: Arc<dyn IdentityResolver>,
    /// Shared-secret check for `/internal/deliver`.
    pub injection: Arc<InjectionGuard>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle; `/metrics` answers 404 without one.
    pub metrics: Option<PrometheusHandle>,
}

/// The Courier server.
pub struct CourierServer {
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
}

impl CourierServer {
    /// Wire the engine, notifier and handlers. Nothing runs until
    /// [`CourierServer::listen`].
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn MessageStore>,
        resolver: Arc<dyn IdentityResolver>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, ServerError> {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let notifier = config
            .webhook_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .map(|url| WebhookNotifier::new(url, config.webhook_timeout, shutdown.child_token()))
            .transpose()?;
        let engine = Arc::new(DeliveryEngine::new(
            config.engine.clone(),
            store,
            notifier,
            shutdown.token(),
        ));
        let injection = Arc::new(InjectionGuard::new(
            &config.injection_header,
            config.injection_secret.clone(),
        ));
        let state = AppState {
            engine,
            resolver,
            injection,
            config: Arc::new(config),
            start_time: Instant::now(),
            metrics,
        };
        Ok(Self { state, shutdown })
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/events", get(sse_handler))
            .route("/internal/deliver", post(inject_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind, start the engine and serve until shutdown.
    ///
    /// The returned task completes once the listener has drained and the
    /// engine's background tasks have stopped.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let config = &self.state.config;
        let addr = format!("{}:{}", config.host, config.port);
        let bind_error = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let router = self.router();
        let engine_tasks = self.state.engine.start();
        let engine = Arc::clone(&self.state.engine);
        let token = self.shutdown.token();
        info!(addr = %local_addr, "courier server listening");

        let handle = tokio::spawn(async move {
            let signal = async move {
                token.cancelled().await;
                let closed = engine.close_all(CloseReason::Shutdown);
                info!(closed, "closing connections for shutdown");
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
            {
                error!(error = %e, "server error");
            }
            let _ = futures::future::join_all(engine_tasks).await;
            info!("courier server stopped");
        });
        Ok((local_addr, handle))
    }

    /// The delivery engine.
    pub fn engine(&self) -> &Arc<DeliveryEngine> {
        &self.state.engine
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.engine.stats();
    Json(health::health_check(state.start_time, &stats))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use courier_core::{Envelope, Identity};
    use futures::StreamExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    use crate::identity::PassthroughResolver;
    use crate::store::InMemoryMessageStore;

    fn make_server_with(config: ServerConfig) -> CourierServer {
        CourierServer::new(
            config,
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(PassthroughResolver),
            None,
        )
        .unwrap()
    }

    fn make_server() -> CourierServer {
        make_server_with(ServerConfig::default())
    }

    fn with_secret() -> CourierServer {
        make_server_with(ServerConfig {
            injection_secret: Some("s3cret".into()),
            ..ServerConfig::default()
        })
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn inject_request(secret: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/internal/deliver")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header("x-courier-secret", secret);
        }
        builder.body(Body::from(body.to_owned())).unwrap()
    }

    #[tokio::test]
    async fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_reports_counters() {
        let server = make_server();
        server
            .engine()
            .publish(&Envelope::new("a".into(), "b".into(), serde_json::json!(1)));

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["queued_envelopes"], 2);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_renders_text() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = CourierServer::new(
            ServerConfig::default(),
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(PassthroughResolver),
            Some(handle),
        )
        .unwrap();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
    }

    #[tokio::test]
    async fn events_without_identity_is_400() {
        let req = Request::builder().uri("/events").body(Body::empty()).unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn events_with_blank_identity_is_400() {
        let req = Request::builder()
            .uri("/events?identity=%20")
            .body(Body::empty())
            .unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn events_stream_starts_with_connected_then_backlog() {
        let server = make_server();
        let queued = Envelope::new("alice".into(), "bob".into(), serde_json::json!("hi"))
            .with_id("m1");
        server.engine().publish(&queued);

        let req = Request::builder()
            .uri("/events?identity=bob")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, "text/event-stream");
        assert!(server.engine().registry().is_online(&Identity::from("bob")));

        let _ = server.engine().flush();
        let mut body = resp.into_body().into_data_stream();
        let mut text = String::new();
        while !text.contains("id: m1") {
            let chunk = body.next().await.unwrap().unwrap();
            text.push_str(std::str::from_utf8(&chunk).unwrap());
        }
        let connected = text.find("event: connected").unwrap();
        let message = text.find("event: message").unwrap();
        assert!(connected < message);
    }

    #[tokio::test]
    async fn dropping_event_stream_detaches() {
        let server = make_server();
        let req = Request::builder()
            .uri("/events?identity=carol")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(server.engine().registry().is_online(&Identity::from("carol")));

        drop(resp);
        assert!(!server.engine().registry().is_online(&Identity::from("carol")));
    }

    #[tokio::test]
    async fn inject_disabled_without_secret() {
        let body = r#"{"sender":"svc","receiver":"bob","payload":1}"#;
        let resp = make_server()
            .router()
            .oneshot(inject_request(Some("anything"), body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn inject_rejects_bad_secret() {
        let server = with_secret();
        let body = r#"{"sender":"svc","receiver":"bob","payload":1}"#;
        let resp = server
            .router()
            .oneshot(inject_request(Some("wrong"), body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = server.router().oneshot(inject_request(None, body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn inject_rejects_malformed_body() {
        let resp = with_secret()
            .router()
            .oneshot(inject_request(Some("s3cret"), "not json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn inject_accepts_and_queues_for_offline_receiver() {
        let server = with_secret();
        let body = r#"{"id":"m7","sender":"svc","receiver":"bob","payload":{"x":1}}"#;
        let resp = server
            .router()
            .oneshot(inject_request(Some("s3cret"), body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let parsed = body_json(resp).await;
        assert_eq!(parsed["envelopeId"], "m7");
        assert_eq!(parsed["delivered"], 0);
        assert_eq!(server.engine().registry().queued_len(&Identity::from("bob")), 1);
    }

    #[tokio::test]
    async fn listen_binds_and_shuts_down() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
