//! Fire-and-forget webhook notification of delivered envelopes.

use std::time::Duration;

use courier_core::Envelope;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::WEBHOOK_FAILURES_TOTAL;

/// Webhook errors. Logged, never retried.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Building the client or sending the request failed.
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The endpoint answered with a non-success status.
    #[error("webhook returned status {0}")]
    Status(u16),
    /// The endpoint did not answer in time.
    #[error("webhook timed out after {0:?}")]
    Timeout(Duration),
}

/// Posts each delivered envelope as JSON to a configured URL.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    cancel: CancellationToken,
}

impl WebhookNotifier {
    /// Create a notifier. Pending notifications are abandoned once `cancel`
    /// fires.
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
            cancel,
        })
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Spawn a notification for `envelope` and return immediately.
    pub fn notify(&self, envelope: &Envelope) -> JoinHandle<()> {
        let notifier = self.clone();
        let envelope = envelope.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = notifier.cancel.cancelled() => return,
                result = tokio::time::timeout(notifier.timeout, notifier.post(&envelope)) => {
                    result.unwrap_or(Err(NotifyError::Timeout(notifier.timeout)))
                }
            };
            match result {
                Ok(()) => debug!(envelope_id = %envelope.id, "webhook notified"),
                Err(error) => {
                    counter!(WEBHOOK_FAILURES_TOTAL).increment(1);
                    warn!(
                        envelope_id = %envelope.id,
                        url = %notifier.url,
                        %error,
                        "webhook notification failed"
                    );
                }
            }
        })
    }

    async fn post(&self, envelope: &Envelope) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(envelope).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    type Received = Arc<Mutex<Vec<Value>>>;

    async fn spawn_hook(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route(
                "/hook",
                post(move |State(rx): State<Received>, body: axum::Json<Value>| async move {
                    rx.lock().push(body.0);
                    status
                }),
            )
            .with_state(Arc::clone(&received));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _ = tokio::spawn(async move { axum::serve(listener, app).await });
        (format!("http://{addr}/hook"), received)
    }

    fn envelope() -> Envelope {
        Envelope::new("alice".into(), "bob".into(), json!({"text": "hi"})).with_id("m1")
    }

    #[tokio::test]
    async fn notify_posts_envelope_json() {
        let (url, received) = spawn_hook(StatusCode::OK).await;
        let notifier =
            WebhookNotifier::new(url, Duration::from_secs(5), CancellationToken::new()).unwrap();

        notifier.notify(&envelope()).await.unwrap();

        let bodies = received.lock().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["id"], "m1");
        assert_eq!(bodies[0]["receiver"], "bob");
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let (url, _received) = spawn_hook(StatusCode::INTERNAL_SERVER_ERROR).await;
        let notifier =
            WebhookNotifier::new(url, Duration::from_secs(5), CancellationToken::new()).unwrap();
        assert_matches!(notifier.post(&envelope()).await, Err(NotifyError::Status(500)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let notifier = WebhookNotifier::new(
            format!("http://{addr}/hook"),
            Duration::from_secs(5),
            CancellationToken::new(),
        )
        .unwrap();
        assert_matches!(notifier.post(&envelope()).await, Err(NotifyError::Request(_)));
    }

    #[tokio::test]
    async fn cancelled_notifier_does_not_post() {
        let (url, received) = spawn_hook(StatusCode::OK).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let notifier = WebhookNotifier::new(url, Duration::from_secs(5), cancel).unwrap();
        notifier.notify(&envelope()).await.unwrap();
        assert!(received.lock().is_empty());
    }
}
