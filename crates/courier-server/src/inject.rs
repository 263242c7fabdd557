//! `POST /internal/deliver`: server-to-server envelope injection.
//!
//! Guarded by a static shared secret carried in a request header. With no
//! secret configured the endpoint answers 404 as if it did not exist.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use courier_core::{DEFAULT_EVENT, Envelope, EnvelopeId, Identity};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::server::AppState;

/// Header used when the configured name is not a valid header name.
pub const DEFAULT_HEADER: &str = "x-courier-secret";

/// Outcome of checking a request against the shared secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// Header present and matching.
    Granted,
    /// Header missing or wrong.
    Denied,
    /// No secret configured.
    Disabled,
}

/// Shared-secret check for the injection endpoint.
#[derive(Debug)]
pub struct InjectionGuard {
    header: HeaderName,
    secret: Option<SecretString>,
}

impl InjectionGuard {
    /// Build a guard. An empty secret disables the endpoint.
    pub fn new(header: &str, secret: Option<String>) -> Self {
        let header = HeaderName::try_from(header.to_ascii_lowercase()).unwrap_or_else(|_| {
            warn!(header, "invalid injection header name, using default");
            HeaderName::from_static(DEFAULT_HEADER)
        });
        let secret = secret.filter(|s| !s.is_empty()).map(SecretString::from);
        Self { header, secret }
    }

    /// Name of the header carrying the secret.
    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Whether the endpoint accepts requests at all.
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Check the request headers.
    pub fn authorize(&self, headers: &HeaderMap) -> Authorization {
        let Some(secret) = &self.secret else {
            return Authorization::Disabled;
        };
        let Some(presented) = headers.get(&self.header) else {
            return Authorization::Denied;
        };
        if constant_time_eq(presented.as_bytes(), secret.expose_secret().as_bytes()) {
            Authorization::Granted
        } else {
            Authorization::Denied
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Body of an injection request. `id` and `createdAt` are filled in when
/// absent.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectRequest {
    /// Envelope ID chosen by the caller.
    pub id: Option<String>,
    /// Producing identity.
    pub sender: String,
    /// Receiving identity.
    pub receiver: String,
    /// Event name; defaults to `"message"`.
    pub event: Option<String>,
    /// Application payload.
    #[serde(default)]
    pub payload: Value,
    /// Creation time chosen by the caller.
    pub created_at: Option<DateTime<Utc>>,
    /// Reconciliation token of the originating client.
    pub client_token: Option<String>,
}

impl InjectRequest {
    /// Build the envelope, or `None` when either identity is blank.
    pub fn into_envelope(self) -> Option<Envelope> {
        let sender = Identity::parse(&self.sender)?;
        let receiver = Identity::parse(&self.receiver)?;
        Some(Envelope {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .map_or_else(EnvelopeId::new, EnvelopeId::from_string),
            sender,
            receiver,
            event: self.event.unwrap_or_else(|| DEFAULT_EVENT.to_owned()),
            payload: self.payload,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            client_token: self.client_token,
        })
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// POST /internal/deliver
///
/// The body is parsed only after the secret has been checked.
pub async fn inject_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.injection.authorize(&headers) {
        Authorization::Granted => {}
        Authorization::Disabled => return StatusCode::NOT_FOUND.into_response(),
        Authorization::Denied => {
            warn!("rejected injection request with bad secret");
            return error(StatusCode::UNAUTHORIZED, "unauthorized");
        }
    }

    let request: InjectRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error(StatusCode::BAD_REQUEST, &format!("invalid envelope: {e}")),
    };
    let Some(envelope) = request.into_envelope() else {
        return error(StatusCode::BAD_REQUEST, "sender and receiver are required");
    };

    let report = state.engine.deliver_now(&envelope);
    info!(
        envelope_id = %envelope.id,
        sender = %envelope.sender,
        receiver = %envelope.receiver,
        delivered = report.delivered,
        "injected envelope"
    );
    (StatusCode::ACCEPTED, Json(report)).into_response()
}
