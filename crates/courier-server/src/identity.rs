//! Identity resolution for incoming connections.

use async_trait::async_trait;
use courier_core::Identity;

/// Turns the raw `identity` connection parameter into an [`Identity`].
///
/// Returning `None` rejects the connection.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a raw identity parameter.
    async fn resolve(&self, raw: &str) -> Option<Identity>;
}

/// Accepts any non-blank identity string as-is.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl IdentityResolver for PassthroughResolver {
    async fn resolve(&self, raw: &str) -> Option<Identity> {
        Identity::parse(raw)
    }
}
