//! Transport contract for backends.

use crate::error::TransportError;
use async_trait::async_trait;

/// The underlying call a backend makes once a request is admitted.
///
/// Implementations may block inside `call` only through
/// `tokio::task::spawn_blocking`; the broker already runs every attempt on its
/// own task.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Payload: Clone + Send + Sync + 'static;
    type Output: Send + 'static;

    async fn call(&self, payload: Self::Payload) -> Result<Self::Output, TransportError>;
}
