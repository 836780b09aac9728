//! The byte channel the handshake runs over.
//!
//! The core asks for exactly one capability: send a request to an endpoint
//! and get the peer's reply. gRPC/HTTP/WebSocket adapters live outside this
//! repository and implement this trait.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport timeout")]
    Timeout,

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::ConnectionLost(_))
    }
}

/// Unary request/response byte channel.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, endpoint: &str, payload: &[u8]) -> Result<Vec<u8>, TransportError>;
}
