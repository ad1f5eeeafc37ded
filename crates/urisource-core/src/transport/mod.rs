//! Outbound transport seam.
//!
//! The fetch path only needs "GET this URI with these headers". Transports do
//! not retry or interpret status codes; that is the policy layer's job.
//! Cancellation is delivered by dropping the returned future.

use async_trait::async_trait;
use bytes::Bytes;

#[cfg(feature = "reqwest-transport")]
mod http;

#[cfg(feature = "reqwest-transport")]
pub use http::ReqwestTransport;

/// Raw response from a transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failures.
///
/// Everything except [`TransportError::InvalidRequest`] is transient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("operation timed out")]
    Timeout,

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("request failed: {0}")]
    Request(String),

    /// The request could not be built or sent as given (bad header, bad
    /// redirect target). Retrying cannot change the outcome.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_))
    }
}

/// HTTP GET abstraction.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_get(
        &self,
        uri: &str,
        headers: &[(String, String)],
    ) -> Result<TransportResponse, TransportError>;
}
