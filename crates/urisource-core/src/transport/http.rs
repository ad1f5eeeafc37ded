//! reqwest-backed transport.

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::redirect;
use tracing::trace;

use super::{Transport, TransportError, TransportResponse};
use crate::types::FetchConfig;

/// Production transport: pooled connections, gzip/deflate decoding and a
/// bounded redirect policy.
///
/// A redirect loop or a chain longer than `max_redirects` is not an error:
/// the last 3xx response is returned as-is.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client for the given config.
    ///
    /// Timeouts are enforced per attempt by the policy layer, so the client
    /// itself only bounds connection setup.
    pub fn new(config: &FetchConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .gzip(true)
            .deflate(true)
            .redirect(redirect_policy(config.max_redirects))
            .build()
            .map_err(|e| TransportError::Request(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn redirect_policy(max_redirects: usize) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects || attempt.previous().contains(attempt.url()) {
            attempt.stop()
        } else {
            attempt.follow()
        }
    })
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send_get(
        &self,
        uri: &str,
        headers: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self.client.get(uri);
        for (name, value) in headers {
            let (name, value) = parse_header(name, value)?;
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Body(e.to_string())
            }
        })?;

        trace!(uri, status, bytes = body.len(), "transport response");

        Ok(TransportResponse {
            status,
            content_type,
            body,
        })
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), TransportError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| TransportError::InvalidRequest(format!("header name {:?}: {}", name, e)))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| TransportError::InvalidRequest(format!("header {:?} value: {}", name, e)))?;
    Ok((header_name, header_value))
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_builder() || err.is_redirect() {
        TransportError::InvalidRequest(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}
