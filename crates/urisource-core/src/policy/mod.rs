//! Transport policy: default headers, per-attempt timeout and retry.
//!
//! This is the ONLY place where HTTP status codes are interpreted. Transient
//! failures (transient transport errors, attempt timeouts, statuses in the
//! retry set) are absorbed and retried along the configured schedule; callers
//! only see the final outcome. A request the transport rejects as invalid
//! fails at once with `InvalidInput`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};
use crate::transport::{Transport, TransportError};
use crate::types::{FetchConfig, HeaderList, ImagePayload};

mod retry;

pub use retry::{RetryDecision, RetryState};

/// Result of one attempt.
enum Attempt {
    Done(FetchResult<ImagePayload>),
    Transient(String),
}

/// Wraps a [`Transport`] with the retry and header policy.
#[derive(Clone)]
pub struct TransportPolicy {
    transport: Arc<dyn Transport>,
    schedule: Arc<[Duration]>,
    retryable_status_codes: HashSet<u16>,
    default_headers: HeaderList,
    attempt_timeout: Duration,
}

impl std::fmt::Debug for TransportPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPolicy")
            .field("schedule", &self.schedule)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field("default_headers", &self.default_headers)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl TransportPolicy {
    pub fn new(transport: Arc<dyn Transport>, config: &FetchConfig) -> Self {
        Self {
            transport,
            schedule: config.retry_schedule().into(),
            retryable_status_codes: config.retryable_status_codes.iter().copied().collect(),
            default_headers: config
                .default_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            attempt_timeout: config.request_timeout(),
        }
    }

    /// Override the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn schedule(&self) -> &[Duration] {
        &self.schedule
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Default headers followed by per-call headers; a per-call header
    /// replaces a default of the same name.
    pub fn merge_headers(&self, overrides: &[(String, String)]) -> HeaderList {
        let mut merged: HeaderList = self
            .default_headers
            .iter()
            .filter(|(name, _)| {
                !overrides
                    .iter()
                    .any(|(other, _)| other.eq_ignore_ascii_case(name))
            })
            .cloned()
            .collect();
        merged.extend(overrides.iter().cloned());
        merged
    }

    /// Fetch `uri`, retrying transient failures.
    pub async fn fetch(
        &self,
        uri: &str,
        headers: &[(String, String)],
        cancel: &CancellationToken,
    ) -> FetchResult<ImagePayload> {
        let headers = self.merge_headers(headers);
        let mut retry = RetryState::new(Arc::clone(&self.schedule));

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(uri));
            }

            let message = match self.attempt(uri, &headers, cancel).await {
                Attempt::Done(result) => {
                    if let Err(e) = &result {
                        debug!(uri, kind = %e.kind(), attempt = retry.attempt(), "fetch finished without payload");
                    }
                    return result;
                }
                Attempt::Transient(message) => message,
            };

            match retry.record_failure() {
                RetryDecision::Retry(backoff) => {
                    warn!(
                        uri,
                        error = %message,
                        retry = retry.attempt() - 1,
                        max_retries = self.schedule.len(),
                        backoff_ms = backoff.as_millis(),
                        "retrying request"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(cancelled(uri)),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                RetryDecision::Exhausted => {
                    warn!(
                        uri,
                        error = %message,
                        attempts = retry.attempt(),
                        "giving up after transient failures"
                    );
                    return Err(FetchError::TransientNetwork {
                        uri: uri.to_string(),
                        attempts: retry.attempt(),
                        message,
                    });
                }
            }
        }
    }

    async fn attempt(
        &self,
        uri: &str,
        headers: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Attempt {
        let send = tokio::time::timeout(self.attempt_timeout, self.transport.send_get(uri, headers));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Attempt::Done(Err(cancelled(uri))),
            result = send => result,
        };

        match result {
            Err(_elapsed) => Attempt::Transient(TransportError::Timeout.to_string()),
            Ok(Err(e)) if !e.is_transient() => Attempt::Done(Err(FetchError::InvalidInput {
                uri: uri.to_string(),
                reason: e.to_string(),
            })),
            Ok(Err(e)) => Attempt::Transient(e.to_string()),
            Ok(Ok(response)) if response.is_success() => Attempt::Done(Ok(ImagePayload::new(
                response.body,
                response.content_type,
            ))),
            Ok(Ok(response)) if self.is_retryable_status(response.status) => {
                Attempt::Transient(format!("HTTP {}", response.status))
            }
            Ok(Ok(response)) => Attempt::Done(Err(FetchError::NonRetryableResponse {
                uri: uri.to_string(),
                status: response.status,
            })),
        }
    }
}

fn cancelled(uri: &str) -> FetchError {
    FetchError::Cancelled {
        uri: uri.to_string(),
    }
}
