//! Request, payload and configuration types.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::key::ResourceKey;

/// Ordered list of `(name, value)` header pairs.
pub type HeaderList = Vec<(String, String)>;

/// Identifying client string sent when nothing else is configured.
///
/// Some image hosts reject requests without a browser-like User-Agent.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 AppleWebKit Chrome Mobile Safari";

/// Fetched image bytes.
///
/// The body is a shared immutable buffer: cloning is cheap and every caller
/// that joined the same fetch reads its own independent view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    bytes: Bytes,
    content_type: Option<String>,
}

impl ImagePayload {
    pub fn new(bytes: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_length(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Readable stream positioned at the start of the payload.
    pub fn reader(&self) -> impl std::io::Read {
        self.bytes.clone().reader()
    }
}

/// Caller-facing request for a single image.
#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    pub uri: Option<String>,
    pub headers: HeaderList,
    pub cancellation: Option<CancellationToken>,
}

impl ImageRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Default::default()
        }
    }

    /// Request without a URI; fetching it is a no-op.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Validated per-call request handed from the facade to the fetch path.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub key: ResourceKey,
    pub uri: String,
    pub headers: HeaderList,
    pub cancellation: CancellationToken,
}

/// Fetch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Delays before each retry, in milliseconds. Its length bounds the
    /// number of retries.
    #[serde(default = "default_retry_schedule_ms")]
    pub retry_schedule_ms: Vec<u64>,

    /// HTTP statuses treated as transient.
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,

    /// Headers attached to every request unless overridden per call.
    #[serde(default = "default_headers")]
    pub default_headers: BTreeMap<String, String>,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,

    /// Redirects followed before giving up.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Whether successful payloads are cached.
    #[serde(default = "default_true")]
    pub caching_enabled: bool,

    /// Cache TTL in seconds. `None` keeps entries for the process lifetime.
    #[serde(default)]
    pub cache_validity_secs: Option<u64>,

    /// Total cached payload bytes.
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: u64,

    /// Largest single payload the cache accepts.
    #[serde(default = "default_cache_max_entry_bytes")]
    pub cache_max_entry_bytes: u64,
}

fn default_retry_schedule_ms() -> Vec<u64> {
    vec![2000, 3000]
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![408, 504]
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string())])
}

fn default_timeout() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_cache_max_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_cache_max_entry_bytes() -> u64 {
    16 * 1024 * 1024
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry_schedule_ms: default_retry_schedule_ms(),
            retryable_status_codes: default_retryable_status_codes(),
            default_headers: default_headers(),
            request_timeout_secs: default_timeout(),
            max_redirects: default_max_redirects(),
            caching_enabled: true,
            cache_validity_secs: None,
            cache_max_bytes: default_cache_max_bytes(),
            cache_max_entry_bytes: default_cache_max_entry_bytes(),
        }
    }
}

impl FetchConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `URISOURCE_RETRY_SCHEDULE_MS` | Comma-separated retry delays |
    /// | `URISOURCE_RETRYABLE_STATUS` | Comma-separated HTTP statuses |
    /// | `URISOURCE_USER_AGENT` | User-Agent header value |
    /// | `URISOURCE_TIMEOUT_SECS` | Per-attempt timeout |
    /// | `URISOURCE_MAX_REDIRECTS` | Redirect limit |
    /// | `URISOURCE_CACHING` | `0`/`false` disables caching |
    /// | `URISOURCE_CACHE_VALIDITY_SECS` | Cache TTL |
    /// | `URISOURCE_CACHE_MAX_BYTES` | Cache capacity |
    ///
    /// Unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(schedule) = env_list::<u64>("URISOURCE_RETRY_SCHEDULE_MS") {
            config.retry_schedule_ms = schedule;
        }
        if let Some(codes) = env_list::<u16>("URISOURCE_RETRYABLE_STATUS") {
            config.retryable_status_codes = codes;
        }
        if let Ok(agent) = std::env::var("URISOURCE_USER_AGENT") {
            if !agent.is_empty() {
                config = config.with_default_header("User-Agent", agent);
            }
        }
        if let Some(secs) = env_parse::<u64>("URISOURCE_TIMEOUT_SECS") {
            config.request_timeout_secs = secs.max(1);
        }
        if let Some(max) = env_parse("URISOURCE_MAX_REDIRECTS") {
            config.max_redirects = max;
        }
        if let Ok(v) = std::env::var("URISOURCE_CACHING") {
            config.caching_enabled = !(v == "0" || v.eq_ignore_ascii_case("false"));
        }
        if let Some(secs) = env_parse("URISOURCE_CACHE_VALIDITY_SECS") {
            config.cache_validity_secs = Some(secs);
        }
        if let Some(bytes) = env_parse("URISOURCE_CACHE_MAX_BYTES") {
            config.cache_max_bytes = bytes;
        }

        config
    }

    pub fn retry_schedule(&self) -> Vec<Duration> {
        self.retry_schedule_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    /// Per-attempt timeout, never shorter than one second.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn cache_validity(&self) -> Option<Duration> {
        self.cache_validity_secs.map(Duration::from_secs)
    }

    /// Set the retry schedule.
    pub fn with_retry_schedule(mut self, schedule: &[Duration]) -> Self {
        self.retry_schedule_ms = schedule
            .iter()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .collect();
        self
    }

    /// Set the retryable status codes.
    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Add or replace a default header (names compare case-insensitively).
    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.default_headers
            .retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
        self.default_headers.insert(name, value.into());
        self
    }

    /// Drop every default header, including the User-Agent.
    pub fn without_default_headers(mut self) -> Self {
        self.default_headers.clear();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    pub fn with_cache_validity(mut self, validity: Option<Duration>) -> Self {
        self.cache_validity_secs = validity.map(|d| d.as_secs());
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_list<T: std::str::FromStr>(name: &str) -> Option<Vec<T>> {
    let raw = std::env::var(name).ok()?;
    if raw.trim().is_empty() {
        return Some(Vec::new());
    }
    raw.split(',')
        .map(|part| part.trim().parse().ok())
        .collect()
}
