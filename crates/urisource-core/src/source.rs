//! Image source facade.
//!
//! Entry point for callers. Each fetch goes through:
//!
//! 1. Null URI: `Ok(None)`, nothing else happens
//! 2. Validation (`http`/`https` only)
//! 3. Cache lookup (when caching is enabled)
//! 4. Coordinated fetch through the transport policy, with write-through on
//!    success
//!
//! The write-through runs inside the shared fetch, before the in-flight entry
//! is released, so a caller arriving right after completion finds the cached
//! payload instead of starting a second fetch.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::cache::ResultCache;
use crate::coordinator::FetchCoordinator;
use crate::error::{FetchError, FetchResult};
use crate::key::ResourceKey;
use crate::policy::TransportPolicy;
use crate::types::{FetchConfig, FetchRequest, ImagePayload, ImageRequest};

/// Deduplicating, cached, retrying image fetcher.
///
/// Cheap to clone; clones share the coordinator and cache.
#[derive(Debug, Clone)]
pub struct ImageSource {
    policy: Arc<TransportPolicy>,
    coordinator: FetchCoordinator,
    cache: ResultCache,
    caching_enabled: bool,
}

impl ImageSource {
    /// Assemble a source from its collaborators. Caching is enabled.
    pub fn new(policy: TransportPolicy, coordinator: FetchCoordinator, cache: ResultCache) -> Self {
        Self {
            policy: Arc::new(policy),
            coordinator,
            cache,
            caching_enabled: true,
        }
    }

    /// Production wiring over [`ReqwestTransport`](crate::transport::ReqwestTransport).
    #[cfg(feature = "reqwest-transport")]
    pub fn from_config(
        config: &FetchConfig,
    ) -> Result<Self, crate::transport::TransportError> {
        let transport = crate::transport::ReqwestTransport::new(config)?;
        let policy = TransportPolicy::new(Arc::new(transport), config);
        Ok(Self::new(policy, FetchCoordinator::new(), ResultCache::from_config(config))
            .with_caching(config.caching_enabled))
    }

    /// Turn cache reads and writes on or off. In-flight dedup is unaffected.
    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    pub fn caching_enabled(&self) -> bool {
        self.caching_enabled
    }

    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Fetch `uri` with no extra headers and no cancellation.
    pub async fn fetch(&self, uri: Option<&str>) -> FetchResult<Option<ImagePayload>> {
        let request = match uri {
            Some(uri) => ImageRequest::new(uri),
            None => ImageRequest::empty(),
        };
        self.fetch_with(request).await
    }

    /// Fetch an image.
    ///
    /// Returns `Ok(None)` when the request carries no URI.
    pub async fn fetch_with(&self, request: ImageRequest) -> FetchResult<Option<ImagePayload>> {
        let Some(request) = prepare(request)? else {
            return Ok(None);
        };

        if request.cancellation.is_cancelled() {
            return Err(FetchError::Cancelled { uri: request.uri });
        }

        if self.caching_enabled {
            if let Some(payload) = self.cache.get(request.key) {
                debug!(key = %request.key, uri = %request.uri, bytes = payload.len(), "cache hit");
                return Ok(Some(payload));
            }
        }

        let FetchRequest {
            key,
            uri,
            headers,
            cancellation,
        } = request;

        let policy = Arc::clone(&self.policy);
        let cache = self.caching_enabled.then(|| self.cache.clone());
        let fetch_uri = uri.clone();

        let outcome = self
            .coordinator
            .acquire_or_join(key, &uri, &cancellation, move |token| async move {
                let outcome = policy.fetch(&fetch_uri, &headers, &token).await;
                if let (Ok(payload), Some(cache)) = (&outcome, cache) {
                    store(&cache, key, &fetch_uri, payload.clone());
                }
                outcome
            })
            .await;

        match outcome {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                warn!(%key, %uri, kind = %e.kind(), error = %e, "image fetch failed");
                Err(e)
            }
        }
    }

    /// Drop the cached payload for `uri`, if any.
    pub fn invalidate(&self, uri: &str) {
        self.cache.invalidate(ResourceKey::from_uri(uri));
    }
}

fn store(cache: &ResultCache, key: ResourceKey, uri: &str, payload: ImagePayload) {
    match cache.put(key, payload) {
        Ok(()) => debug!(%key, uri, "cached payload"),
        Err(e) => warn!(%key, uri, error = %e, "payload not cached"),
    }
}

/// Validate a caller request. `None` means there is nothing to fetch.
fn prepare(request: ImageRequest) -> FetchResult<Option<FetchRequest>> {
    let ImageRequest {
        uri,
        headers,
        cancellation,
    } = request;

    let Some(uri) = uri else {
        return Ok(None);
    };

    validate_uri(&uri)?;

    Ok(Some(FetchRequest {
        key: ResourceKey::from_uri(&uri),
        uri,
        headers,
        cancellation: cancellation.unwrap_or_else(CancellationToken::new),
    }))
}

fn validate_uri(uri: &str) -> FetchResult<()> {
    let parsed = Url::parse(uri).map_err(|e| FetchError::InvalidInput {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(FetchError::InvalidInput {
            uri: uri.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}
