//! In-memory result cache.
//!
//! Holds successful payloads only; the facade never calls [`ResultCache::put`]
//! for a failed fetch, so a key whose latest fetch failed is always absent.
//!
//! Backed by `moka`, which shards internally: reads and writes for different
//! keys do not contend on a single lock. Capacity is measured in payload
//! bytes, and an optional time-to-live bounds how long an entry is served.

use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;

use crate::key::ResourceKey;
use crate::types::{FetchConfig, ImagePayload};

/// Cache storage failures. Callers treat these as non-fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("payload of {size} bytes exceeds the per-entry limit of {limit} bytes")]
    EntryTooLarge { size: u64, limit: u64 },
}

/// Cached payload.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: ImagePayload,
    pub inserted_at: DateTime<Utc>,
}

/// Successful fetch results keyed by [`ResourceKey`].
#[derive(Clone)]
pub struct ResultCache {
    entries: Cache<ResourceKey, CacheEntry>,
    max_entry_bytes: u64,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.entries.entry_count())
            .field("weighted_bytes", &self.entries.weighted_size())
            .field("max_entry_bytes", &self.max_entry_bytes)
            .finish()
    }
}

impl ResultCache {
    /// Create a cache holding up to `max_bytes` of payload.
    pub fn new(max_bytes: u64) -> Self {
        Self::build(max_bytes, max_bytes, None)
    }

    /// Create a cache from the `cache_*` settings of `config`.
    pub fn from_config(config: &FetchConfig) -> Self {
        Self::build(
            config.cache_max_bytes,
            config.cache_max_entry_bytes,
            config.cache_validity(),
        )
    }

    fn build(max_bytes: u64, max_entry_bytes: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_key: &ResourceKey, entry: &CacheEntry| {
                u32::try_from(entry.payload.len()).unwrap_or(u32::MAX)
            });
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }

        Self {
            entries: builder.build(),
            // An entry heavier than the whole cache would be evicted on insert.
            max_entry_bytes: max_entry_bytes
                .min(max_bytes)
                .min(u64::from(u32::MAX)),
        }
    }

    /// Cached payload for `key`, if present and not expired.
    pub fn get(&self, key: ResourceKey) -> Option<ImagePayload> {
        self.entries.get(&key).map(|entry| entry.payload)
    }

    /// Cached payload with its insertion time.
    pub fn get_entry(&self, key: ResourceKey) -> Option<CacheEntry> {
        self.entries.get(&key)
    }

    /// Store a successful payload. Last write wins.
    pub fn put(&self, key: ResourceKey, payload: ImagePayload) -> Result<(), CacheError> {
        let size = payload.content_length();
        if size > self.max_entry_bytes {
            return Err(CacheError::EntryTooLarge {
                size,
                limit: self.max_entry_bytes,
            });
        }

        self.entries.insert(
            key,
            CacheEntry {
                payload,
                inserted_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Remove `key`. A later fetch goes back to the network.
    pub fn invalidate(&self, key: ResourceKey) {
        self.entries.invalidate(&key);
    }

    pub fn contains(&self, key: ResourceKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Approximate number of entries.
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}
