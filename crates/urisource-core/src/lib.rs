//! Deduplicating, cached, retrying fetcher for URI-addressed images.
//!
//! This crate provides:
//!
//! - A stable 64-bit resource key derived from the URI string
//! - A transport policy with default headers, per-attempt timeout and an
//!   explicit retry schedule
//! - In-flight deduplication: concurrent requests for the same URI share one
//!   network operation
//! - An in-memory result cache that only ever holds successful payloads
//!
//! # Quick Start
//!
//! ```no_run
//! use urisource_core::{FetchConfig, ImageSource};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let source = ImageSource::from_config(&FetchConfig::from_env())?;
//!
//! if let Some(image) = source.fetch(Some("https://example.com/logo.png")).await? {
//!     println!("{} bytes ({:?})", image.len(), image.content_type());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `URISOURCE_RETRY_SCHEDULE_MS` | Comma-separated retry delays in ms (default: `2000,3000`) |
//! | `URISOURCE_RETRYABLE_STATUS` | Comma-separated retryable HTTP statuses (default: `408,504`) |
//! | `URISOURCE_USER_AGENT` | User-Agent header sent with every request |
//! | `URISOURCE_TIMEOUT_SECS` | Per-attempt timeout in seconds (default: 30) |
//! | `URISOURCE_MAX_REDIRECTS` | Redirects followed per request (default: 10) |
//! | `URISOURCE_CACHING` | Enable the result cache (default: true) |
//! | `URISOURCE_CACHE_VALIDITY_SECS` | Cache entry time-to-live (default: none) |
//! | `URISOURCE_CACHE_MAX_BYTES` | Cache capacity in payload bytes (default: 64 MiB) |

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod policy;
pub mod source;
pub mod transport;
pub mod types;

// Re-export main types
pub use cache::{CacheEntry, CacheError, ResultCache};
pub use coordinator::{CoordinatorStats, FetchCoordinator, FetchOutcome};
pub use error::{FetchError, FetchErrorKind, FetchResult};
pub use key::{crc64, ResourceKey};
pub use policy::{RetryDecision, RetryState, TransportPolicy};
pub use source::ImageSource;
#[cfg(feature = "reqwest-transport")]
pub use transport::ReqwestTransport;
pub use transport::{Transport, TransportError, TransportResponse};
pub use types::{
    FetchConfig, FetchRequest, HeaderList, ImagePayload, ImageRequest, DEFAULT_USER_AGENT,
};
