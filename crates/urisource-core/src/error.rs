//! Error types for the image fetch path.

/// Coarse classification of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    Cancelled,
    TransientNetworkFailure,
    NonRetryableResponse,
    InvalidInput,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::TransientNetworkFailure => write!(f, "transient_network_failure"),
            Self::NonRetryableResponse => write!(f, "non_retryable_response"),
            Self::InvalidInput => write!(f, "invalid_input"),
        }
    }
}

/// Fetch errors.
///
/// `Clone` because a single outcome is delivered to every caller that joined
/// the same in-flight fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The caller's cancellation signal fired before or while waiting.
    #[error("fetch cancelled: {uri}")]
    Cancelled { uri: String },

    /// Connection-level or timeout failure that persisted through every retry.
    #[error("network error fetching {uri} after {attempts} attempt(s): {message}")]
    TransientNetwork {
        uri: String,
        attempts: u32,
        message: String,
    },

    /// HTTP status outside the retry set (404, 403, 500, ...).
    #[error("HTTP {status} fetching {uri}")]
    NonRetryableResponse { uri: String, status: u16 },

    /// Malformed or unusable URI.
    #[error("invalid URI {uri:?}: {reason}")]
    InvalidInput { uri: String, reason: String },
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Cancelled { .. } => FetchErrorKind::Cancelled,
            Self::TransientNetwork { .. } => FetchErrorKind::TransientNetworkFailure,
            Self::NonRetryableResponse { .. } => FetchErrorKind::NonRetryableResponse,
            Self::InvalidInput { .. } => FetchErrorKind::InvalidInput,
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput { .. } => 1,
            Self::NonRetryableResponse { .. } => 3,
            Self::TransientNetwork { .. } => 5,
            Self::Cancelled { .. } => 130,
        }
    }

    /// Whether a later call for the same URI may succeed.
    ///
    /// Failures are never cached, so this is a hint for UI retry affordances
    /// rather than something the fetch path acts on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. })
    }

    /// URI the failed fetch was for.
    pub fn uri(&self) -> &str {
        match self {
            Self::Cancelled { uri }
            | Self::TransientNetwork { uri, .. }
            | Self::NonRetryableResponse { uri, .. }
            | Self::InvalidInput { uri, .. } => uri,
        }
    }
}

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;
