//! Typed error conditions that callers need to match on.
//!
//! Everything else in the crate uses `anyhow`. These two enums mark the only
//! conditions that end a run with a non-zero exit: bad configuration and an
//! exhausted API quota.

use thiserror::Error;

/// Errors raised by the API client that must not be degraded to "no data".
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The API reported zero remaining requests.
    #[error("GitHub API rate limit exceeded. Resets at {reset}")]
    RateLimitExceeded { reset: String },

    /// The response body was not the JSON the caller asked for.
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl FetchError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, FetchError::RateLimitExceeded { .. })
    }
}

/// Returns true when an `anyhow` error chain carries a rate-limit abort.
pub fn is_rate_limit(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<FetchError>())
        .any(FetchError::is_rate_limit)
}

/// Configuration problems detected before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(String),

    #[error("{key} must be {expected}, got '{value}'")]
    Invalid {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("unknown module '{0}'. Must be github-statistics or dependabot")]
    UnknownModule(String),
}
