//! Error types for cfscout

use thiserror::Error;

use crate::client::RequestType;

/// Result type alias for cfscout operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for upstream control-plane operations
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Process exit code used when the control-plane accessor hits an
/// out-of-memory class failure. Retrying in that state risks corrupted
/// caches, so the process terminates instead.
pub const EXIT_CODE_ACCESSOR_OUT_OF_MEMORY: i32 = 162;

/// Top-level error type for the application
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Other(String),
}

/// Errors raised by calls against the upstream control-plane API.
///
/// The taxonomy matters for the caching layer: timeouts evict the
/// cached entry immediately, while other upstream failures stay cached
/// until natural expiry. All variants are `Clone` because a cached
/// failure is propagated to every reader of that cache slot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("request {request_type} for key '{key}' timed out after {timeout_ms}ms")]
    Timeout {
        request_type: RequestType,
        key: String,
        timeout_ms: u64,
    },

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    #[error("control-plane accessor ran out of memory: {0}")]
    OutOfMemory(String),
}

impl ApiError {
    /// Timeouts get special treatment: bounded retry in the fetcher and
    /// immediate eviction in the cache.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout { .. })
    }

    /// Out-of-memory class failures are fatal and must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::OutOfMemory(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network("request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Network("failed to connect to the control-plane API".to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found")]
    NotFound,

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to save configuration: {0}")]
    SaveError(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
