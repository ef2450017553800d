use std::path::PathBuf;

use thiserror::Error;

/// Failures of the local persistent cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("persistent storage is not available in this environment")]
    Unsupported,
    #[error("a record with key `{key}` already exists in `{collection}`")]
    KeyExists { collection: &'static str, key: String },
    #[error("record for `{collection}` has no `{key_path}` key")]
    MissingKey {
        collection: &'static str,
        key_path: &'static str,
    },
    #[error("collection `{collection}` is unreadable, moved to {}", preserved.display())]
    Corrupt {
        collection: &'static str,
        preserved: PathBuf,
        source: serde_json::Error,
    },
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error raised by the lesson data API, shaped like an HTTP failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} ({status} {status_text})")]
pub struct ApiError {
    pub message: String,
    pub status: u16,
    pub status_text: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>, status: u16, status_text: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status,
            status_text: status_text.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message, 404, "Not Found")
    }

    pub fn timeout() -> Self {
        Self::new("Request timeout", 408, "Request Timeout")
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(message, 500, "Network Error")
    }

    /// A body that could not be decoded; never retried.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(message, 422, "Invalid Response")
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Transient failures (timeouts and server errors) may be retried.
    pub fn is_retryable(&self) -> bool {
        self.status >= 500 || self.status == 408
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::timeout();
        }
        match err.status() {
            Some(status) => Self::new(
                err.to_string(),
                status.as_u16(),
                status.canonical_reason().unwrap_or_default(),
            ),
            None => Self::network(err.to_string()),
        }
    }
}

/// Failures surfaced by the sync orchestration layer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no lessons available: {0}")]
    NoLessons(ApiError),
    #[error("the portal is offline")]
    Offline,
    #[error("sync task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the configuration directory")]
    NoConfigDir,
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Error returned by a state subscriber; reported, never propagated.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;
