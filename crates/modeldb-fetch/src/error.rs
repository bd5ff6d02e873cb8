//! Error types for model acquisition

use modeldb_core::{ModelDbError, ModelId};
use thiserror::Error;

/// Errors that can occur while fetching one model package
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level failure (connect, timeout, body read)
    #[error("HTTP error: {message}")]
    Http { message: String, transient: bool },

    /// Server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// GitHub source override that cannot be turned into a URL
    #[error("invalid github source for model {model_id}: {reason}")]
    InvalidGithubRef { model_id: ModelId, reason: String },

    /// Object JSON carries no archive attribute
    #[error("model {0} has no archive in its ModelDB object")]
    MissingArchive(ModelId),

    /// Object JSON is missing fields or malformed
    #[error("invalid ModelDB object: {0}")]
    InvalidObject(String),

    /// Archive attribute is not valid base64
    #[error("archive decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Registry or metadata error
    #[error(transparent)]
    Core(#[from] ModelDbError),
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http { transient, .. } => *transient,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        let transient = err.is_timeout() || err.is_connect() || err.is_request() || err.is_body();
        FetchError::Http {
            message: err.to_string(),
            transient,
        }
    }
}

/// Result type for acquisition operations
pub type Result<T> = std::result::Result<T, FetchError>;
