//! Remote access error types.

use bastion_core::FilterError;
use bastion_storage::StorageError;
use thiserror::Error;

/// Errors that can occur while talking to the filter service.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Empty response body from {0}")]
    EmptyBody(String),
}

impl From<RemoteError> for FilterError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Storage(e) => e.into(),
            other => FilterError::Remote(other.to_string()),
        }
    }
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;
