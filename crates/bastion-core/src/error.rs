//! Error types for the filter orchestrator.

use thiserror::Error;

use crate::filter::FilterId;

/// Errors surfaced by lifecycle operations and collaborators.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Filter id unknown to the registry.
    #[error("Filter not found: {0}")]
    FilterNotFound(FilterId),

    /// Custom filter subscription without a usable URL.
    #[error("Custom filter URL is empty")]
    InvalidUrl,

    /// Metadata or rule download failed.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Rule download did not finish in time.
    #[error("Download of filter {0} timed out")]
    Timeout(FilterId),

    /// Metadata request did not finish in time.
    #[error("Metadata request timed out")]
    MetadataTimeout,

    /// Persisted state store failure.
    #[error("State store error: {0}")]
    Store(String),

    /// Custom filter store failure.
    #[error("Custom filter error: {0}")]
    CustomFilter(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (snapshot file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, FilterError>;
