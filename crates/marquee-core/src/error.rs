use std::time::Duration;

use thiserror::Error;

/// Application-wide error types for marquee.
#[derive(Error, Debug)]
pub enum AppError {
    /// The browser could not load a page.
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// A network or browser operation exceeded its time budget.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// An expected element was absent from the rendered page.
    #[error("Selector not found: {0}")]
    SelectorNotFound(String),

    /// A venue page no longer matches what its extractor expects.
    #[error("Extraction failed for venue '{venue}': {message}")]
    Extraction { venue: String, message: String },

    /// Payload is not a decodable raster image (or is too small to be a flyer).
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// HTTP request failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Database or image file storage failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Work was abandoned because the caller cancelled it.
    #[error("Cancelled")]
    Cancelled,

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Wrap a browsing failure as an extraction error scoped to one venue.
    ///
    /// Errors that are already extraction errors pass through untouched.
    pub fn extraction(venue: &str, source: AppError) -> Self {
        match source {
            e @ AppError::Extraction { .. } => e,
            other => AppError::Extraction {
                venue: venue.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::HttpError(msg) => http_status(msg).is_some_and(|code| (500..600).contains(&code)),
            _ => false,
        }
    }

    /// Returns true if this error must end the current venue's run as `failed`.
    ///
    /// Everything else is either absorbed per candidate or degrades the run
    /// to `partial`.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, AppError::StorageError(_) | AppError::Cancelled)
    }
}

/// Status code of an `"HTTP <code> for <url>"` message.
fn http_status(msg: &str) -> Option<u16> {
    msg.strip_prefix("HTTP ")?.split_whitespace().next()?.parse().ok()
}
