use thiserror::Error;

/// Application-wide error types for Grantline.
#[derive(Error, Debug)]
pub enum AppError {
    /// A URL failed syntactic validation before any network call was made.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// HTTP request failed or returned a non-2xx status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A fetch was aborted after its configured duration (milliseconds).
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Every extraction tier failed for a URL.
    #[error("Scraping failed - all methods exhausted")]
    TiersExhausted,

    /// Unknown source id on a by-id operation.
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// A job failed every configured attempt.
    #[error("Job failed after {attempts} attempts: {last_error}")]
    RetryExceeded { attempts: u32, last_error: String },

    /// A feed, JSON payload or document could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The AI enrichment service call failed.
    #[error("Enrichment error: {0}")]
    EnrichmentError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::DatabaseError(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true for the errors that count as a failed fetch
    /// (network failure, non-2xx response or timeout).
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            AppError::HttpError(_) | AppError::NetworkError(_) | AppError::Timeout(_)
        )
    }
}
