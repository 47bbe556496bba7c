use thiserror::Error;

/// Application-wide error types for langscout.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page or posting a callback).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Host name could not be resolved.
    #[error("DNS error: {0}")]
    DnsError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Page language classification failed.
    #[error("Detection error: {0}")]
    DetectionError(String),

    /// Input rejected before it reached storage.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The scheduler gave up after too many consecutive claim failures.
    #[error("Scheduler stopped after {failures} consecutive claim failures")]
    FailureThreshold { failures: u32 },

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::DnsError(_)
            | AppError::Timeout(_)
            | AppError::DatabaseError(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if the error happened while talking to the target site.
    ///
    /// These mark the visited domain as `Error`; they never count toward the
    /// scheduler's failure threshold.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AppError::HttpError(_)
                | AppError::DnsError(_)
                | AppError::NetworkError(_)
                | AppError::Timeout(_)
        )
    }
}
