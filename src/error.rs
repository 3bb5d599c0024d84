//! Error types for taskeval

use thiserror::Error;

/// Main error type for taskeval
#[derive(Error, Debug)]
pub enum TaskEvalError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid model args: {0}")]
    InvalidModelArgs(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Rate limited by API, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("Max retries ({0}) exceeded: {1}")]
    MaxRetriesExceeded(u32, String),
}

/// Result type alias for taskeval
pub type Result<T> = std::result::Result<T, TaskEvalError>;
