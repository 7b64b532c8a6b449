use thiserror::Error;

use crate::batch::FailureKind;

/// Errors from one call to the extraction service.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("service returned status {status}: {message}")]
    Service { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ExtractError {
    /// Classify this error for the retry policy. Misclassifying a kind
    /// changes retry behavior, not just a message.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ExtractError::Timeout | ExtractError::Network(_) => FailureKind::TransientNetwork,
            ExtractError::RateLimited { .. } => FailureKind::RateLimited,
            ExtractError::Malformed(_) => FailureKind::MalformedResponse,
            ExtractError::Service { .. } => FailureKind::ServiceError,
        }
    }
}

impl From<reqwest::Error> for ExtractError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExtractError::Timeout
        } else if err.is_decode() {
            ExtractError::Malformed(err.to_string())
        } else {
            ExtractError::Network(err.to_string())
        }
    }
}
