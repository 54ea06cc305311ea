use crate::models::ErrorResponse;
use thiserror::Error;

/// Service-level error taxonomy. Transient upstream trouble is absorbed into
/// graceful degradation wherever a backup record exists; only the variants
/// below ever reach a caller.
#[derive(Clone, Debug, Error)]
pub enum ServiceError {
    #[error("Resource with ID '{0}' was not found")]
    NotFound(String),
    #[error("{0}")]
    SourceUnavailable(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Malformed(String),
    #[error("{0}")]
    Internal(String),
    #[error("#TODO {0}")]
    NotImplemented(String),
}

impl ServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::NotFound(_) => 404,
            ServiceError::Timeout(_) => 408,
            ServiceError::SourceUnavailable(_)
            | ServiceError::Malformed(_)
            | ServiceError::Internal(_) => 500,
            ServiceError::NotImplemented(_) => 501,
        }
    }

    pub fn error_label(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "Not Found",
            ServiceError::Timeout(_) => "Request Timeout",
            ServiceError::SourceUnavailable(_)
            | ServiceError::Malformed(_)
            | ServiceError::Internal(_) => "Internal Server Error",
            ServiceError::NotImplemented(_) => "Not Implemented",
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            status_code: self.status_code(),
            error: self.error_label().to_string(),
            message: self.to_string(),
        }
    }
}
