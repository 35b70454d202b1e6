/// Error types for matching-service
///
/// Business outcomes (already_sent, quota_exhausted, ...) are not errors and
/// never travel through this type. What remains is caller mistakes,
/// infrastructure failures and integrity violations.
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;
use tracing::error;

/// Postgres SQLSTATE codes this service reacts to
const QUERY_CANCELED: &str = "57014";
const CHECK_VIOLATION: &str = "23514";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage transaction exceeded its time budget")]
    Timeout,

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|c| c.into_owned());

        match code.as_deref() {
            Some(QUERY_CANCELED) => ServiceError::Timeout,
            Some(CHECK_VIOLATION) => {
                let detail = err.to_string();
                ServiceError::integrity(format!("check constraint rejected write: {}", detail))
            }
            _ => ServiceError::Database(err),
        }
    }
}

impl ServiceError {
    /// Build an integrity violation and report it immediately.
    ///
    /// These indicate a broken invariant upstream and must never be silent.
    pub fn integrity(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        error!(detail = %detail, "integrity violation detected");
        crate::metrics::INTEGRITY_VIOLATIONS_TOTAL.inc();
        ServiceError::Integrity(detail)
    }

    /// Transient failures the caller may retry as a whole.
    ///
    /// Every mutating operation re-checks its preconditions, so a retry
    /// after an ambiguous failure cannot double-apply.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Timeout => true,
            ServiceError::Database(e) => match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
                sqlx::Error::Database(db) => matches!(
                    db.code().as_deref(),
                    Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
                ),
                _ => false,
            },
            ServiceError::Redis(e) => e.is_timeout() || e.is_connection_dropped() || e.is_io_error(),
            _ => false,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Database(_) | ServiceError::Redis(_) => "storage_unavailable",
            ServiceError::Internal(_) => "internal",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::Timeout => "timeout",
            ServiceError::Integrity(_) => "internal",
        }
    }

    /// Message safe to show to end users
    fn public_message(&self) -> String {
        match self {
            ServiceError::InvalidInput(msg) | ServiceError::NotFound(msg) => msg.clone(),
            ServiceError::Unauthorized(_) => "Please sign in again.".to_string(),
            _ if self.is_retryable() => "Something went wrong, please try again.".to_string(),
            _ => "Something went wrong on our side.".to_string(),
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ if self.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            error!(error = %self, "request failed");
        }
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.error_code(),
            "message": self.public_message(),
            "retryable": self.is_retryable(),
        }))
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
