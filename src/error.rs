//! Application-wide error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Application-wide error type.
///
/// Every variant maps to an HTTP status via [`AppError::status_code`] and to a
/// stable machine-readable code via [`AppError::error_code`] so clients can
/// branch on the failure without parsing messages.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("request deadline of {deadline_ms}ms is too short to admit safely")]
    DeadlineTooShort { deadline_ms: u64 },

    #[error("rate limit cache operation failed: {0}")]
    RateLimitCacheFailure(String),

    #[error("request was cancelled")]
    Cancelled,

    #[error("decode failed and is not recoverable: {0}")]
    DecodeFatal(String),

    #[error("failed to store a batch of {entity} rows: {source}")]
    StoreBatchFailed {
        entity: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("sync has no folders to process")]
    SyncNoFolders,

    #[error("sync response failed validation: {0}")]
    SyncValidationFailed(String),

    #[error("release backfill could not be enqueued for any missing release, sync will retry on the next trigger")]
    SyncReleaseBackfillUnavailable,

    #[error("discarded a stale sync state for user {user_id}")]
    SyncStaleStateDiscarded { user_id: Uuid },

    #[error("database query failed: {0}")]
    DatabaseQueryFailed(#[from] sqlx::Error),

    #[error("database constraint violation: {0}")]
    DatabaseConstraintViolation(String),

    #[error("redis operation failed: {0}")]
    RedisOperationFailed(#[from] redis::RedisError),

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("invalid value for field '{field}': {message}")]
    InvalidFieldValue { field: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::DeadlineTooShort { .. } => StatusCode::BAD_REQUEST,
            AppError::RateLimitCacheFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Cancelled => StatusCode::CONFLICT,
            AppError::DecodeFatal(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::StoreBatchFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::SyncNoFolders => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::SyncValidationFailed(_) => StatusCode::BAD_REQUEST,
            AppError::SyncReleaseBackfillUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SyncStaleStateDiscarded { .. } => StatusCode::CONFLICT,
            AppError::DatabaseQueryFailed(e) => match e {
                sqlx::Error::RowNotFound => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::DatabaseConstraintViolation(_) => StatusCode::CONFLICT,
            AppError::RedisOperationFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::InvalidFieldValue { .. } => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::DeadlineTooShort { .. } => "DEADLINE_TOO_SHORT",
            AppError::RateLimitCacheFailure(_) => "RATE_LIMIT_CACHE_FAILURE",
            AppError::Cancelled => "CANCELLED",
            AppError::DecodeFatal(_) => "DECODE_FATAL",
            AppError::StoreBatchFailed { .. } => "STORE_BATCH_FAILED",
            AppError::SyncNoFolders => "SYNC_NO_FOLDERS",
            AppError::SyncValidationFailed(_) => "SYNC_VALIDATION_FAILED",
            AppError::SyncReleaseBackfillUnavailable => "SYNC_RELEASE_BACKFILL_UNAVAILABLE",
            AppError::SyncStaleStateDiscarded { .. } => "SYNC_STALE_STATE_DISCARDED",
            AppError::DatabaseQueryFailed(_) => "DATABASE_QUERY_FAILED",
            AppError::DatabaseConstraintViolation(_) => "DATABASE_CONSTRAINT_VIOLATION",
            AppError::RedisOperationFailed(_) => "REDIS_OPERATION_FAILED",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::InvalidFieldValue { .. } => "INVALID_FIELD_VALUE",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    /// Classifies an sqlx error arriving from a batch upsert into a [`StoreBatchFailed`]
    /// so the caller keeps the name of the entity the batch was writing.
    pub fn store_batch(entity: impl Into<String>, source: sqlx::Error) -> Self {
        match &source {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() || db_err.is_foreign_key_violation() => {
                AppError::DatabaseConstraintViolation(db_err.message().to_string())
            }
            _ => AppError::StoreBatchFailed {
                entity: entity.into(),
                source,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub correlation_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let correlation_id = Uuid::new_v4().to_string();
        let status = self.status_code();

        match status {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE => {
                tracing::error!(correlation_id = %correlation_id, error = %self, "request failed");
            }
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                tracing::warn!(correlation_id = %correlation_id, error = %self, "request rejected");
            }
            _ => {
                tracing::info!(correlation_id = %correlation_id, error = %self, "request rejected");
            }
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: self.error_code(),
            correlation_id,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_too_short_maps_to_bad_request() {
        let err = AppError::DeadlineTooShort { deadline_ms: 200 };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "DEADLINE_TOO_SHORT");
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = AppError::NotFound {
            resource: "sync state".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn sync_stale_state_maps_to_conflict() {
        let err = AppError::SyncStaleStateDiscarded {
            user_id: Uuid::nil(),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
