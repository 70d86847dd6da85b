use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::StoreError;
use crate::feedback::FeedbackError;
use crate::governance::GovernanceError;
use crate::session::SessionError;
use crate::tokens::LedgerError;

/// Failure classes shared by every domain error.
///
/// `Validation` and `State` go back to the caller verbatim. `Resource` is retryable at
/// the same stage. `Invariant` is an operational alert and never user-facing detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    State,
    Resource,
    Invariant,
    Internal,
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Generation timed out: {0}")]
    Timeout(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn classified(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Validation => AppError::Validation(message),
            ErrorKind::NotFound => AppError::NotFound(message),
            ErrorKind::State => AppError::Conflict(message),
            ErrorKind::Resource => AppError::Upstream(message),
            ErrorKind::Invariant => AppError::InvariantViolation(message),
            ErrorKind::Internal => AppError::Internal(anyhow::anyhow!(message)),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Store(e) => AppError::Store(e),
            other => AppError::classified(other.kind(), other.to_string()),
        }
    }
}

impl From<FeedbackError> for AppError {
    fn from(err: FeedbackError) -> Self {
        match err {
            FeedbackError::Store(e) => AppError::Store(e),
            FeedbackError::Ledger(e) => e.into(),
            other => AppError::classified(other.kind(), other.to_string()),
        }
    }
}

impl From<GovernanceError> for AppError {
    fn from(err: GovernanceError) -> Self {
        match err {
            GovernanceError::Store(e) => AppError::Store(e),
            other => AppError::classified(other.kind(), other.to_string()),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Store(e) => AppError::Store(e),
            SessionError::Ledger(e) => e.into(),
            SessionError::Governance(e) => e.into(),
            SessionError::GenerationTimeout { .. } => AppError::Timeout(err.to_string()),
            other => AppError::classified(other.kind(), other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "STATE_ERROR", msg.clone()),
            AppError::Timeout(msg) => {
                tracing::warn!("Generation timeout: {msg}");
                (StatusCode::GATEWAY_TIMEOUT, "GENERATION_TIMEOUT", msg.clone())
            }
            AppError::Upstream(msg) => {
                tracing::error!("Upstream error: {msg}");
                (StatusCode::BAD_GATEWAY, "GENERATION_ERROR", msg.clone())
            }
            AppError::InvariantViolation(msg) => {
                tracing::error!(alert = "invariant_violation", "Invariant violation: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INVARIANT_VIOLATION",
                    "Operation disabled pending manual reconciliation".to_string(),
                )
            }
            AppError::Store(StoreError::Conflict(msg)) => {
                (StatusCode::CONFLICT, "STATE_ERROR", format!("Conflicting write: {msg}"))
            }
            AppError::Store(e) => {
                tracing::error!("Storage error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
