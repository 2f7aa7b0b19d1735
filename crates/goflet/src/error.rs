//! Application error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::httpx::RangeError;
use crate::storage::StorageError;
use crate::storage::image::ProcessError;

/// Application errors, mapped onto HTTP statuses with a JSON error body.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("{0}")]
    NotFound(&'static str),

    #[error("Directory creation not allowed")]
    DirCreation,

    #[error("The file completion is in progress")]
    Uploading,

    #[error("{0}")]
    Conflict(&'static str),

    #[error("{0}")]
    TooLarge(String),

    #[error("{0}")]
    RangeInvalid(String),

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden | AppError::DirCreation => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Uploading | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RangeInvalid(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal details are logged, never echoed to the client.
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal server error");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<crate::storage::PathError> for AppError {
    fn from(e: crate::storage::PathError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => AppError::NotFound("File not found"),
            StorageError::DirCreation => AppError::DirCreation,
            StorageError::Uploading => AppError::Uploading,
            StorageError::Io(e) => AppError::Internal(e.into()),
            StorageError::Other(e) => AppError::Internal(e),
        }
    }
}

impl From<RangeError> for AppError {
    fn from(e: RangeError) -> Self {
        AppError::RangeInvalid(e.to_string())
    }
}

impl From<ProcessError> for AppError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::TooLarge => AppError::TooLarge("File too large".to_string()),
            other => AppError::Internal(other.into()),
        }
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;
