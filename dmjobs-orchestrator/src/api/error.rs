//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::JobError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    NotImplemented(String),
    Unavailable(String),
    /// Error answer of the document store, passed through with its status
    Upstream(StatusCode, String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, msg),
            ApiError::Unavailable(msg) => {
                tracing::warn!("Backend unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            ApiError::Upstream(status, msg) => {
                tracing::warn!("Document store error ({}): {}", status, msg);
                (status, msg)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(_) => ApiError::NotFound(err.to_string()),
            JobError::BadRequest(msg) => ApiError::BadRequest(msg),
            JobError::NotCompleted(_) => ApiError::BadRequest(err.to_string()),
            JobError::Unsupported(_) => ApiError::NotImplemented(err.to_string()),
            JobError::BackendUnavailable(msg) => ApiError::Unavailable(msg),
            JobError::Document(ref document) => {
                match document
                    .status()
                    .and_then(|status| StatusCode::from_u16(status).ok())
                {
                    Some(status) => ApiError::Upstream(status, err.to_string()),
                    None => ApiError::InternalError(err.to_string()),
                }
            }
            err => ApiError::InternalError(err.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
