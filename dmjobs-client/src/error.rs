//! Error types for the document store client

use dmjobs_core::domain::reference::ReferenceError;
use thiserror::Error;

/// Result type alias for document store operations
pub type Result<T> = std::result::Result<T, DocumentError>;

/// Errors that can occur when talking to the document store
#[derive(Debug, Error)]
pub enum DocumentError {
    /// HTTP request failed (connection, timeout, ...)
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Document store returned an error status code
    #[error("Document store error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the document store
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Document not found
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidReference(#[from] ReferenceError),

    /// No credential could be obtained
    #[error("No credential available for the document store")]
    MissingCredential,
}

impl DocumentError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Upstream HTTP status, when the document store answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            Self::NotFound(_) => Some(404),
            Self::RequestFailed(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
