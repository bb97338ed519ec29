//! Error type shared by the pipeline, the stores and the HTTP layer.

#[cfg(feature = "web")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Message shown to clients when an upload could not be processed.
pub const PROCESSING_FAILURE_MESSAGE: &str = "failed to process upload";

/// Main error type for the application
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The external decoder could not produce a still frame
    #[error("Frame extraction failed: {0}")]
    FrameExtraction(String),

    /// The still image could not be decoded or hashed
    #[error("Hash computation failed: {0}")]
    HashComputation(String),

    /// Two fingerprints of different bit lengths were compared
    #[error("Fingerprint length mismatch: {left} bits vs {right} bits")]
    DistanceMismatch {
        /// Bit length of the left-hand fingerprint.
        left: usize,
        /// Bit length of the right-hand fingerprint.
        right: usize,
    },

    /// The media kind cannot be fingerprinted
    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    /// The caller abandoned the request
    #[error("Operation cancelled")]
    Cancelled,

    /// Fingerprint or post storage failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upload errors
    #[error("Upload error: {0}")]
    UploadError(String),

    /// Internal server errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Standard error response format
#[derive(Serialize)]
#[derive(Debug)]
pub struct ErrorResponse {
    /// Error code (HTTP status code)
    pub code: u16,
    /// Error message
    pub message: String,
    /// Optional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    #[cfg(feature = "web")]
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::UploadError(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error is a failure of the processing pipeline itself.
    ///
    /// Such errors are reported to clients with a generic message; the
    /// detail only goes to the log.
    pub fn is_processing_failure(&self) -> bool {
        matches!(
            self,
            Self::FrameExtraction(_)
                | Self::HashComputation(_)
                | Self::DistanceMismatch { .. }
                | Self::Storage(_)
                | Self::Io(_)
                | Self::Internal(_)
        )
    }

    /// Convert the error to a JSON response
    pub fn to_json(&self) -> ErrorResponse {
        #[cfg(feature = "web")]
        let code = self.status_code().as_u16();
        #[cfg(not(feature = "web"))]
        let code = 500u16;

        if self.is_processing_failure() {
            ErrorResponse {
                code,
                message: PROCESSING_FAILURE_MESSAGE.to_string(),
                details: None,
            }
        } else {
            ErrorResponse {
                code,
                message: self.to_string(),
                details: None,
            }
        }
    }
}

#[cfg(feature = "web")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::DistanceMismatch { .. } => log::error!("fingerprint integrity violation: {}", self),
            err if err.is_processing_failure() => log::error!("upload processing failed: {}", err),
            err => log::debug!("request rejected: {}", err),
        }
        let response = self.to_json();

        (status, Json(response)).into_response()
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Task join error: {}", err))
    }
}

#[cfg(feature = "web")]
impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::UploadError(err.to_string())
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Extension trait for working with Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static;

    /// Add context to an error if the result is an error
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| AppError::Internal(format!("{}: {}", context, e)))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| {
            let context = f();
            AppError::Internal(format!("{}: {}", context, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_failures_hide_details() {
        let err = AppError::FrameExtraction("ffmpeg exited with status 1: moov atom not found".into());
        let body = err.to_json();
        assert_eq!(body.message, PROCESSING_FAILURE_MESSAGE);
        assert!(body.details.is_none());
    }

    #[test]
    fn test_client_errors_keep_message() {
        let err = AppError::InvalidInput("missing file field".into());
        let body = err.to_json();
        assert!(body.message.contains("missing file field"));
    }

    #[cfg(feature = "web")]
    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::UnsupportedMedia("txt".into()).status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(AppError::NotFound("post 3".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::DistanceMismatch { left: 64, right: 128 }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_context() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        let err = res.context("writing snapshot").unwrap_err();
        assert!(err.to_string().contains("writing snapshot: disk full"));
    }
}
