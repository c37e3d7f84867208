//! Error types for the job service.
//!
//! LEARNING: `thiserror` derives `std::error::Error` and `Display` from the
//! `#[error(...)]` attributes, so each variant carries its own message.
//! `anyhow` (used in download.rs) is for "just bubble it up" errors; these
//! enums are for errors callers need to match on.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde_json::json;
use thiserror::Error;

/// Errors that cross from the service into the request-handling path.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid YouTube URL format. Supported formats: youtube.com/watch, youtube.com/shorts, youtu.be, youtube.com/embed")]
    InvalidUrl,

    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            JobError::InvalidUrl => StatusCode::UNPROCESSABLE_ENTITY,
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            JobError::InvalidUrl => "validation_error",
            JobError::NotFound(_) => "not_found",
            JobError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Server error in API handler: {}", self);
        }

        let body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });

        (status, Json(body)).into_response()
    }
}

/// Failures captured inside a job runner. These never reach an HTTP caller
/// directly; their `Display` text becomes the job's `error` field.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Could not extract video info: {0}")]
    Extraction(String),

    #[error("No video formats available for this URL")]
    NoViableFormat,

    #[error("YouTube download error: {0}")]
    Download(String),

    #[error("Download completed but no video file found. This might be due to video restrictions or format issues.")]
    ArtifactMissing,

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Unexpected error during download: {0}")]
    Unexpected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(JobError::InvalidUrl.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(JobError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            JobError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_into_response_uses_status() {
        let response = JobError::NotFound("abc".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_download_error_messages() {
        assert_eq!(
            DownloadError::NoViableFormat.to_string(),
            "No video formats available for this URL"
        );
        assert_eq!(
            DownloadError::Extraction("private video".into()).to_string(),
            "Could not extract video info: private video"
        );
    }
}
