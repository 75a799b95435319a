use crate::jobs::JobStatus;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Everything the API can report to a caller, each with a stable `code`.
/// Encoder failures on the async path never surface here; they live in the
/// job record and are discovered by polling.
#[derive(Debug)]
pub enum ApiError {
    /// Fewer than two source files in a merge request.
    InsufficientFiles,
    /// More than the per-request file cap.
    TooManyFiles,
    /// A part that is not a video.
    UnsupportedMedia(String),
    /// A part over the per-file size limit.
    FileTooLarge(String),
    /// Malformed or unreadable multipart payload.
    Upload(String),
    JobNotFound,
    /// Download requested before the job completed.
    JobNotReady { status: JobStatus, progress: u8 },
    /// Completed job whose artifact is gone from storage.
    ArtifactMissing,
    /// Synchronous merge failed.
    MergeFailed(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InsufficientFiles
            | ApiError::TooManyFiles
            | ApiError::UnsupportedMedia(_)
            | ApiError::FileTooLarge(_)
            | ApiError::Upload(_)
            | ApiError::JobNotReady { .. } => StatusCode::BAD_REQUEST,
            ApiError::JobNotFound | ApiError::ArtifactMissing => StatusCode::NOT_FOUND,
            ApiError::MergeFailed(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::InsufficientFiles => "INSUFFICIENT_FILES",
            ApiError::TooManyFiles => "TOO_MANY_FILES",
            ApiError::UnsupportedMedia(_) => "UNSUPPORTED_MEDIA_TYPE",
            ApiError::FileTooLarge(_) => "FILE_TOO_LARGE",
            ApiError::Upload(_) => "UPLOAD_FAILED",
            ApiError::JobNotFound => "JOB_NOT_FOUND",
            ApiError::JobNotReady { .. } => "JOB_NOT_READY",
            ApiError::ArtifactMissing => "FILE_NOT_FOUND",
            ApiError::MergeFailed(_) => "MERGE_FAILED",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::InsufficientFiles => {
                String::from("Please upload at least 2 video files")
            }
            ApiError::TooManyFiles => String::from("Too many files; at most 10 videos per merge"),
            ApiError::UnsupportedMedia(name) => {
                format!("Only video files are allowed: {name}")
            }
            ApiError::FileTooLarge(name) => format!("File size too large: {name}"),
            ApiError::Upload(msg) => format!("Could not read upload: {msg}"),
            ApiError::JobNotFound => String::from("Job not found"),
            ApiError::JobNotReady { .. } => String::from("Job not completed yet"),
            ApiError::ArtifactMissing => String::from("Output file not found"),
            ApiError::MergeFailed(msg) => format!("Failed to merge videos: {msg}"),
            ApiError::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message(),
            "code": self.code(),
        });
        // A not-ready download tells the poller where the job stands.
        if let ApiError::JobNotReady { status, progress } = &self {
            body["status"] = json!(status);
            body["progress"] = json!(progress);
        }
        (self.status(), Json(body)).into_response()
    }
}
