use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::{
    chunk_store::ChunkStoreError, cold_storage::ColdStorageError, finalize::FinalizeError,
};

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

// Validation failures are terminal 4xx results the client must not retry;
// storage failures surface as 500 so a dropped chunk is never silent.
impl From<ChunkStoreError> for AppError {
    fn from(err: ChunkStoreError) -> Self {
        let status = match &err {
            ChunkStoreError::InvalidChunkIndex { .. } | ChunkStoreError::EmptyPayload => {
                StatusCode::BAD_REQUEST
            }
            ChunkStoreError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ChunkStoreError::SessionIncomplete { .. } => StatusCode::CONFLICT,
            ChunkStoreError::Sqlx(_) | ChunkStoreError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}

// Remote failures keep the remote status/body in the message so callers can
// decide between retrying the call and restarting the upload.
impl From<ColdStorageError> for AppError {
    fn from(err: ColdStorageError) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<FinalizeError> for AppError {
    fn from(err: FinalizeError) -> Self {
        let status = match &err {
            FinalizeError::UploadNotFound(_) => StatusCode::NOT_FOUND,
            FinalizeError::AlreadyCompleted(_) | FinalizeError::IncompletePartSet { .. } => {
                StatusCode::CONFLICT
            }
            FinalizeError::ManifestWriteFailure(_)
            | FinalizeError::SlotList(_)
            | FinalizeError::ColdStorage(_)
            | FinalizeError::Sqlx(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}
