//! Maintenance endpoint: the session retention sweep.

use crate::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purged_sessions: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST `/maintenance/cleanup` — purge chunk sessions idle past the
/// retention window. Intended to be hit periodically by a scheduler; safe
/// to run while uploads are active.
pub async fn cleanup_sessions(State(state): State<AppState>) -> impl IntoResponse {
    match state
        .chunk_store
        .cleanup_old_sessions(state.session_retention)
        .await
    {
        Ok(purged) => {
            info!(purged, "session cleanup sweep finished");
            (
                StatusCode::OK,
                Json(CleanupResponse {
                    ok: true,
                    purged_sessions: Some(purged),
                    error: None,
                }),
            )
        }
        Err(err) => {
            warn!("session cleanup sweep failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CleanupResponse {
                    ok: false,
                    purged_sessions: None,
                    error: Some(err.to_string()),
                }),
            )
        }
    }
}
