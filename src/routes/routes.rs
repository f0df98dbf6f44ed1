//! Defines routes for the intake pipeline.
//!
//! ## Structure
//! - **Chunk buffering (Protocol A)**
//!   - `POST /chunks` — store one chunk (multipart)
//!   - `GET  /chunks?sessionId=` — derived session status
//!   - `POST /sessions/{session_id}/promote` — forward a complete session to cold storage
//!
//! - **Direct resumable transfer (Protocol B)**
//!   - `POST /resumable/start` — dedupe check + session init, returns upload URL
//!   - `POST /resumable/put` — proxy one ranged slice
//!   - `GET  /resumable/verify` — destination presence/size check or list probe
//!
//! - **Upload units**
//!   - `POST /uploads` — register an upload and its expected slots
//!   - `POST /uploads/{upload_id}/finalize` — build + write the manifest
//!
//! - **Operations**
//!   - `POST /maintenance/cleanup` — retention sweep for idle sessions
//!   - `GET  /healthz`, `GET /readyz`

use crate::{
    AppState,
    handlers::{
        chunk_handlers::{chunk_session_status, promote_session, upload_chunk},
        health_handlers::{healthz, readyz},
        maintenance_handlers::cleanup_sessions,
        resumable_handlers::{put_resumable, start_resumable, verify_destination},
        upload_handlers::{create_upload, finalize_upload},
    },
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Upper bound for one request body; individual chunks stay well below this.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Build and return the router for all intake endpoints.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // chunk buffering
        .route("/chunks", post(upload_chunk).get(chunk_session_status))
        .route("/sessions/{session_id}/promote", post(promote_session))
        // direct resumable transfers
        .route("/resumable/start", post(start_resumable))
        .route("/resumable/put", post(put_resumable))
        .route("/resumable/verify", get(verify_destination))
        // upload units
        .route("/uploads", post(create_upload))
        .route("/uploads/{upload_id}/finalize", post(finalize_upload))
        // maintenance
        .route("/maintenance/cleanup", post(cleanup_sessions))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
