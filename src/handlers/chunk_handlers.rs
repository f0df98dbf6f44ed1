//! Handlers for the chunk-buffering path (Protocol A): accept one chunk per
//! multipart request, report session progress to polling clients, and
//! promote a completed session into cold storage.

use crate::{
    AppState,
    errors::AppError,
    services::chunk_store::NewChunk,
    services::cold_storage::VerifyOutcome,
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, header},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response body for a stored chunk.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub success: bool,
    pub session_id: String,
    pub chunk_index: i64,
    pub received_chunks: i64,
    pub total_chunks: i64,
    pub is_complete: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteRequest {
    pub upload_id: Uuid,
    pub slot: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PromoteResponse {
    pub ok: bool,
    pub deduped: bool,
    pub file_id: String,
    pub slot: String,
}

/// Accumulates the multipart fields of one chunk upload request.
#[derive(Default)]
struct ChunkForm {
    session_id: Option<String>,
    chunk_index: Option<String>,
    total_chunks: Option<String>,
    original_file_name: Option<String>,
    file_type: Option<String>,
    gym_slug: Option<String>,
    gym_name: Option<String>,
    target_folder_id: Option<String>,
    chunk: Option<Bytes>,
}

fn require<T>(value: Option<T>, name: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::bad_request(format!("Missing required field: {name}")))
}

fn parse_int(value: String, name: &str) -> Result<i64, AppError> {
    value
        .parse::<i64>()
        .map_err(|_| AppError::bad_request(format!("Field {name} must be an integer, got `{value}`")))
}

/// POST `/chunks` — store one chunk of a buffering session.
///
/// Multipart fields: `sessionId`, `chunkIndex`, `totalChunks`,
/// `originalFileName`, `fileType`, `gymSlug`, `gymName`, `targetFolderId`
/// and the binary `chunk`. Chunks may arrive in any order and are upserted
/// on re-delivery.
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChunkUploadResponse>, AppError> {
    let mut form = ChunkForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        match name.as_str() {
            "chunk" => {
                form.chunk = Some(field.bytes().await.map_err(|e| {
                    AppError::bad_request(format!("failed reading chunk bytes: {e}"))
                })?);
            }
            other => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(format!("failed reading {other}: {e}")))?;
                match other {
                    "sessionId" => form.session_id = Some(text),
                    "chunkIndex" => form.chunk_index = Some(text),
                    "totalChunks" => form.total_chunks = Some(text),
                    "originalFileName" => form.original_file_name = Some(text),
                    "fileType" => form.file_type = Some(text),
                    "gymSlug" => form.gym_slug = Some(text),
                    "gymName" => form.gym_name = Some(text),
                    "targetFolderId" => form.target_folder_id = Some(text),
                    _ => {}
                }
            }
        }
    }

    let session_id = require(form.session_id, "sessionId")?;
    let chunk_index = parse_int(require(form.chunk_index, "chunkIndex")?, "chunkIndex")?;
    let total_chunks = parse_int(require(form.total_chunks, "totalChunks")?, "totalChunks")?;
    let payload = require(form.chunk, "chunk")?;

    let chunk = NewChunk {
        session_id: session_id.clone(),
        chunk_index,
        total_chunks,
        file_name: require(form.original_file_name, "originalFileName")?,
        content_type: require(form.file_type, "fileType")?,
        tenant_slug: require(form.gym_slug, "gymSlug")?,
        tenant_name: require(form.gym_name, "gymName")?,
        dest_folder_id: require(form.target_folder_id, "targetFolderId")?,
    };

    let status = state.chunk_store.store_chunk(chunk, payload).await?;

    let message = if status.is_complete {
        format!("All {} chunks received", status.total_chunks)
    } else {
        format!(
            "Chunk {} of {} received",
            status.received_chunks, status.total_chunks
        )
    };

    Ok(Json(ChunkUploadResponse {
        success: true,
        session_id,
        chunk_index,
        received_chunks: status.received_chunks,
        total_chunks: status.total_chunks,
        is_complete: status.is_complete,
        message,
    }))
}

/// GET `/chunks?sessionId=` — derived session status for polling clients.
pub async fn chunk_session_status(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<crate::models::session::SessionStatus>, AppError> {
    let status = state
        .tracker
        .status(&query.session_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| {
            AppError::not_found(format!("session `{}` has no stored chunks", query.session_id))
        })?;

    Ok(Json(status))
}

/// POST `/sessions/{session_id}/promote` — forward a completed session to
/// cold storage as one resumable transfer and record the resulting file
/// against an upload slot. The buffered chunks are purged on success.
pub async fn promote_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<PromoteRequest>,
) -> Result<Json<PromoteResponse>, AppError> {
    let bearer = bearer_token(&headers);
    let records = state.chunk_store.list_complete_session(&session_id).await?;

    let first = &records[0];
    let file_name = first.file_name.clone();
    let content_type = first.content_type.clone();
    let dest_folder_id = first.dest_folder_id.clone();
    let total_bytes: i64 = records.iter().map(|r| r.size_bytes).sum();

    // Dedupe before transferring: a client retry after a crash must not
    // re-upload a file that already landed.
    let existing = state
        .cold_storage
        .verify(
            &dest_folder_id,
            Some(&file_name),
            Some(total_bytes),
            bearer.as_deref(),
        )
        .await?;

    let (file_id, deduped) = match existing {
        VerifyOutcome::Existing { file_id } => (file_id, true),
        _ => {
            // Reads are independent; order is preserved by try_join_all.
            let slices = futures::future::try_join_all(
                records
                    .iter()
                    .map(|record| state.chunk_store.read_chunk_payload(record)),
            )
            .await?;
            let file_id = state
                .cold_storage
                .transfer_whole(
                    &file_name,
                    &content_type,
                    &slices,
                    &dest_folder_id,
                    bearer.as_deref(),
                )
                .await?;
            (file_id, false)
        }
    };

    state
        .finalize
        .record_part(
            req.upload_id,
            &req.slot,
            &file_id,
            &file_name,
            total_bytes,
            &content_type,
        )
        .await?;

    state.chunk_store.purge_session(&session_id).await?;

    Ok(Json(PromoteResponse {
        ok: true,
        deduped,
        file_id,
        slot: req.slot,
    }))
}

/// Lift a bearer token off the incoming Authorization header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}
