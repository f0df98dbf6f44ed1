//! Handlers for the direct resumable path (Protocol B): initiate a session
//! against cold storage, proxy ranged PUTs, and answer destination checks.

use crate::{
    AppState,
    errors::AppError,
    handlers::chunk_handlers::bearer_token,
    services::cold_storage::{PutOutcome, VerifyOutcome},
};
use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub filename: Option<String>,
    pub mime: Option<String>,
    pub size_bytes: Option<u64>,
    pub parent_id: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deduped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutRequest {
    pub upload_url: String,
    pub start: u64,
    pub end: u64,
    pub total: u64,
    pub chunk_base64: String,
    pub mime: String,
    /// When present, a completed transfer is recorded as a part of this
    /// upload unit under `slot`.
    pub upload_id: Option<Uuid>,
    pub slot: Option<String>,
    pub filename: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PutResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub continued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    pub parent_id: String,
    pub name: Option<String>,
    pub size_bytes: Option<i64>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
}

/// POST `/resumable/start` — begin a direct transfer to cold storage.
///
/// Runs the name+size dedupe check first: if an identical file already
/// exists in the destination folder, no session is initiated and the caller
/// gets the existing file id back.
pub async fn start_resumable(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StartRequest>,
) -> Result<Json<StartResponse>, AppError> {
    let filename = req
        .filename
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::bad_request("Missing required field: filename"))?;
    let mime = req
        .mime
        .filter(|m| !m.is_empty())
        .ok_or_else(|| AppError::bad_request("Missing required field: mime"))?;
    let size_bytes = req
        .size_bytes
        .ok_or_else(|| AppError::bad_request("Missing required field: sizeBytes"))?;
    let parent_id = req
        .parent_id
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::bad_request("Missing required field: parentId"))?;

    let bearer = bearer_token(&headers);

    let existing = state
        .cold_storage
        .verify(
            &parent_id,
            Some(&filename),
            Some(size_bytes as i64),
            bearer.as_deref(),
        )
        .await?;

    if let VerifyOutcome::Existing { file_id } = existing {
        tracing::info!(%filename, size_bytes, "dedupe hit, skipping transfer");
        return Ok(Json(StartResponse {
            upload_url: None,
            deduped: true,
            file_id: Some(file_id),
        }));
    }

    let upload_url = state
        .cold_storage
        .init_session(&filename, &mime, size_bytes, &parent_id, bearer.as_deref())
        .await?;

    Ok(Json(StartResponse {
        upload_url: Some(upload_url),
        deduped: false,
        file_id: None,
    }))
}

/// POST `/resumable/put` — proxy one ranged slice to the upload URL.
///
/// 308 from the remote surfaces as `{ ok, continued, range }` so the caller
/// knows where to continue; 200/201 surfaces as `{ ok, completed, fileId }`
/// and, when the request names an upload slot, records the part.
pub async fn put_resumable(
    State(state): State<AppState>,
    Json(req): Json<PutRequest>,
) -> Result<Json<PutResponse>, AppError> {
    let payload = general_purpose::STANDARD
        .decode(&req.chunk_base64)
        .map_err(|e| AppError::bad_request(format!("chunkBase64 is not valid base64: {e}")))?;
    if payload.is_empty() {
        return Err(AppError::bad_request("chunk payload is empty"));
    }

    let result = state
        .cold_storage
        .put(
            &req.upload_url,
            req.start,
            req.end,
            req.total,
            Bytes::from(payload),
            &req.mime,
        )
        .await?;

    match result.outcome {
        PutOutcome::Continued { confirmed_range } => Ok(Json(PutResponse {
            ok: true,
            continued: true,
            range: confirmed_range,
            completed: false,
            file_id: None,
        })),
        PutOutcome::Completed { file_id } => {
            if let (Some(upload_id), Some(slot)) = (req.upload_id, req.slot.as_deref()) {
                let file_name = req.filename.as_deref().unwrap_or(slot);
                state
                    .finalize
                    .record_part(
                        upload_id,
                        slot,
                        &file_id,
                        file_name,
                        req.total as i64,
                        &req.mime,
                    )
                    .await?;
            }
            Ok(Json(PutResponse {
                ok: true,
                continued: false,
                range: None,
                completed: true,
                file_id: Some(file_id),
            }))
        }
    }
}

/// GET `/resumable/verify?parentId=&name=&sizeBytes=` — presence/size-match
/// check, or a listing permission probe when `name` is omitted.
pub async fn verify_destination(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<VerifyResponse>, AppError> {
    let bearer = bearer_token(&headers);
    let outcome = state
        .cold_storage
        .verify(
            &query.parent_id,
            query.name.as_deref(),
            query.size_bytes,
            bearer.as_deref(),
        )
        .await?;

    Ok(Json(match outcome {
        VerifyOutcome::Existing { file_id } => VerifyResponse {
            ok: true,
            exists: Some(true),
            file_id: Some(file_id),
            file_count: None,
        },
        VerifyOutcome::Absent => VerifyResponse {
            ok: true,
            exists: Some(false),
            file_id: None,
            file_count: None,
        },
        VerifyOutcome::ListOk { file_count } => VerifyResponse {
            ok: true,
            exists: None,
            file_id: None,
            file_count: Some(file_count),
        },
    }))
}
