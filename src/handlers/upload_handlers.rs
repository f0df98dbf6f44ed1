//! Handlers for upload units: registration and finalization.

use crate::{AppState, errors::AppError, handlers::chunk_handlers::bearer_token};
use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadRequest {
    pub tenant_slug: Option<String>,
    pub target_folder_id: Option<String>,
    pub expected_slots: Option<Vec<String>>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadResponse {
    pub upload_id: Uuid,
    pub expected_slots: Vec<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub ok: bool,
    pub upload_id: Uuid,
    pub manifest_file_id: String,
    pub manifest_file_name: String,
    pub total_files: usize,
}

/// POST `/uploads` — register a new upload unit and the slots it expects.
pub async fn create_upload(
    State(state): State<AppState>,
    Json(req): Json<CreateUploadRequest>,
) -> Result<Json<CreateUploadResponse>, AppError> {
    let tenant_slug = req
        .tenant_slug
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::bad_request("Missing required field: tenantSlug"))?;
    let target_folder_id = req
        .target_folder_id
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::bad_request("Missing required field: targetFolderId"))?;
    let expected_slots = req
        .expected_slots
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::bad_request("Missing required field: expectedSlots"))?;

    let upload = state
        .finalize
        .create_upload(&tenant_slug, &target_folder_id, &expected_slots)
        .await?;

    Ok(Json(CreateUploadResponse {
        upload_id: upload.id,
        expected_slots,
    }))
}

/// POST `/uploads/{upload_id}/finalize` — seal a complete upload unit.
///
/// Fails 404 for an unknown id, 409 while expected slots are still missing
/// (callers poll and retry once the remaining transfers land), and 409
/// again after a successful finalize — the manifest is written exactly once.
pub async fn finalize_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<FinalizeResponse>, AppError> {
    let bearer = bearer_token(&headers);
    let outcome = state.finalize.finalize(upload_id, bearer.as_deref()).await?;

    Ok(Json(FinalizeResponse {
        ok: true,
        upload_id: outcome.upload_id,
        manifest_file_id: outcome.manifest_file_id,
        manifest_file_name: outcome.manifest_file_name,
        total_files: outcome.total_files,
    }))
}
