//! src/services/finalize.rs
//!
//! FinalizeService — owns the upload units and their recorded parts, and is
//! the only writer of manifests. Once every expected slot of an upload has a
//! part, finalization builds the manifest, writes it to the destination
//! folder through the cold-storage bridge, and stamps the upload complete.

use crate::models::{
    manifest::UploadManifest,
    upload::{Upload, UploadPart},
};
use crate::services::cold_storage::{ColdStorageClient, ColdStorageError};
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("upload `{0}` not found")]
    UploadNotFound(Uuid),
    #[error("upload `{0}` is already finalized")]
    AlreadyCompleted(Uuid),
    #[error("upload is missing parts for slots: {}", missing.join(", "))]
    IncompletePartSet { missing: Vec<String> },
    #[error("failed to create manifest file: {0}")]
    ManifestWriteFailure(String),
    #[error("stored slot list is not valid JSON: {0}")]
    SlotList(#[from] serde_json::Error),
    #[error(transparent)]
    ColdStorage(#[from] ColdStorageError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type FinalizeResult<T> = Result<T, FinalizeError>;

/// Summary returned by a successful finalization.
#[derive(Clone, Debug)]
pub struct FinalizeOutcome {
    pub upload_id: Uuid,
    pub manifest_file_id: String,
    pub manifest_file_name: String,
    pub total_files: usize,
}

#[derive(Clone)]
pub struct FinalizeService {
    pub db: Arc<SqlitePool>,
    pub cold_storage: ColdStorageClient,
}

impl FinalizeService {
    pub fn new(db: Arc<SqlitePool>, cold_storage: ColdStorageClient) -> Self {
        Self { db, cold_storage }
    }

    /// Register a new upload unit with the slots it expects.
    pub async fn create_upload(
        &self,
        tenant_slug: &str,
        dest_folder_id: &str,
        expected_slots: &[String],
    ) -> FinalizeResult<Upload> {
        let upload = Upload {
            id: Uuid::new_v4(),
            tenant_slug: tenant_slug.to_string(),
            dest_folder_id: dest_folder_id.to_string(),
            expected_slots: serde_json::to_string(expected_slots)?,
            manifest_file_id: None,
            created_at: Utc::now(),
            completed_at: None,
        };

        sqlx::query(
            "INSERT INTO uploads (id, tenant_slug, dest_folder_id, expected_slots,
                                  manifest_file_id, created_at, completed_at)
             VALUES (?, ?, ?, ?, NULL, ?, NULL)",
        )
        .bind(upload.id)
        .bind(&upload.tenant_slug)
        .bind(&upload.dest_folder_id)
        .bind(&upload.expected_slots)
        .bind(upload.created_at)
        .execute(&*self.db)
        .await?;

        Ok(upload)
    }

    /// Fetch an upload unit; `UploadNotFound` when the id is unknown.
    pub async fn get_upload(&self, upload_id: Uuid) -> FinalizeResult<Upload> {
        sqlx::query_as::<_, Upload>(
            "SELECT id, tenant_slug, dest_folder_id, expected_slots, manifest_file_id,
                    created_at, completed_at
             FROM uploads WHERE id = ?",
        )
        .bind(upload_id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => FinalizeError::UploadNotFound(upload_id),
            other => FinalizeError::Sqlx(other),
        })
    }

    /// Record one transferred file against an upload slot.
    ///
    /// Keyed `(upload_id, slot)` with upsert semantics, so a retried
    /// transfer re-records rather than duplicates. Rejected once the upload
    /// has been finalized.
    pub async fn record_part(
        &self,
        upload_id: Uuid,
        slot: &str,
        file_id: &str,
        file_name: &str,
        size_bytes: i64,
        content_type: &str,
    ) -> FinalizeResult<UploadPart> {
        let upload = self.get_upload(upload_id).await?;
        if upload.completed_at.is_some() {
            return Err(FinalizeError::AlreadyCompleted(upload_id));
        }

        let part = UploadPart {
            id: Uuid::new_v4(),
            upload_id,
            slot: slot.to_string(),
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            size_bytes,
            content_type: content_type.to_string(),
            uploaded_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO upload_parts (id, upload_id, slot, file_id, file_name,
                                      size_bytes, content_type, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(upload_id, slot) DO UPDATE SET
                file_id = excluded.file_id,
                file_name = excluded.file_name,
                size_bytes = excluded.size_bytes,
                content_type = excluded.content_type,
                uploaded_at = excluded.uploaded_at
            "#,
        )
        .bind(part.id)
        .bind(part.upload_id)
        .bind(&part.slot)
        .bind(&part.file_id)
        .bind(&part.file_name)
        .bind(part.size_bytes)
        .bind(&part.content_type)
        .bind(part.uploaded_at)
        .execute(&*self.db)
        .await?;

        Ok(part)
    }

    /// All recorded parts of an upload, in slot order.
    pub async fn list_parts(&self, upload_id: Uuid) -> FinalizeResult<Vec<UploadPart>> {
        Ok(sqlx::query_as::<_, UploadPart>(
            "SELECT id, upload_id, slot, file_id, file_name, size_bytes, content_type,
                    uploaded_at
             FROM upload_parts WHERE upload_id = ? ORDER BY slot ASC",
        )
        .bind(upload_id)
        .fetch_all(&*self.db)
        .await?)
    }

    /// Seal the upload: verify every expected slot has a part, build the
    /// manifest, write it to the destination folder, stamp completion.
    ///
    /// `IncompletePartSet` is reported distinctly so the caller can retry
    /// finalize later once the missing transfers land. Success happens
    /// exactly once; finalizing an already-sealed upload fails.
    pub async fn finalize(
        &self,
        upload_id: Uuid,
        request_bearer: Option<&str>,
    ) -> FinalizeResult<FinalizeOutcome> {
        let upload = self.get_upload(upload_id).await?;
        if upload.completed_at.is_some() {
            return Err(FinalizeError::AlreadyCompleted(upload_id));
        }

        let parts = self.list_parts(upload_id).await?;
        let expected = upload.expected_slot_names()?;
        let missing: Vec<String> = expected
            .iter()
            .filter(|slot| !parts.iter().any(|p| &p.slot == *slot))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(FinalizeError::IncompletePartSet { missing });
        }

        let manifest = UploadManifest::from_parts(upload_id, Utc::now(), &parts);
        let manifest_file_name = manifest.file_name();
        let body = serde_json::to_vec_pretty(&manifest)?;

        let manifest_file_id = self
            .cold_storage
            .transfer_whole(
                &manifest_file_name,
                "application/json",
                &[Bytes::from(body)],
                &upload.dest_folder_id,
                request_bearer,
            )
            .await
            .map_err(|err| match err {
                ColdStorageError::UnexpectedResponse(msg) => {
                    FinalizeError::ManifestWriteFailure(msg)
                }
                other => FinalizeError::ColdStorage(other),
            })?;

        let result = sqlx::query(
            "UPDATE uploads SET manifest_file_id = ?, completed_at = ?
             WHERE id = ? AND completed_at IS NULL",
        )
        .bind(&manifest_file_id)
        .bind(Utc::now())
        .bind(upload_id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            // A concurrent finalize won the race after our part check.
            return Err(FinalizeError::AlreadyCompleted(upload_id));
        }

        info!(
            upload = %upload_id,
            manifest = %manifest_file_id,
            files = manifest.total_files,
            "upload finalized"
        );

        Ok(FinalizeOutcome {
            upload_id,
            manifest_file_id,
            manifest_file_name,
            total_files: manifest.total_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColdStorageConfig;
    use httpmock::Method::{POST, PUT};
    use httpmock::MockServer;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::net::TcpListener;
    use std::time::Duration;

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    async fn test_db() -> Arc<SqlitePool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.expect("migration");
        }
        Arc::new(pool)
    }

    fn cold_storage_for(base_url: String) -> ColdStorageClient {
        ColdStorageClient::new(ColdStorageConfig {
            base_url,
            access_token: Some("tok".into()),
            token_url: None,
            client_id: None,
            client_secret: None,
            refresh_token: None,
            max_attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            request_timeout: Duration::from_secs(5),
            put_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    async fn service(base_url: String) -> FinalizeService {
        FinalizeService::new(test_db().await, cold_storage_for(base_url))
    }

    fn slots(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn unknown_upload_is_not_found() {
        let svc = service("http://127.0.0.1:1".into()).await;
        let id = Uuid::new_v4();
        assert!(matches!(
            svc.get_upload(id).await.unwrap_err(),
            FinalizeError::UploadNotFound(missing) if missing == id
        ));
        assert!(matches!(
            svc.finalize(id, None).await.unwrap_err(),
            FinalizeError::UploadNotFound(_)
        ));
    }

    #[tokio::test]
    async fn record_part_upserts_per_slot() {
        let svc = service("http://127.0.0.1:1".into()).await;
        let upload = svc
            .create_upload("iron-temple", "folder-1", &slots(&["video"]))
            .await
            .unwrap();

        svc.record_part(upload.id, "video", "file-a", "v1.mp4", 10, "video/mp4")
            .await
            .unwrap();
        svc.record_part(upload.id, "video", "file-b", "v2.mp4", 20, "video/mp4")
            .await
            .unwrap();

        let parts = svc.list_parts(upload.id).await.unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].file_id, "file-b");
        assert_eq!(parts[0].size_bytes, 20);
    }

    #[tokio::test]
    async fn finalize_rejects_missing_slots() {
        let svc = service("http://127.0.0.1:1".into()).await;
        let upload = svc
            .create_upload("iron-temple", "folder-1", &slots(&["video", "cover"]))
            .await
            .unwrap();
        svc.record_part(upload.id, "video", "file-a", "v.mp4", 10, "video/mp4")
            .await
            .unwrap();

        match svc.finalize(upload.id, None).await.unwrap_err() {
            FinalizeError::IncompletePartSet { missing } => {
                assert_eq!(missing, vec!["cover".to_string()]);
            }
            other => panic!("expected IncompletePartSet, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn finalize_writes_manifest_exactly_once() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }
        let server = MockServer::start();
        let init = server.mock(|when, then| {
            when.method(POST)
                .path("/upload/files")
                .query_param("uploadType", "resumable");
            then.status(200).header("Location", server.url("/upload/m1"));
        });
        let put = server.mock(|when, then| {
            when.method(PUT).path("/upload/m1");
            then.status(200).json_body(json!({ "id": "manifest-file-1" }));
        });

        let svc = service(server.base_url()).await;
        let upload = svc
            .create_upload("iron-temple", "folder-1", &slots(&["video", "cover"]))
            .await
            .unwrap();
        svc.record_part(upload.id, "video", "file-a", "v.mp4", 10, "video/mp4")
            .await
            .unwrap();
        svc.record_part(upload.id, "cover", "file-b", "c.jpg", 5, "image/jpeg")
            .await
            .unwrap();

        let outcome = svc.finalize(upload.id, None).await.unwrap();
        assert_eq!(outcome.manifest_file_id, "manifest-file-1");
        assert_eq!(outcome.total_files, 2);
        assert_eq!(
            outcome.manifest_file_name,
            format!("manifest-{}.json", upload.id)
        );
        init.assert();
        put.assert();

        let sealed = svc.get_upload(upload.id).await.unwrap();
        assert_eq!(sealed.manifest_file_id.as_deref(), Some("manifest-file-1"));
        assert!(sealed.completed_at.is_some());

        // The manifest is write-once: a second finalize fails cleanly, and
        // no further parts are accepted.
        assert!(matches!(
            svc.finalize(upload.id, None).await.unwrap_err(),
            FinalizeError::AlreadyCompleted(_)
        ));
        assert!(matches!(
            svc.record_part(upload.id, "video", "x", "x.mp4", 1, "video/mp4")
                .await
                .unwrap_err(),
            FinalizeError::AlreadyCompleted(_)
        ));
    }
}
