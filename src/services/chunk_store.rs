//! src/services/chunk_store.rs
//!
//! ChunkStore — durable buffer for files arriving as many independent,
//! possibly out-of-order chunk requests. Metadata lives in SQLite; payload
//! bytes live on disk sharded beneath `base_path/{shard}/{shard}/{session}/`.
//! Session progress is always derived from the set of stored chunk rows,
//! never from a maintained counter, so concurrent writers for different
//! indices of one session cannot lose updates.

use crate::models::{chunk::ChunkRecord, session::SessionStatus};
use crate::services::session_tracker;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ChunkStoreError {
    #[error("chunk index {index} out of range for declared total {total}")]
    InvalidChunkIndex { index: i64, total: i64 },
    #[error("chunk payload is empty")]
    EmptyPayload,
    #[error("session `{0}` has no stored chunks")]
    SessionNotFound(String),
    #[error("session `{session_id}` is incomplete ({received}/{total} chunks)")]
    SessionIncomplete {
        session_id: String,
        received: i64,
        total: i64,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ChunkStoreResult<T> = Result<T, ChunkStoreError>;

/// Fields describing where an incoming chunk belongs. Payload is passed
/// separately so callers can hand over the raw multipart bytes untouched.
#[derive(Clone, Debug)]
pub struct NewChunk {
    pub session_id: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub file_name: String,
    pub content_type: String,
    pub tenant_slug: String,
    pub tenant_name: String,
    pub dest_folder_id: String,
}

/// ChunkStore provides the buffering side of the upload pipeline:
/// - Store a chunk (payload to disk, metadata row upserted into SQLite)
/// - Query session status (derived from the stored rows)
/// - Read a complete session back in index order for promotion
/// - Purge finished sessions and garbage-collect idle ones
#[derive(Clone)]
pub struct ChunkStore {
    /// Shared SQLite connection pool used for chunk metadata.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where chunk payloads are buffered.
    pub base_path: PathBuf,
}

impl ChunkStore {
    /// Create a new ChunkStore backed by the provided SQLite pool and
    /// using `base_path` as the root directory for chunk payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Generate two-level shard identifiers for a session.
    ///
    /// Uses MD5(session_id) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces directory fan-out under
    /// `base_path` when many sessions are active.
    fn session_shards(session_id: &str) -> (String, String) {
        let digest = md5::compute(session_id);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Directory holding every payload file of one session.
    fn session_dir(&self, session_id: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::session_shards(session_id);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(session_id);
        path
    }

    /// Payload path for one chunk: `{session_dir}/{index}`.
    fn chunk_path(&self, session_id: &str, chunk_index: i64) -> PathBuf {
        self.session_dir(session_id).join(chunk_index.to_string())
    }

    /// Store one chunk durably and return the session's post-store status.
    ///
    /// - Rejects indices outside `0..total_chunks` and empty payloads.
    /// - Writes the payload to a temp file, fsyncs, renames into place.
    /// - Upserts the metadata row: re-delivery of the same
    ///   `(session_id, chunk_index)` overwrites rather than duplicates.
    ///
    /// Persistence errors propagate; a silently dropped chunk would corrupt
    /// the eventual reconstruction.
    pub async fn store_chunk(
        &self,
        chunk: NewChunk,
        payload: Bytes,
    ) -> ChunkStoreResult<SessionStatus> {
        if chunk.chunk_index < 0 || chunk.chunk_index >= chunk.total_chunks {
            return Err(ChunkStoreError::InvalidChunkIndex {
                index: chunk.chunk_index,
                total: chunk.total_chunks,
            });
        }
        if payload.is_empty() {
            return Err(ChunkStoreError::EmptyPayload);
        }

        let file_path = self.chunk_path(&chunk.session_id, chunk.chunk_index);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ChunkStoreError::Io(io::Error::new(
                ErrorKind::Other,
                "chunk path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        if let Err(err) = file.write_all(&payload).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ChunkStoreError::Io(err));
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ChunkStoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ChunkStoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ChunkStoreError::Io(err));
            }
        }

        let received_at = Utc::now();
        let insert_result = sqlx::query(
            r#"
            INSERT INTO chunks (
                session_id, chunk_index, total_chunks, file_name, content_type,
                size_bytes, tenant_slug, tenant_name, dest_folder_id, received_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id, chunk_index) DO UPDATE SET
                total_chunks = excluded.total_chunks,
                file_name = excluded.file_name,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                tenant_slug = excluded.tenant_slug,
                tenant_name = excluded.tenant_name,
                dest_folder_id = excluded.dest_folder_id,
                received_at = excluded.received_at
            "#,
        )
        .bind(&chunk.session_id)
        .bind(chunk.chunk_index)
        .bind(chunk.total_chunks)
        .bind(&chunk.file_name)
        .bind(&chunk.content_type)
        .bind(payload.len() as i64)
        .bind(&chunk.tenant_slug)
        .bind(&chunk.tenant_name)
        .bind(&chunk.dest_folder_id)
        .bind(received_at)
        .execute(&*self.db)
        .await;

        if let Err(err) = insert_result {
            let _ = fs::remove_file(&file_path).await;
            return Err(ChunkStoreError::Sqlx(err));
        }

        session_tracker::query_status(&self.db, &chunk.session_id)
            .await?
            .ok_or_else(|| ChunkStoreError::SessionNotFound(chunk.session_id.clone()))
    }

    /// Current derived status for a session, or `None` if it has no chunks.
    pub async fn get_session(&self, session_id: &str) -> ChunkStoreResult<Option<SessionStatus>> {
        Ok(session_tracker::query_status(&self.db, session_id).await?)
    }

    /// All stored chunk records of a session in index order.
    ///
    /// Fails with `SessionNotFound` when no chunks exist and with
    /// `SessionIncomplete` when indices are still missing, so promotion can
    /// only ever see a full set.
    pub async fn list_complete_session(
        &self,
        session_id: &str,
    ) -> ChunkStoreResult<Vec<ChunkRecord>> {
        let records = sqlx::query_as::<_, ChunkRecord>(
            "SELECT session_id, chunk_index, total_chunks, file_name, content_type,
                    size_bytes, tenant_slug, tenant_name, dest_folder_id, received_at
             FROM chunks WHERE session_id = ? ORDER BY chunk_index ASC",
        )
        .bind(session_id)
        .fetch_all(&*self.db)
        .await?;

        if records.is_empty() {
            return Err(ChunkStoreError::SessionNotFound(session_id.to_string()));
        }

        let received = records.len() as i64;
        let total = records[0].total_chunks;
        if !SessionStatus::complete(received, total) {
            return Err(ChunkStoreError::SessionIncomplete {
                session_id: session_id.to_string(),
                received,
                total,
            });
        }

        Ok(records)
    }

    /// Read one stored chunk's payload back from disk.
    ///
    /// A metadata row whose payload file is missing is a storage error, not
    /// a not-found: the row promised bytes that are gone.
    pub async fn read_chunk_payload(&self, record: &ChunkRecord) -> ChunkStoreResult<Bytes> {
        let path = self.chunk_path(&record.session_id, record.chunk_index);
        let data = fs::read(&path).await?;
        Ok(Bytes::from(data))
    }

    /// Remove a session's metadata rows and payload directory.
    ///
    /// Used after successful promotion and by the retention sweep.
    pub async fn purge_session(&self, session_id: &str) -> ChunkStoreResult<()> {
        sqlx::query("DELETE FROM chunks WHERE session_id = ?")
            .bind(session_id)
            .execute(&*self.db)
            .await?;

        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir).await {
            Ok(_) => debug!("removed session payload dir {}", dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("session dir {} already missing", dir.display());
            }
            Err(err) => return Err(ChunkStoreError::Io(err)),
        }

        if let Some(parent) = dir.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }

        Ok(())
    }

    /// Delete all chunk data for sessions idle past the retention window.
    ///
    /// Safe to run concurrently with active uploads: the idle predicate is
    /// re-evaluated inside each DELETE, so a session that received a chunk
    /// after the sweep selected it is left alone. Returns the number of
    /// sessions purged.
    pub async fn cleanup_old_sessions(
        &self,
        retention: std::time::Duration,
    ) -> ChunkStoreResult<u64> {
        let cutoff: DateTime<Utc> = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::hours(6));

        let idle: Vec<String> = sqlx::query_scalar(
            "SELECT session_id FROM chunks GROUP BY session_id HAVING MAX(received_at) < ?",
        )
        .bind(cutoff)
        .fetch_all(&*self.db)
        .await?;

        let mut purged = 0u64;
        for session_id in idle {
            // Deletion-time recheck: skip the session if a chunk arrived
            // since the sweep selected it.
            let result = sqlx::query(
                "DELETE FROM chunks WHERE session_id = ?
                 AND (SELECT MAX(received_at) FROM chunks WHERE session_id = ?) < ?",
            )
            .bind(&session_id)
            .bind(&session_id)
            .bind(cutoff)
            .execute(&*self.db)
            .await?;

            if result.rows_affected() == 0 {
                continue;
            }

            let dir = self.session_dir(&session_id);
            if let Err(err) = fs::remove_dir_all(&dir).await {
                if err.kind() != ErrorKind::NotFound {
                    debug!(
                        "failed to remove payload dir {} for expired session: {}",
                        dir.display(),
                        err
                    );
                }
            }
            if let Some(parent) = dir.parent() {
                self.prune_empty_dirs(parent, &self.base_path).await;
            }

            debug!(session = %session_id, "purged expired session");
            purged += 1;
        }

        Ok(purged)
    }

    /// Recursively remove empty directories up to the storage root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}
