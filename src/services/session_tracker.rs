//! Read-side projection over chunk store state.
//!
//! Chunk delivery for one session can land on different server instances,
//! so progress is recomputed from persisted rows on every call — nothing is
//! cached in memory.

use crate::models::session::SessionStatus;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// Pure query facade: answers "how far along is this session" from the
/// chunks table. Holds no state beyond the pool handle.
#[derive(Clone)]
pub struct SessionTracker {
    pub db: Arc<SqlitePool>,
}

impl SessionTracker {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Current derived status for a session, `None` when it has no chunks.
    pub async fn status(&self, session_id: &str) -> Result<Option<SessionStatus>, sqlx::Error> {
        query_status(&self.db, session_id).await
    }
}

/// Derive a session's status from its stored chunk rows.
///
/// The received count is `COUNT(*)` over the rows — the primary key on
/// `(session_id, chunk_index)` makes that the count of distinct indices.
/// File/tenant metadata is taken from the most recently received chunk.
pub async fn query_status(
    db: &SqlitePool,
    session_id: &str,
) -> Result<Option<SessionStatus>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS received_chunks,
                SUM(size_bytes) AS buffered_bytes
         FROM chunks WHERE session_id = ?",
    )
    .bind(session_id)
    .fetch_one(db)
    .await?;

    let received_chunks: i64 = row.get("received_chunks");
    if received_chunks == 0 {
        return Ok(None);
    }
    let buffered_bytes: i64 = row.get("buffered_bytes");

    let latest = sqlx::query(
        "SELECT total_chunks, file_name, content_type, tenant_slug, tenant_name,
                dest_folder_id, received_at
         FROM chunks WHERE session_id = ?
         ORDER BY received_at DESC, chunk_index DESC LIMIT 1",
    )
    .bind(session_id)
    .fetch_one(db)
    .await?;

    let total_chunks: i64 = latest.get("total_chunks");

    Ok(Some(SessionStatus {
        session_id: session_id.to_string(),
        received_chunks,
        total_chunks,
        is_complete: SessionStatus::complete(received_chunks, total_chunks),
        last_activity: latest.get("received_at"),
        file_name: latest.get("file_name"),
        content_type: latest.get("content_type"),
        tenant_slug: latest.get("tenant_slug"),
        tenant_name: latest.get("tenant_name"),
        dest_folder_id: latest.get("dest_folder_id"),
        buffered_bytes,
    }))
}
