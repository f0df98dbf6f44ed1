//! Represents one buffered chunk of a client-side multi-part upload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata row for a single stored chunk.
///
/// The payload bytes live on disk; this row records where the chunk belongs
/// and what the finished file should look like. `(session_id, chunk_index)`
/// is the primary key, so re-delivery of the same chunk upserts rather than
/// duplicates.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ChunkRecord {
    /// Session this chunk belongs to (client-chosen opaque string).
    pub session_id: String,

    /// Zero-based position of this chunk within the file.
    pub chunk_index: i64,

    /// Declared number of chunks for the whole file.
    pub total_chunks: i64,

    /// Original filename of the file being assembled.
    pub file_name: String,

    /// Content type (MIME type) of the finished file.
    pub content_type: String,

    /// Payload size of this chunk in bytes.
    pub size_bytes: i64,

    /// Owning tenant slug, denormalized for downstream routing.
    pub tenant_slug: String,

    /// Owning tenant display name.
    pub tenant_name: String,

    /// Destination folder in cold storage for the finished file.
    pub dest_folder_id: String,

    /// When this chunk arrived (also drives session retention).
    pub received_at: DateTime<Utc>,
}
