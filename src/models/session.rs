//! Derived status of a chunk-buffering session.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot of a session's progress, recomputed from the stored chunk rows
/// on every query. There is no session table: a session exists exactly as
/// long as it has chunks.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// The session identifier.
    pub session_id: String,

    /// Count of distinct chunk indices stored so far.
    pub received_chunks: i64,

    /// Declared total chunk count for the file.
    pub total_chunks: i64,

    /// True iff `received_chunks == total_chunks` and `total_chunks > 0`.
    pub is_complete: bool,

    /// Most recent chunk arrival time.
    pub last_activity: DateTime<Utc>,

    /// Original filename of the file being assembled.
    pub file_name: String,

    /// Content type of the finished file.
    pub content_type: String,

    /// Owning tenant slug.
    pub tenant_slug: String,

    /// Owning tenant display name.
    pub tenant_name: String,

    /// Destination folder for the finished file.
    pub dest_folder_id: String,

    /// Total bytes buffered across all stored chunks.
    pub buffered_bytes: i64,
}

impl SessionStatus {
    /// Completion predicate shared by store and tracker.
    pub fn complete(received: i64, total: i64) -> bool {
        total > 0 && received == total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_requires_positive_total() {
        assert!(!SessionStatus::complete(0, 0));
        assert!(!SessionStatus::complete(2, 3));
        assert!(SessionStatus::complete(3, 3));
        assert!(SessionStatus::complete(1, 1));
    }
}
