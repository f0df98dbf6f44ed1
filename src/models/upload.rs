//! Upload units and their recorded parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A logical unit of work moving one batch of files into cold storage.
///
/// Parts accumulate against the upload (one per named slot) as transfers
/// complete; finalization seals the unit with a manifest.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Upload {
    /// Unique identifier for this upload unit.
    pub id: Uuid,

    /// Owning tenant slug.
    pub tenant_slug: String,

    /// Destination folder in cold storage for all files of this upload.
    pub dest_folder_id: String,

    /// JSON array of slot names this upload expects before it can finalize.
    pub expected_slots: String,

    /// Cold-storage identifier of the written manifest, once finalized.
    pub manifest_file_id: Option<String>,

    /// When the upload unit was registered.
    pub created_at: DateTime<Utc>,

    /// When finalization succeeded. `None` while parts are still expected.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Upload {
    /// Decode the expected slot names from their stored JSON form.
    pub fn expected_slot_names(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.expected_slots)
    }
}

/// One file recorded against an upload unit.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UploadPart {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Owning upload unit.
    pub upload_id: Uuid,

    /// Named category this file fills (unique per upload).
    pub slot: String,

    /// Cold-storage identifier of the transferred file.
    pub file_id: String,

    /// Original filename.
    pub file_name: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type).
    pub content_type: String,

    /// When the transfer completed.
    pub uploaded_at: DateTime<Utc>,
}
