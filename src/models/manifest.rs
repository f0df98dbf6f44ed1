//! The manifest artifact proving an upload unit is complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::upload::UploadPart;

/// Durable record enumerating every file of one completed upload unit.
///
/// Built once during finalization, written once to the destination folder
/// alongside the files, immutable thereafter.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadManifest {
    /// The upload unit this manifest seals.
    pub upload_id: Uuid,

    /// When the manifest was built.
    pub created_at: DateTime<Utc>,

    /// Number of enumerated parts.
    pub total_files: usize,

    /// One entry per recorded part, in slot order.
    pub parts: Vec<ManifestEntry>,
}

/// A single file enumerated by the manifest.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Named slot the file fills.
    pub slot: String,

    /// Original filename.
    pub file_name: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Content type.
    pub content_type: String,

    /// Cold-storage identifier of the file.
    pub file_id: String,
}

impl UploadManifest {
    /// Assemble a manifest from the recorded parts of an upload.
    pub fn from_parts(upload_id: Uuid, created_at: DateTime<Utc>, parts: &[UploadPart]) -> Self {
        let mut entries: Vec<ManifestEntry> = parts
            .iter()
            .map(|p| ManifestEntry {
                slot: p.slot.clone(),
                file_name: p.file_name.clone(),
                size_bytes: p.size_bytes,
                content_type: p.content_type.clone(),
                file_id: p.file_id.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.slot.cmp(&b.slot));

        Self {
            upload_id,
            created_at,
            total_files: entries.len(),
            parts: entries,
        }
    }

    /// Conventional filename for the manifest inside the destination folder.
    pub fn file_name(&self) -> String {
        format!("manifest-{}.json", self.upload_id)
    }
}
