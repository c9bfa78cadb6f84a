//! Version records owned by the external version store

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{ChangeId, FileId, ReasonCode, VersionId};

/// Immutable record of one stored version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub file_id: FileId,
    pub version_id: VersionId,
    /// This version's position in the change chain
    pub base_change_id: ChangeId,
    pub is_conflicted: bool,
    #[serde(default)]
    pub conflicting_file_reason: Option<ReasonCode>,
    /// Hex SHA-256 of the stored bytes
    pub digest: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

/// Pointer to the version currently served as "latest"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestVersion {
    pub version_id: VersionId,
    pub base_change_id: ChangeId,
}

/// Client-side description of an edit carried by a save
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeInfo {
    pub change_type: String,
    #[serde(default)]
    pub target: Option<String>,
}

/// Hex SHA-256 digest used to recognise retried uploads
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
