//! Domain types shared by every layer of the sync engine (§3 of the design doc).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `type` discriminant of a [`Note`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    File,
    Directory,
}

/// Tag identifying the authenticated-encryption scheme used for a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionAlgo {
    /// AES-256-GCM with a 96-bit nonce embedded in the ciphertext envelope.
    Aes256GcmEmbedded,
    /// Legacy records: AES-256-GCM with the nonce carried in a separate field.
    Aes256GcmLegacy,
}

/// Server-authoritative note record (§3 `Note`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub workspace_id: String,
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: NoteKind,
    pub encrypted_title: String,
    pub encrypted_content: String,
    /// Legacy nonce field. Per §9 Open Question, any value here is
    /// informational-only once `encryption_algo` indicates an embedded nonce.
    pub nonce: Option<String>,
    pub encryption_algo: EncryptionAlgo,
    pub created_at: String,
    pub updated_at: String,
    pub version: u64,
    pub content_hash: String,
    pub is_deleted: bool,
    pub last_edit_device: Option<String>,
}

/// Compact server-side projection of a [`Note`] used for manifest diffing (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub content_hash: String,
    pub version: u64,
    pub updated_at: String,
    pub is_deleted: bool,
}

/// Local mapping from a filesystem path to a server note (§3 `LocalMapping`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMapping {
    pub path: PathBuf,
    pub note_id: String,
    pub version: u64,
    pub content_hash_last_synced: String,
    pub updated_at: String,
}

/// The version a local path's content was last based on (the `note_versions` table, §4.2).
/// Keyed by path, one row per mapping, moved atomically with it on rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteVersionRow {
    pub version: u64,
    pub note_id: String,
    pub content_hash: String,
    pub updated_at: String,
}

/// Kind discriminant of a [`FileChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
    Rename,
}

/// A unified local-or-remote change notification (§3 `FileChangeEvent`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub old_path: Option<PathBuf>,
    pub content_hash: Option<String>,
    pub timestamp: u64,
}

impl FileChangeEvent {
    /// Build a `create`/`modify` event, attaching the plaintext body hash.
    pub fn upsert(kind: ChangeKind, path: PathBuf, content_hash: String, timestamp: u64) -> Self {
        debug_assert!(matches!(kind, ChangeKind::Create | ChangeKind::Modify));
        Self { kind, path, old_path: None, content_hash: Some(content_hash), timestamp }
    }

    /// Build a `delete` event.
    pub fn delete(path: PathBuf, timestamp: u64) -> Self {
        Self { kind: ChangeKind::Delete, path, old_path: None, content_hash: None, timestamp }
    }

    /// Build a `rename` event carrying both the old and new path.
    pub fn rename(old_path: PathBuf, new_path: PathBuf, timestamp: u64) -> Self {
        Self {
            kind: ChangeKind::Rename,
            path: new_path,
            old_path: Some(old_path),
            content_hash: None,
            timestamp,
        }
    }
}

/// An item pending upload, coalesced by path (§3 `UploadQueueItem`, §4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadQueueItem {
    pub event: FileChangeEvent,
    pub attempts: u32,
    pub next_retry_at_ms: u64,
    pub last_error: Option<String>,
}

impl UploadQueueItem {
    /// Construct a fresh item ready to be attempted immediately.
    pub fn new(event: FileChangeEvent, now_ms: u64) -> Self {
        Self { event, attempts: 0, next_retry_at_ms: now_ms, last_error: None }
    }
}

/// A local directory linked to a remote workspace (§3 `WorkspaceLink`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceLink {
    pub local_path: PathBuf,
    pub remote_workspace_id: String,
    pub linked_at: String,
}

/// Outcome of classifying a local file against the server manifest during
/// the scan-local-files step of reconciliation (§4.8 step 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalFileClass {
    /// Mapped locally and the note still exists server-side.
    MappedKnown { note_id: String, last_synced_version: u64, local_hash: String },
    /// Had a mapping, but the server no longer knows the note; treated as unmapped.
    Orphaned { local_hash: String },
    /// No mapping exists yet; candidate for a new upload.
    Unmapped { local_hash: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_event_constructors_set_expected_fields() {
        let up = FileChangeEvent::upsert(ChangeKind::Create, "a.md".into(), "h1".into(), 10);
        assert_eq!(up.kind, ChangeKind::Create);
        assert_eq!(up.content_hash.as_deref(), Some("h1"));

        let del = FileChangeEvent::delete("a.md".into(), 11);
        assert_eq!(del.kind, ChangeKind::Delete);
        assert!(del.content_hash.is_none());

        let ren = FileChangeEvent::rename("a.md".into(), "b.md".into(), 12);
        assert_eq!(ren.kind, ChangeKind::Rename);
        assert_eq!(ren.old_path.as_deref(), Some(std::path::Path::new("a.md")));
        assert_eq!(ren.path, std::path::PathBuf::from("b.md"));
    }

    #[test]
    fn upload_queue_item_starts_with_zero_attempts() {
        let ev = FileChangeEvent::delete("x.md".into(), 1);
        let item = UploadQueueItem::new(ev, 100);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.next_retry_at_ms, 100);
        assert!(item.last_error.is_none());
    }
}
