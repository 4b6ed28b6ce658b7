//! In-memory double for [`RemoteApi`]/[`RemoteEvents`], used by
//! `reconciliation-engine` and `sync-orchestrator` tests to exercise sync
//! logic without a network.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crypto_core::WrappedKeyMaterial;
use sync_core::{Note, SyncError, SyncResult};

use crate::ws::{RemoteEvents, WsEvent};
use crate::{BatchDiffResult, LocalNoteSummary, ManifestResult, RemoteApi};

/// Shared state behind a `FakeRemote`; notes are keyed by id.
#[derive(Default)]
struct State {
    notes: HashMap<String, Note>,
    next_version_conflict: Option<(String, u64)>,
    key_material: Option<WrappedKeyMaterial>,
}

/// Test double holding notes in memory and letting callers dictate the
/// next version conflict, if any.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, note: Note) {
        self.state.lock().expect("lock poisoned").notes.insert(note.id.clone(), note);
    }

    /// Forces the next `update_note` call for `note_id` to fail with a
    /// version conflict reporting `actual_version`.
    pub fn force_conflict(&self, note_id: impl Into<String>, actual_version: u64) {
        self.state.lock().expect("lock poisoned").next_version_conflict =
            Some((note_id.into(), actual_version));
    }

    pub fn note_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").notes.len()
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn fetch_manifest(&self, _token: &str, workspace_id: &str) -> SyncResult<ManifestResult> {
        let state = self.state.lock().expect("lock poisoned");
        let notes = state
            .notes
            .values()
            .filter(|n| n.workspace_id == workspace_id)
            .map(|n| sync_core::ManifestEntry {
                id: n.id.clone(),
                content_hash: n.content_hash.clone(),
                version: n.version,
                updated_at: n.updated_at.clone(),
                is_deleted: n.is_deleted,
            })
            .collect();
        Ok(ManifestResult { notes, sync_time: "fake-sync-time".into() })
    }

    async fn batch_diff(
        &self,
        _token: &str,
        _workspace_id: &str,
        _local_notes: &[LocalNoteSummary],
    ) -> SyncResult<BatchDiffResult> {
        Ok(BatchDiffResult {
            to_download: Vec::new(),
            to_upload: Vec::new(),
            to_delete: Vec::new(),
            conflicts: Vec::new(),
            sync_time: "fake-sync-time".into(),
        })
    }

    async fn get_note(&self, _token: &str, note_id: &str) -> SyncResult<Note> {
        self.state
            .lock()
            .expect("lock poisoned")
            .notes
            .get(note_id)
            .cloned()
            .ok_or_else(|| SyncError::Remote(format!("no such note {note_id}")))
    }

    async fn create_note(
        &self,
        _token: &str,
        workspace_id: &str,
        blob: &crypto_core::EncryptedNote,
    ) -> SyncResult<Note> {
        let id = format!("note-{}", self.state.lock().expect("lock poisoned").notes.len() + 1);
        let note = Note {
            id: id.clone(),
            workspace_id: workspace_id.to_string(),
            parent_id: None,
            kind: sync_core::NoteKind::File,
            encrypted_title: blob.encrypted_title.clone(),
            encrypted_content: blob.encrypted_content.clone(),
            nonce: None,
            encryption_algo: blob.encryption_algo,
            created_at: "fake-time".into(),
            updated_at: "fake-time".into(),
            version: 1,
            content_hash: blob.content_hash.clone(),
            is_deleted: false,
            last_edit_device: None,
        };
        self.state.lock().expect("lock poisoned").notes.insert(id, note.clone());
        Ok(note)
    }

    async fn update_note(
        &self,
        _token: &str,
        note_id: &str,
        blob: &crypto_core::EncryptedNote,
        expected_version: u64,
    ) -> SyncResult<Note> {
        let mut state = self.state.lock().expect("lock poisoned");

        if let Some((conflicted_id, actual)) = state.next_version_conflict.clone() {
            if conflicted_id == note_id {
                state.next_version_conflict = None;
                return Err(SyncError::VersionConflict {
                    note_id: note_id.to_string(),
                    expected: expected_version,
                    actual,
                });
            }
        }

        let note = state
            .notes
            .get_mut(note_id)
            .ok_or_else(|| SyncError::Remote(format!("no such note {note_id}")))?;
        if note.version != expected_version {
            return Err(SyncError::VersionConflict {
                note_id: note_id.to_string(),
                expected: expected_version,
                actual: note.version,
            });
        }
        note.encrypted_title = blob.encrypted_title.clone();
        note.encrypted_content = blob.encrypted_content.clone();
        note.content_hash = blob.content_hash.clone();
        note.version += 1;
        Ok(note.clone())
    }

    async fn delete_note(&self, _token: &str, note_id: &str) -> SyncResult<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        match state.notes.get_mut(note_id) {
            Some(note) => {
                note.is_deleted = true;
                Ok(())
            }
            None => Err(SyncError::Remote(format!("no such note {note_id}"))),
        }
    }

    async fn setup_keys(&self, _token: &str, material: &WrappedKeyMaterial) -> SyncResult<()> {
        self.state.lock().expect("lock poisoned").key_material = Some(material.clone());
        Ok(())
    }

    async fn fetch_key_material(&self, _token: &str) -> SyncResult<Option<WrappedKeyMaterial>> {
        Ok(self.state.lock().expect("lock poisoned").key_material.clone())
    }
}

/// Controllable event source for [`RemoteEvents`] consumers in tests.
pub struct FakeRemoteEvents {
    rx: mpsc::Receiver<SyncResult<WsEvent>>,
}

impl FakeRemoteEvents {
    pub fn channel() -> (mpsc::Sender<SyncResult<WsEvent>>, Self) {
        let (tx, rx) = mpsc::channel(64);
        (tx, Self { rx })
    }
}

#[async_trait]
impl RemoteEvents for FakeRemoteEvents {
    async fn recv(&mut self) -> SyncResult<WsEvent> {
        self.rx.recv().await.unwrap_or(Err(SyncError::SyncTransient("fake event feed closed".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto_core::EncryptedNote;
    use sync_core::EncryptionAlgo;

    fn blob(hash: &str) -> EncryptedNote {
        EncryptedNote {
            encrypted_title: "t".into(),
            encrypted_content: "c".into(),
            encryption_algo: EncryptionAlgo::Aes256GcmEmbedded,
            content_hash: hash.into(),
        }
    }

    #[tokio::test]
    async fn create_then_fetch_round_trips() {
        let remote = FakeRemote::new();
        let created = remote.create_note("tok", "ws1", &blob("h1")).await.unwrap();
        let fetched = remote.get_note("tok", &created.id).await.unwrap();
        assert_eq!(fetched.content_hash, "h1");
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let remote = FakeRemote::new();
        let created = remote.create_note("tok", "ws1", &blob("h1")).await.unwrap();
        let err = remote.update_note("tok", &created.id, &blob("h2"), created.version + 1).await;
        assert!(matches!(err, Err(SyncError::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn forced_conflict_fires_once() {
        let remote = FakeRemote::new();
        let created = remote.create_note("tok", "ws1", &blob("h1")).await.unwrap();
        remote.force_conflict(&created.id, 9);

        let err = remote.update_note("tok", &created.id, &blob("h2"), created.version).await;
        assert!(matches!(err, Err(SyncError::VersionConflict { actual: 9, .. })));

        let ok = remote.update_note("tok", &created.id, &blob("h2"), created.version).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn key_material_round_trips_until_setup() {
        let remote = FakeRemote::new();
        assert!(remote.fetch_key_material("tok").await.unwrap().is_none());

        let material = WrappedKeyMaterial {
            salt: "salt".into(),
            kdf_iterations: 100_000,
            wrapped_key: "wrapped".into(),
        };
        remote.setup_keys("tok", &material).await.unwrap();

        let fetched = remote.fetch_key_material("tok").await.unwrap().unwrap();
        assert_eq!(fetched.salt, "salt");
        assert_eq!(fetched.kdf_iterations, 100_000);
        assert_eq!(fetched.wrapped_key, "wrapped");
    }
}
