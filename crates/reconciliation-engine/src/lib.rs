//! Drives one full reconciliation pass against the sync server (§4.8).
//!
//! `ReconciliationEngine` is the only thing in the workspace allowed to
//! write decrypted note content to disk or push encrypted content to the
//! server; everything else routes through it.

#![deny(unsafe_code)]

mod plan;
mod scan;

pub use plan::WritePlan;
pub use scan::derive_path_from_title;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use conflict_resolver::{resolve, ConflictOutcome};
use crypto_core::CryptoCore;
use ignore_filter::IgnoreFilter;
use local_index::LocalIndex;
use remote_api::{LocalNoteSummary, RemoteApi};
use sync_core::{
    ChangeKind, FileChangeEvent, Filesystem, LocalMapping, Note, NoteVersionRow, SyncError,
    SyncResult,
};
use upload_queue::UploadQueue;

fn from_crypto_error(e: crypto_core::Error) -> SyncError {
    match e {
        crypto_core::Error::NotUnlocked => SyncError::NotUnlocked,
        crypto_core::Error::WrongPassword => SyncError::WrongPassword,
        crypto_core::Error::InvalidCiphertext => SyncError::InvalidCiphertext,
        crypto_core::Error::Encoding(msg) => SyncError::Corruption(msg),
    }
}

/// Lets the engine suspend local change notifications around a
/// programmatic write without depending on `change-source` directly.
pub trait PauseHandle: Send + Sync {
    fn pause(&self);
    fn resume(&self);
}

/// A conflict awaiting a user decision, kept until the caller resolves it
/// out of band.
#[derive(Debug, Clone)]
pub struct PendingConflict {
    pub path: PathBuf,
    pub note_id: String,
    pub local_plaintext: String,
}

/// Tally of what one `reconcile()` call did, surfaced as `SyncComplete`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub uploaded: u32,
    pub downloaded: u32,
    pub deleted: u32,
    pub conflicts_registered: u32,
    /// Server-reported time this pass's manifest/diff was computed against,
    /// the same value written to `LocalIndex`'s `last_sync_time` meta row.
    pub sync_time: String,
}

pub struct ReconciliationEngine {
    local_index: LocalIndex,
    crypto: Arc<CryptoCore>,
    filesystem: Arc<dyn Filesystem>,
    remote: Arc<dyn RemoteApi>,
    upload_queue: Arc<UploadQueue>,
    ignore: Arc<IgnoreFilter>,
    events: sync_core::EventBus,
    workspace_root: PathBuf,
    pause_handle: Option<Arc<dyn PauseHandle>>,
    is_syncing: AtomicBool,
    conflicts: Mutex<HashMap<PathBuf, PendingConflict>>,
}

impl ReconciliationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_index: LocalIndex,
        crypto: Arc<CryptoCore>,
        filesystem: Arc<dyn Filesystem>,
        remote: Arc<dyn RemoteApi>,
        upload_queue: Arc<UploadQueue>,
        ignore: Arc<IgnoreFilter>,
        events: sync_core::EventBus,
        workspace_root: PathBuf,
        pause_handle: Option<Arc<dyn PauseHandle>>,
    ) -> Self {
        Self {
            local_index,
            crypto,
            filesystem,
            remote,
            upload_queue,
            ignore,
            events,
            workspace_root,
            pause_handle,
            is_syncing: AtomicBool::new(false),
            conflicts: Mutex::new(HashMap::new()),
        }
    }

    pub fn pending_conflicts(&self) -> Vec<PendingConflict> {
        self.conflicts.lock().expect("lock poisoned").values().cloned().collect()
    }

    /// Drops a conflict after the caller has written a user-chosen
    /// resolution and enqueued its own upload.
    pub fn clear_conflict(&self, path: &Path) {
        self.conflicts.lock().expect("lock poisoned").remove(path);
    }

    fn with_paused_write<T>(&self, f: impl FnOnce() -> SyncResult<T>) -> SyncResult<T> {
        if let Some(handle) = &self.pause_handle {
            handle.pause();
        }
        let result = f();
        if let Some(handle) = &self.pause_handle {
            handle.resume();
        }
        result
    }

    /// Runs the full reconciliation sequence (§4.8 steps 1-12). Refuses to
    /// start a second pass while one is already running.
    pub async fn reconcile(&self, token: &str, workspace_id: &str) -> SyncResult<ReconcileSummary> {
        if self.is_syncing.swap(true, Ordering::SeqCst) {
            return Err(SyncError::SyncTransient("reconciliation already running".into()));
        }
        let result = self.reconcile_inner(token, workspace_id).await;
        self.is_syncing.store(false, Ordering::SeqCst);
        result
    }

    async fn reconcile_inner(&self, token: &str, workspace_id: &str) -> SyncResult<ReconcileSummary> {
        self.events.publish(sync_core::SyncEvent::SyncStart { workspace_id: workspace_id.into() });
        let mut summary = ReconcileSummary::default();

        // 1. Fetch manifest.
        let manifest = self.remote.fetch_manifest(token, workspace_id).await?;
        let server_known_ids: HashSet<String> = manifest.notes.iter().map(|m| m.id.clone()).collect();

        // 2. Scan local files and classify.
        let all_mappings = self.local_index.all_mappings()?;
        let mappings_by_path: HashMap<PathBuf, LocalMapping> =
            all_mappings.into_iter().map(|m| (m.path.clone(), m)).collect();

        let (scanned, orphaned) = scan::scan(
            self.filesystem.as_ref(),
            &self.ignore,
            &self.workspace_root,
            &mappings_by_path,
            &server_known_ids,
        )
        .map_err(SyncError::Io)?;
        for path in &orphaned {
            self.local_index.delete_mapping_by_path(path)?;
        }

        let mut local_notes = Vec::new();
        let mut unmapped_candidates = Vec::new();
        for file in scanned {
            match file {
                scan::ScannedFile::MappedKnown { path, note_id, local_hash, last_synced_version } => {
                    local_notes.push(LocalNoteSummary {
                        id: note_id.clone(),
                        content_hash: local_hash.clone(),
                        version: last_synced_version,
                    });
                    // 11. Refresh hashes for the unconditionally-matched rows now;
                    // entries also appearing in a download/conflict below get
                    // overwritten again with the post-merge hash.
                    if let Some(mut mapping) = mappings_by_path.get(&path).cloned() {
                        mapping.content_hash_last_synced = local_hash;
                        self.local_index.put_mapping(&mapping)?;
                    }
                }
                scan::ScannedFile::Unmapped { path, local_hash } => {
                    unmapped_candidates.push((path, local_hash));
                }
            }
        }

        // 3. Batch diff.
        let diff = self.remote.batch_diff(token, workspace_id, &local_notes).await?;
        summary.sync_time = diff.sync_time.clone();

        // 4. Apply downloads.
        for note in &diff.to_download {
            self.apply_download(note, &mut summary).await?;
        }

        // 5. Apply uploads the server asked us to push.
        for note_id in &diff.to_upload {
            if let Some(mapping) = self.local_index.get_mapping_by_note_id(note_id)? {
                let content = self.filesystem.read(&mapping.path).map_err(SyncError::Io)?;
                let hash = sync_core::hashing::sha256_hex(&content);
                self.upload_queue.enqueue(FileChangeEvent::upsert(
                    ChangeKind::Modify,
                    mapping.path,
                    hash,
                    0,
                ));
            }
        }

        // 6. Apply deletes.
        for note_id in &diff.to_delete {
            if let Some(mapping) = self.local_index.get_mapping_by_note_id(note_id)? {
                self.with_paused_write(|| {
                    let _ = self.filesystem.delete_to_trash(&mapping.path);
                    Ok(())
                })?;
                self.local_index.delete_mapping_by_path(&mapping.path)?;
                summary.deleted += 1;
            }
        }

        // 7. Resolve batch-diff-reported conflicts.
        for conflict in &diff.conflicts {
            self.resolve_conflict(token, &conflict.note_id, &mut summary).await?;
        }

        // 8. Pull notes the manifest knows about but we've never mapped.
        for entry in &manifest.notes {
            if entry.is_deleted {
                continue;
            }
            if self.local_index.get_mapping_by_note_id(&entry.id)?.is_some() {
                continue;
            }
            let note = self.remote.get_note(token, &entry.id).await?;
            self.download_new_note(&note, &mut summary).await?;
        }

        // 9. Upload new local files: pause, drain synchronously, resume.
        self.upload_queue.pause();
        for (path, local_hash) in unmapped_candidates {
            self.upload_new_file(token, workspace_id, &path, &local_hash, &mut summary).await?;
        }
        self.upload_queue.resume();

        // 10 is folded into step 2's immediate refresh above and the writes
        // performed in download/conflict/upload handling.

        // 12. Orphan cleanup: mappings whose file no longer exists on disk.
        for mapping in self.local_index.all_mappings()? {
            if !self.filesystem.exists(&mapping.path) {
                self.local_index.delete_mapping_by_path(&mapping.path)?;
            }
        }

        self.local_index.put_meta("last_sync_time", &diff.sync_time)?;

        self.events.publish(sync_core::SyncEvent::SyncComplete {
            workspace_id: workspace_id.into(),
            uploaded: summary.uploaded,
            downloaded: summary.downloaded,
            deleted: summary.deleted,
        });
        Ok(summary)
    }

    async fn apply_download(&self, note: &Note, summary: &mut ReconcileSummary) -> SyncResult<()> {
        let Some(mapping) = self.local_index.get_mapping_by_note_id(&note.id)? else {
            // No prior mapping: treat it like a fresh pull (§4.8.1 "no S" row).
            return self.download_new_note(note, summary).await;
        };

        let local_exists = self.filesystem.exists(&mapping.path);
        let local_hash = if local_exists {
            sync_core::hashing::sha256_hex(&self.filesystem.read(&mapping.path).map_err(SyncError::Io)?)
        } else {
            String::new()
        };

        let write_plan = if !local_exists {
            WritePlan::AcceptServer
        } else {
            plan::decide(&local_hash, &note.content_hash, Some(&mapping.content_hash_last_synced))
        };

        match write_plan {
            WritePlan::NoOp => {
                let mut mapping = mapping;
                mapping.version = note.version;
                self.local_index.put_mapping(&mapping)?;
            }
            WritePlan::AcceptServer | WritePlan::FirstSync => {
                let (_title, content) = self.crypto.decrypt_note(note).map_err(from_crypto_error)?;
                self.with_paused_write(|| {
                    self.filesystem.write(&mapping.path, content.as_bytes()).map_err(SyncError::Io)
                })?;
                let mut mapping = mapping;
                mapping.version = note.version;
                mapping.content_hash_last_synced = note.content_hash.clone();
                mapping.updated_at = note.updated_at.clone();
                self.local_index.put_mapping(&mapping)?;
                self.local_index.put_note(note)?;
                self.local_index.put_note_version(
                    &mapping.path,
                    &NoteVersionRow {
                        version: note.version,
                        note_id: note.id.clone(),
                        content_hash: note.content_hash.clone(),
                        updated_at: note.updated_at.clone(),
                    },
                )?;
                summary.downloaded += 1;
            }
            WritePlan::SkipLocalAhead => {
                // Local edit will go out on the next upload pass; nothing to do.
            }
            WritePlan::Conflict => {
                let (_title, remote_plaintext) =
                    self.crypto.decrypt_note(note).map_err(from_crypto_error)?;
                let local_plaintext = String::from_utf8_lossy(
                    &self.filesystem.read(&mapping.path).map_err(SyncError::Io)?,
                )
                .into_owned();
                self.settle_conflict(&mapping.path, &note.id, &local_plaintext, &remote_plaintext, note.version, summary)?;
            }
        }
        Ok(())
    }

    async fn download_new_note(&self, note: &Note, summary: &mut ReconcileSummary) -> SyncResult<()> {
        let (title, content) = self.crypto.decrypt_note(note).map_err(from_crypto_error)?;
        let path = scan::derive_path_from_title(&self.workspace_root, &note.id, &title);
        self.with_paused_write(|| self.filesystem.write(&path, content.as_bytes()).map_err(SyncError::Io))?;

        self.local_index.put_mapping(&LocalMapping {
            path: path.clone(),
            note_id: note.id.clone(),
            version: note.version,
            content_hash_last_synced: note.content_hash.clone(),
            updated_at: note.updated_at.clone(),
        })?;
        self.local_index.put_note(note)?;
        self.local_index.put_note_version(
            &path,
            &NoteVersionRow {
                version: note.version,
                note_id: note.id.clone(),
                content_hash: note.content_hash.clone(),
                updated_at: note.updated_at.clone(),
            },
        )?;
        summary.downloaded += 1;
        Ok(())
    }

    async fn resolve_conflict(
        &self,
        token: &str,
        note_id: &str,
        summary: &mut ReconcileSummary,
    ) -> SyncResult<()> {
        let Some(mapping) = self.local_index.get_mapping_by_note_id(note_id)? else {
            return Ok(());
        };
        if !self.filesystem.exists(&mapping.path) {
            return Ok(());
        }
        let note = self.remote.get_note(token, note_id).await?;
        let (_title, remote_plaintext) = self.crypto.decrypt_note(&note).map_err(from_crypto_error)?;
        let local_plaintext =
            String::from_utf8_lossy(&self.filesystem.read(&mapping.path).map_err(SyncError::Io)?)
                .into_owned();
        self.settle_conflict(&mapping.path, note_id, &local_plaintext, &remote_plaintext, note.version, summary)
    }

    /// Plaintext of the note as of the last successful sync, used as the
    /// merge base. `local_index` keeps `notes` in step with
    /// `content_hash_last_synced` at every write site, so the cached row is
    /// always the right ancestor; a missing row (never synced before) means
    /// there is nothing to merge against.
    fn last_synced_plaintext(&self, note_id: &str) -> SyncResult<String> {
        match self.local_index.get_note(note_id)? {
            Some(note) => {
                let (_title, content) = self.crypto.decrypt_note(&note).map_err(from_crypto_error)?;
                Ok(content)
            }
            None => Ok(String::new()),
        }
    }

    fn settle_conflict(
        &self,
        path: &Path,
        note_id: &str,
        local_plaintext: &str,
        remote_plaintext: &str,
        expected_version: u64,
        summary: &mut ReconcileSummary,
    ) -> SyncResult<()> {
        let path_str = path.to_string_lossy().into_owned();
        let ancestor = self.last_synced_plaintext(note_id)?;
        match resolve(&path_str, &ancestor, local_plaintext, remote_plaintext) {
            ConflictOutcome::AutoMerged(merged) => {
                self.with_paused_write(|| {
                    self.filesystem.write(path, merged.as_bytes()).map_err(SyncError::Io)
                })?;
                let hash = sync_core::hashing::sha256_hex(merged.as_bytes());
                // Bump the mapping to the server's version before enqueueing
                // the upload, so the PUT's `expected_version` lines up with
                // what the server just told us it has.
                if let Some(mut mapping) = self.local_index.get_mapping_by_path(path)? {
                    mapping.version = expected_version;
                    mapping.content_hash_last_synced = hash.clone();
                    self.local_index.put_mapping(&mapping)?;
                }
                self.upload_queue.enqueue(FileChangeEvent::upsert(
                    ChangeKind::Modify,
                    path.to_path_buf(),
                    hash,
                    0,
                ));
            }
            ConflictOutcome::NeedsUserDecision(local) => {
                self.conflicts.lock().expect("lock poisoned").insert(
                    path.to_path_buf(),
                    PendingConflict { path: path.to_path_buf(), note_id: note_id.into(), local_plaintext: local },
                );
                self.events.publish(sync_core::SyncEvent::ConflictAdded { path: path_str });
                summary.conflicts_registered += 1;
            }
        }
        Ok(())
    }

    async fn upload_new_file(
        &self,
        token: &str,
        workspace_id: &str,
        path: &Path,
        local_hash: &str,
        summary: &mut ReconcileSummary,
    ) -> SyncResult<()> {
        let content = self.filesystem.read(path).map_err(SyncError::Io)?;
        let content = String::from_utf8_lossy(&content).into_owned();
        let title = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();

        let blob = self.crypto.encrypt_note(&title, &content).map_err(from_crypto_error)?;
        let note = self.remote.create_note(token, workspace_id, &blob).await?;

        self.local_index.put_mapping(&LocalMapping {
            path: path.to_path_buf(),
            note_id: note.id.clone(),
            version: note.version,
            content_hash_last_synced: local_hash.to_string(),
            updated_at: note.updated_at.clone(),
        })?;
        self.local_index.put_note(&note)?;
        self.local_index.put_note_version(
            path,
            &NoteVersionRow {
                version: note.version,
                note_id: note.id.clone(),
                content_hash: note.content_hash.clone(),
                updated_at: note.updated_at.clone(),
            },
        )?;
        summary.uploaded += 1;
        Ok(())
    }

    /// Executes one queued upload end to end: read, encrypt, PUT with
    /// `expected_version`, bump the mapping on success, retry-with-merge
    /// on a 409 (§4.8.2).
    pub async fn process_upload(&self, token: &str, item: &sync_core::UploadQueueItem) -> SyncResult<()> {
        let path = &item.event.path;
        match item.event.kind {
            ChangeKind::Delete => self.process_delete_upload(token, path).await,
            ChangeKind::Rename => self.process_rename_upload(token, item).await,
            ChangeKind::Create | ChangeKind::Modify => self.process_upsert_upload(token, path).await,
        }
    }

    async fn process_upsert_upload(&self, token: &str, path: &Path) -> SyncResult<()> {
        let content = self.filesystem.read(path).map_err(SyncError::Io)?;
        let content = String::from_utf8_lossy(&content).into_owned();
        let title = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let blob = self.crypto.encrypt_note(&title, &content).map_err(from_crypto_error)?;

        let Some(mapping) = self.local_index.get_mapping_by_path(path)? else {
            // Never synced before; the caller should have gone through
            // `upload_new_file`, but handle it defensively.
            warn!(?path, "processing upload with no local mapping");
            return Ok(());
        };

        match self.remote.update_note(token, &mapping.note_id, &blob, mapping.version).await {
            Ok(note) => {
                let mut mapping = mapping;
                mapping.version = note.version;
                mapping.content_hash_last_synced = note.content_hash.clone();
                self.local_index.put_mapping(&mapping)?;
                self.upload_queue.mark_success(path);
                Ok(())
            }
            Err(SyncError::VersionConflict { .. }) => {
                // The server rejected `expected_version`; apply the §4.8.1
                // decision table against its current version before
                // deciding whether this is an actual conflict.
                let remote_note = self.remote.get_note(token, &mapping.note_id).await?;
                let local_hash = sync_core::hashing::sha256_hex(content.as_bytes());
                let write_plan =
                    plan::decide(&local_hash, &remote_note.content_hash, Some(&mapping.content_hash_last_synced));

                match write_plan {
                    WritePlan::NoOp => {
                        let mut mapping = mapping;
                        mapping.version = remote_note.version;
                        mapping.content_hash_last_synced = remote_note.content_hash.clone();
                        self.local_index.put_mapping(&mapping)?;
                        self.local_index.put_note(&remote_note)?;
                        self.upload_queue.mark_success(path);
                        Ok(())
                    }
                    WritePlan::AcceptServer | WritePlan::FirstSync => {
                        // Stale retry: our content never changed since the
                        // last sync, the server simply moved on. Take theirs.
                        let (_title, remote_plaintext) =
                            self.crypto.decrypt_note(&remote_note).map_err(from_crypto_error)?;
                        self.with_paused_write(|| {
                            self.filesystem.write(path, remote_plaintext.as_bytes()).map_err(SyncError::Io)
                        })?;
                        let mut mapping = mapping;
                        mapping.version = remote_note.version;
                        mapping.content_hash_last_synced = remote_note.content_hash.clone();
                        mapping.updated_at = remote_note.updated_at.clone();
                        self.local_index.put_mapping(&mapping)?;
                        self.local_index.put_note(&remote_note)?;
                        self.upload_queue.mark_success(path);
                        Ok(())
                    }
                    WritePlan::SkipLocalAhead => {
                        // Remote hasn't actually changed content since our
                        // last sync; only `expected_version` was stale.
                        // Bump it and let the queue retry the same upload.
                        let mut mapping = mapping;
                        mapping.version = remote_note.version;
                        self.local_index.put_mapping(&mapping)?;
                        self.upload_queue.mark_failure(path, "expected_version stale, retrying".into());
                        Ok(())
                    }
                    WritePlan::Conflict => {
                        let (_title, remote_plaintext) =
                            self.crypto.decrypt_note(&remote_note).map_err(from_crypto_error)?;
                        let mut summary = ReconcileSummary::default();
                        self.settle_conflict(
                            path,
                            &mapping.note_id,
                            &content,
                            &remote_plaintext,
                            remote_note.version,
                            &mut summary,
                        )?;
                        self.upload_queue.remove(path);
                        Ok(())
                    }
                }
            }
            Err(e) => {
                self.upload_queue.mark_failure(path, e.to_string());
                Err(e)
            }
        }
    }

    async fn process_delete_upload(&self, token: &str, path: &Path) -> SyncResult<()> {
        let Some(mapping) = self.local_index.get_mapping_by_path(path)? else {
            return Ok(());
        };
        match self.remote.delete_note(token, &mapping.note_id).await {
            Ok(()) => {
                self.local_index.delete_mapping_by_path(path)?;
                self.upload_queue.mark_success(path);
                Ok(())
            }
            Err(e) => {
                self.upload_queue.mark_failure(path, e.to_string());
                Err(e)
            }
        }
    }

    async fn process_rename_upload(&self, token: &str, item: &sync_core::UploadQueueItem) -> SyncResult<()> {
        let new_path = &item.event.path;
        let Some(old_path) = &item.event.old_path else {
            return self.process_upsert_upload(token, new_path).await;
        };
        let Some(mapping) = self.local_index.get_mapping_by_path(old_path)? else {
            return self.process_upsert_upload(token, new_path).await;
        };
        self.local_index.rename_mapping(old_path, new_path, &mapping.note_id)?;
        info!(?old_path, ?new_path, "renamed mapping ahead of content sync");
        self.process_upsert_upload(token, new_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_api::FakeRemote;
    use sync_core::FakeFilesystem;

    fn engine(fs: Arc<FakeFilesystem>, remote: Arc<FakeRemote>) -> ReconciliationEngine {
        let dir = tempfile::tempdir().unwrap();
        let local_index = LocalIndex::open(&dir.path().join("db")).unwrap();
        let crypto = Arc::new(CryptoCore::new());
        crypto.setup("correct horse battery staple");
        let ignore = Arc::new(IgnoreFilter::new(&[]).unwrap());
        let events = sync_core::EventBus::default();
        let clock = sync_core::VirtualClock::new(0);
        let upload_queue = Arc::new(UploadQueue::new(clock, events.clone()));

        ReconciliationEngine::new(
            local_index,
            crypto,
            fs,
            remote,
            upload_queue,
            ignore,
            events,
            PathBuf::from("/w"),
            None,
        )
    }

    #[tokio::test]
    async fn unmapped_local_file_is_uploaded_as_a_new_note() {
        let fs = Arc::new(FakeFilesystem::new());
        fs.seed("/w/draft.md", "hello world");
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(fs, remote.clone());

        let summary = engine.reconcile("tok", "ws1").await.unwrap();

        assert_eq!(summary.uploaded, 1);
        assert_eq!(remote.note_count(), 1);
        let mappings = engine.local_index.all_mappings().unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].path, PathBuf::from("/w/draft.md"));
    }

    #[tokio::test]
    async fn concurrent_reconcile_is_rejected() {
        let fs = Arc::new(FakeFilesystem::new());
        let remote = Arc::new(FakeRemote::new());
        let engine = Arc::new(engine(fs, remote));

        engine.is_syncing.store(true, Ordering::SeqCst);
        let err = engine.reconcile("tok", "ws1").await.unwrap_err();
        assert!(matches!(err, SyncError::SyncTransient(_)));
    }

    #[tokio::test]
    async fn orphaned_mapping_to_deleted_remote_note_is_reuploaded() {
        let fs = Arc::new(FakeFilesystem::new());
        fs.seed("/w/a.md", "content");
        let remote = Arc::new(FakeRemote::new());
        let engine = engine(fs, remote.clone());

        engine
            .local_index
            .put_mapping(&LocalMapping {
                path: "/w/a.md".into(),
                note_id: "ghost".into(),
                version: 1,
                content_hash_last_synced: "stale".into(),
                updated_at: "t".into(),
            })
            .unwrap();

        let summary = engine.reconcile("tok", "ws1").await.unwrap();
        assert_eq!(summary.uploaded, 1);
        let mapping = engine.local_index.get_mapping_by_path(Path::new("/w/a.md")).unwrap().unwrap();
        assert_ne!(mapping.note_id, "ghost");
    }
}
