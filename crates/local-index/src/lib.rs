//! Embedded persistent store backing the reconciliation engine (§4.2).
//!
//! Four logical tables, each a `sled` tree:
//! - `notes`: last-seen server `Note` rows, keyed by note id.
//! - `meta`: scalar bookkeeping (schema version).
//! - `path_mappings` + `path_mappings_by_note`: local path to note id,
//!   with a secondary index for the reverse lookup.
//! - `note_versions`: one row per path, holding the version a local edit
//!   was based on. Moves atomically with `path_mappings` on rename so the
//!   two tables always agree on which paths exist.
//!
//! `LocalIndex` owns `content_hash_last_synced` outright: nothing else in
//! the engine is allowed to treat a note as synced without going through
//! here first.

#![deny(unsafe_code)]

use std::path::Path;

use sled::transaction::Transactional;
use sync_core::{LocalMapping, Note, NoteVersionRow, SyncError, SyncResult};

const SCHEMA_VERSION: u64 = 1;
const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

fn to_local_index_err(e: sled::Error) -> SyncError {
    SyncError::LocalIndex(e.to_string())
}

fn to_json_err(e: serde_json::Error) -> SyncError {
    SyncError::LocalIndex(format!("serialization: {e}"))
}

/// Persistent handle onto the on-disk index. Cheap to clone (sled trees are
/// reference-counted handles onto the shared database).
#[derive(Clone)]
pub struct LocalIndex {
    notes: sled::Tree,
    meta: sled::Tree,
    path_mappings: sled::Tree,
    path_mappings_by_note: sled::Tree,
    note_versions: sled::Tree,
}

impl LocalIndex {
    /// Opens (creating if absent) the index database at `path`.
    pub fn open(path: &Path) -> SyncResult<Self> {
        let db = sled::open(path).map_err(to_local_index_err)?;
        let index = Self {
            notes: db.open_tree("notes").map_err(to_local_index_err)?,
            meta: db.open_tree("meta").map_err(to_local_index_err)?,
            path_mappings: db.open_tree("path_mappings").map_err(to_local_index_err)?,
            path_mappings_by_note: db
                .open_tree("path_mappings_by_note")
                .map_err(to_local_index_err)?,
            note_versions: db.open_tree("note_versions").map_err(to_local_index_err)?,
        };
        index.check_or_init_schema_version()?;
        Ok(index)
    }

    fn check_or_init_schema_version(&self) -> SyncResult<()> {
        match self.meta.get(SCHEMA_VERSION_KEY).map_err(to_local_index_err)? {
            None => {
                self.meta
                    .insert(SCHEMA_VERSION_KEY, &SCHEMA_VERSION.to_be_bytes())
                    .map_err(to_local_index_err)?;
                Ok(())
            }
            Some(raw) => {
                let bytes: [u8; 8] = raw
                    .as_ref()
                    .try_into()
                    .map_err(|_| SyncError::Corruption("malformed schema_version".into()))?;
                let found = u64::from_be_bytes(bytes);
                if found != SCHEMA_VERSION {
                    return Err(SyncError::Corruption(format!(
                        "local index schema version {found} is incompatible with {SCHEMA_VERSION}"
                    )));
                }
                Ok(())
            }
        }
    }

    // --- notes -----------------------------------------------------------

    pub fn put_note(&self, note: &Note) -> SyncResult<()> {
        let bytes = serde_json::to_vec(note).map_err(to_json_err)?;
        self.notes.insert(note.id.as_bytes(), bytes).map_err(to_local_index_err)?;
        Ok(())
    }

    pub fn get_note(&self, note_id: &str) -> SyncResult<Option<Note>> {
        match self.notes.get(note_id.as_bytes()).map_err(to_local_index_err)? {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_slice(&raw).map_err(to_json_err)?)),
        }
    }

    pub fn delete_note(&self, note_id: &str) -> SyncResult<()> {
        self.notes.remove(note_id.as_bytes()).map_err(to_local_index_err)?;
        Ok(())
    }

    pub fn all_notes(&self) -> SyncResult<Vec<Note>> {
        self.notes
            .iter()
            .values()
            .map(|r| r.map_err(to_local_index_err).and_then(|raw| {
                serde_json::from_slice(&raw).map_err(to_json_err)
            }))
            .collect()
    }

    // --- scalar metadata -----------------------------------------------------

    /// Reads an arbitrary string-keyed scalar from the `meta` table, e.g.
    /// `last_sync_time`.
    pub fn get_meta(&self, key: &str) -> SyncResult<Option<String>> {
        match self.meta.get(key.as_bytes()).map_err(to_local_index_err)? {
            None => Ok(None),
            Some(raw) => Ok(Some(String::from_utf8_lossy(&raw).into_owned())),
        }
    }

    pub fn put_meta(&self, key: &str, value: &str) -> SyncResult<()> {
        self.meta.insert(key.as_bytes(), value.as_bytes()).map_err(to_local_index_err)?;
        Ok(())
    }

    // --- path mappings -----------------------------------------------------

    fn path_key(path: &Path) -> Vec<u8> {
        path.to_string_lossy().into_owned().into_bytes()
    }

    pub fn put_mapping(&self, mapping: &LocalMapping) -> SyncResult<()> {
        let bytes = serde_json::to_vec(mapping).map_err(to_json_err)?;
        self.path_mappings
            .insert(Self::path_key(&mapping.path), bytes)
            .map_err(to_local_index_err)?;
        self.path_mappings_by_note
            .insert(mapping.note_id.as_bytes(), Self::path_key(&mapping.path))
            .map_err(to_local_index_err)?;
        Ok(())
    }

    pub fn get_mapping_by_path(&self, path: &Path) -> SyncResult<Option<LocalMapping>> {
        match self.path_mappings.get(Self::path_key(path)).map_err(to_local_index_err)? {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_slice(&raw).map_err(to_json_err)?)),
        }
    }

    pub fn get_mapping_by_note_id(&self, note_id: &str) -> SyncResult<Option<LocalMapping>> {
        let Some(path_bytes) = self
            .path_mappings_by_note
            .get(note_id.as_bytes())
            .map_err(to_local_index_err)?
        else {
            return Ok(None);
        };
        match self.path_mappings.get(&path_bytes).map_err(to_local_index_err)? {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_slice(&raw).map_err(to_json_err)?)),
        }
    }

    pub fn delete_mapping_by_path(&self, path: &Path) -> SyncResult<()> {
        if let Some(raw) = self.path_mappings.remove(Self::path_key(path)).map_err(to_local_index_err)? {
            let mapping: LocalMapping = serde_json::from_slice(&raw).map_err(to_json_err)?;
            self.path_mappings_by_note
                .remove(mapping.note_id.as_bytes())
                .map_err(to_local_index_err)?;
            self.note_versions.remove(Self::path_key(path)).map_err(to_local_index_err)?;
        }
        Ok(())
    }

    pub fn all_mappings(&self) -> SyncResult<Vec<LocalMapping>> {
        self.path_mappings
            .iter()
            .values()
            .map(|r| r.map_err(to_local_index_err).and_then(|raw| {
                serde_json::from_slice(&raw).map_err(to_json_err)
            }))
            .collect()
    }

    /// Atomically moves a mapping from `old_path` to `new_path`, keeping
    /// both tables consistent even if the process is killed mid-rename.
    pub fn rename_mapping(
        &self,
        old_path: &Path,
        new_path: &Path,
        note_id: &str,
    ) -> SyncResult<()> {
        let mut mapping = self
            .get_mapping_by_path(old_path)?
            .ok_or_else(|| SyncError::LocalIndex(format!("no mapping for {old_path:?}")))?;
        mapping.path = new_path.to_path_buf();

        let old_key = Self::path_key(old_path);
        let new_key = Self::path_key(new_path);
        let bytes = serde_json::to_vec(&mapping).map_err(to_json_err)?;
        let version_row = self.note_versions.get(&old_key).map_err(to_local_index_err)?;

        (&self.path_mappings, &self.path_mappings_by_note, &self.note_versions)
            .transaction(|(mappings, by_note, versions)| {
                mappings.remove(old_key.as_slice())?;
                mappings.insert(new_key.as_slice(), bytes.as_slice())?;
                by_note.insert(note_id.as_bytes(), new_key.as_slice())?;
                versions.remove(old_key.as_slice())?;
                if let Some(row) = &version_row {
                    versions.insert(new_key.as_slice(), row.as_ref())?;
                }
                Ok::<_, sled::transaction::ConflictableTransactionError<std::convert::Infallible>>(())
            })
            .map_err(|e| SyncError::LocalIndex(e.to_string()))?;
        Ok(())
    }

    // --- note version tracking ----------------------------------------------

    pub fn put_note_version(&self, path: &Path, row: &NoteVersionRow) -> SyncResult<()> {
        let bytes = serde_json::to_vec(row).map_err(to_json_err)?;
        self.note_versions
            .insert(Self::path_key(path), bytes)
            .map_err(to_local_index_err)?;
        Ok(())
    }

    pub fn get_note_version(&self, path: &Path) -> SyncResult<Option<NoteVersionRow>> {
        match self.note_versions.get(Self::path_key(path)).map_err(to_local_index_err)? {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_slice(&raw).map_err(to_json_err)?)),
        }
    }

    // --- bulk maintenance ----------------------------------------------------

    /// Wipes every table except the schema version marker. Used on logout.
    pub fn clear(&self) -> SyncResult<()> {
        self.notes.clear().map_err(to_local_index_err)?;
        self.path_mappings.clear().map_err(to_local_index_err)?;
        self.path_mappings_by_note.clear().map_err(to_local_index_err)?;
        self.note_versions.clear().map_err(to_local_index_err)?;
        Ok(())
    }

    /// Wipes only the path-mapping tables, e.g. when re-linking a workspace
    /// to a different local directory.
    pub fn clear_mappings(&self) -> SyncResult<()> {
        self.path_mappings.clear().map_err(to_local_index_err)?;
        self.path_mappings_by_note.clear().map_err(to_local_index_err)?;
        self.note_versions.clear().map_err(to_local_index_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{EncryptionAlgo, NoteKind};

    fn index() -> LocalIndex {
        let dir = tempfile::tempdir().unwrap();
        LocalIndex::open(&dir.path().join("db")).unwrap()
    }

    fn note(id: &str, version: u64) -> Note {
        Note {
            id: id.into(),
            workspace_id: "w1".into(),
            parent_id: None,
            kind: NoteKind::File,
            encrypted_title: "t".into(),
            encrypted_content: "c".into(),
            nonce: None,
            encryption_algo: EncryptionAlgo::Aes256GcmEmbedded,
            created_at: "now".into(),
            updated_at: "now".into(),
            version,
            content_hash: "h".into(),
            is_deleted: false,
            last_edit_device: None,
        }
    }

    fn mapping(path: &str, note_id: &str, version: u64) -> LocalMapping {
        LocalMapping {
            path: path.into(),
            note_id: note_id.into(),
            version,
            content_hash_last_synced: "h".into(),
            updated_at: "now".into(),
        }
    }

    #[test]
    fn meta_scalar_round_trips() {
        let idx = index();
        assert_eq!(idx.get_meta("last_sync_time").unwrap(), None);
        idx.put_meta("last_sync_time", "2026-08-01T00:00:00Z").unwrap();
        assert_eq!(idx.get_meta("last_sync_time").unwrap().as_deref(), Some("2026-08-01T00:00:00Z"));
    }

    #[test]
    fn note_round_trip() {
        let idx = index();
        idx.put_note(&note("n1", 1)).unwrap();
        let found = idx.get_note("n1").unwrap().unwrap();
        assert_eq!(found.version, 1);
        idx.delete_note("n1").unwrap();
        assert!(idx.get_note("n1").unwrap().is_none());
    }

    #[test]
    fn mapping_lookup_both_directions() {
        let idx = index();
        idx.put_mapping(&mapping("notes/a.md", "n1", 1)).unwrap();

        let by_path = idx.get_mapping_by_path(Path::new("notes/a.md")).unwrap().unwrap();
        assert_eq!(by_path.note_id, "n1");

        let by_note = idx.get_mapping_by_note_id("n1").unwrap().unwrap();
        assert_eq!(by_note.path, std::path::PathBuf::from("notes/a.md"));
    }

    #[test]
    fn rename_mapping_is_atomic_and_updates_both_indices() {
        let idx = index();
        idx.put_mapping(&mapping("notes/a.md", "n1", 1)).unwrap();
        idx.put_note_version(
            Path::new("notes/a.md"),
            &NoteVersionRow { version: 1, note_id: "n1".into(), content_hash: "h1".into(), updated_at: "t1".into() },
        )
        .unwrap();
        idx.rename_mapping(Path::new("notes/a.md"), Path::new("notes/b.md"), "n1").unwrap();

        assert!(idx.get_mapping_by_path(Path::new("notes/a.md")).unwrap().is_none());
        let moved = idx.get_mapping_by_path(Path::new("notes/b.md")).unwrap().unwrap();
        assert_eq!(moved.note_id, "n1");
        let by_note = idx.get_mapping_by_note_id("n1").unwrap().unwrap();
        assert_eq!(by_note.path, std::path::PathBuf::from("notes/b.md"));

        assert!(idx.get_note_version(Path::new("notes/a.md")).unwrap().is_none());
        let moved_version = idx.get_note_version(Path::new("notes/b.md")).unwrap().unwrap();
        assert_eq!(moved_version.note_id, "n1");
    }

    #[test]
    fn note_version_round_trips_by_path() {
        let idx = index();
        idx.put_note_version(
            Path::new("notes/a.md"),
            &NoteVersionRow { version: 1, note_id: "n1".into(), content_hash: "h1".into(), updated_at: "t1".into() },
        )
        .unwrap();
        idx.put_note_version(
            Path::new("notes/b.md"),
            &NoteVersionRow { version: 1, note_id: "n2".into(), content_hash: "other".into(), updated_at: "t1".into() },
        )
        .unwrap();

        let row = idx.get_note_version(Path::new("notes/a.md")).unwrap().unwrap();
        assert_eq!(row.note_id, "n1");
        assert_eq!(idx.get_note_version(Path::new("notes/b.md")).unwrap().unwrap().note_id, "n2");
    }

    #[test]
    fn deleting_a_mapping_drops_its_note_version_row() {
        let idx = index();
        idx.put_mapping(&mapping("notes/a.md", "n1", 1)).unwrap();
        idx.put_note_version(
            Path::new("notes/a.md"),
            &NoteVersionRow { version: 1, note_id: "n1".into(), content_hash: "h1".into(), updated_at: "t1".into() },
        )
        .unwrap();

        idx.delete_mapping_by_path(Path::new("notes/a.md")).unwrap();

        assert!(idx.get_note_version(Path::new("notes/a.md")).unwrap().is_none());
    }

    #[test]
    fn clear_mappings_leaves_notes_intact() {
        let idx = index();
        idx.put_note(&note("n1", 1)).unwrap();
        idx.put_mapping(&mapping("notes/a.md", "n1", 1)).unwrap();

        idx.clear_mappings().unwrap();

        assert!(idx.get_note("n1").unwrap().is_some());
        assert!(idx.get_mapping_by_path(Path::new("notes/a.md")).unwrap().is_none());
    }

    #[test]
    fn reopening_with_same_schema_version_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db");
        {
            let idx = LocalIndex::open(&db_path).unwrap();
            idx.put_note(&note("n1", 1)).unwrap();
        }
        let idx = LocalIndex::open(&db_path).unwrap();
        assert!(idx.get_note("n1").unwrap().is_some());
    }

    // Exercises the `Transactional` trait import above via a direct
    // multi-tree transaction, independent of `rename_mapping`.
    #[test]
    fn direct_transaction_across_trees_commits() {
        let idx = index();
        (&idx.path_mappings, &idx.path_mappings_by_note)
            .transaction(|(mappings, by_note)| {
                mappings.insert(b"k".as_slice(), b"v".as_slice())?;
                by_note.insert(b"n".as_slice(), b"k".as_slice())?;
                Ok::<_, sled::transaction::ConflictableTransactionError<std::convert::Infallible>>(())
            })
            .unwrap();
        assert!(idx.path_mappings.get(b"k").unwrap().is_some());
    }
}
