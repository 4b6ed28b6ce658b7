//! Local directory scan and classification against the server manifest
//! (§4.8 step 2).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sync_core::{hashing::sha256_hex, Filesystem, LocalMapping};

/// One locally scanned Markdown file, hashed and classified.
pub enum ScannedFile {
    /// Tracked locally and the server still knows the note; feeds the
    /// batch-diff request.
    MappedKnown { path: PathBuf, note_id: String, local_hash: String, last_synced_version: u64 },
    /// No local mapping: a candidate for upload as a brand-new note.
    Unmapped { path: PathBuf, local_hash: String },
}

/// Scans every Markdown file under `root`, skipping ignored paths,
/// classifying each against `mappings_by_path` and the set of note ids the
/// server still considers live.
pub fn scan(
    fs: &dyn Filesystem,
    ignore: &ignore_filter::IgnoreFilter,
    root: &Path,
    mappings_by_path: &std::collections::HashMap<PathBuf, LocalMapping>,
    server_known_note_ids: &HashSet<String>,
) -> std::io::Result<(Vec<ScannedFile>, Vec<PathBuf>)> {
    let mut scanned = Vec::new();
    let mut orphaned_mappings = Vec::new();

    for path in fs.read_dir_recursive(root)? {
        if !is_markdown(&path) {
            continue;
        }
        if ignore.should_ignore(path.strip_prefix(root).unwrap_or(&path)) {
            continue;
        }

        let content = fs.read(&path)?;
        let local_hash = sha256_hex(&content);

        match mappings_by_path.get(&path) {
            Some(mapping) if server_known_note_ids.contains(&mapping.note_id) => {
                scanned.push(ScannedFile::MappedKnown {
                    path,
                    note_id: mapping.note_id.clone(),
                    local_hash,
                    last_synced_version: mapping.version,
                });
            }
            Some(_) => {
                // Mapped locally but the note no longer exists server-side:
                // the mapping is stale, drop it and treat the file as new.
                orphaned_mappings.push(path.clone());
                scanned.push(ScannedFile::Unmapped { path, local_hash });
            }
            None => scanned.push(ScannedFile::Unmapped { path, local_hash }),
        }
    }

    Ok((scanned, orphaned_mappings))
}

fn is_markdown(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("md")).unwrap_or(false)
}

/// Derives a filesystem path for a newly downloaded note with no existing
/// mapping, from its decrypted title. Falls back to the note id when the
/// title sanitizes to nothing usable (e.g. empty, all-punctuation).
pub fn derive_path_from_title(root: &Path, note_id: &str, title: &str) -> PathBuf {
    let sanitized: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' { c } else { '-' })
        .collect::<String>()
        .trim()
        .to_string();

    let stem = if sanitized.is_empty() { note_id.to_string() } else { sanitized };
    root.join(format!("{stem}.md"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use sync_core::FakeFilesystem;

    #[test]
    fn unmapped_markdown_file_is_an_upload_candidate() {
        let fs = FakeFilesystem::new();
        fs.seed("/w/new.md", "hello");
        let ignore = ignore_filter::IgnoreFilter::new(&[]).unwrap();

        let (scanned, orphans) =
            scan(&fs, &ignore, Path::new("/w"), &HashMap::new(), &HashSet::new()).unwrap();

        assert!(orphans.is_empty());
        assert_eq!(scanned.len(), 1);
        assert!(matches!(scanned[0], ScannedFile::Unmapped { .. }));
    }

    #[test]
    fn non_markdown_files_are_skipped() {
        let fs = FakeFilesystem::new();
        fs.seed("/w/image.png", "binary");
        let ignore = ignore_filter::IgnoreFilter::new(&[]).unwrap();

        let (scanned, _) =
            scan(&fs, &ignore, Path::new("/w"), &HashMap::new(), &HashSet::new()).unwrap();
        assert!(scanned.is_empty());
    }

    #[test]
    fn mapping_to_an_unknown_server_note_is_orphaned() {
        let fs = FakeFilesystem::new();
        fs.seed("/w/a.md", "hi");
        let ignore = ignore_filter::IgnoreFilter::new(&[]).unwrap();
        let mut mappings = HashMap::new();
        mappings.insert(
            PathBuf::from("/w/a.md"),
            LocalMapping {
                path: "/w/a.md".into(),
                note_id: "gone".into(),
                version: 1,
                content_hash_last_synced: "h".into(),
                updated_at: "t".into(),
            },
        );

        let (scanned, orphans) =
            scan(&fs, &ignore, Path::new("/w"), &mappings, &HashSet::new()).unwrap();
        assert_eq!(orphans, vec![PathBuf::from("/w/a.md")]);
        assert!(matches!(scanned[0], ScannedFile::Unmapped { .. }));
    }

    #[test]
    fn title_is_sanitized_into_a_filename() {
        let path = derive_path_from_title(Path::new("/w"), "n1", "Hello / World?");
        assert_eq!(path, PathBuf::from("/w/Hello - World-.md"));
    }

    #[test]
    fn empty_title_falls_back_to_note_id() {
        let path = derive_path_from_title(Path::new("/w"), "n1", "!!!");
        assert_eq!(path, PathBuf::from("/w/n1.md"));
    }
}
