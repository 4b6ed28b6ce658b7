//! The host filesystem as a narrow capability (§9 Design Note "Filesystem
//! capability"): five operations, so the reconciliation engine can be
//! exercised against an in-memory fake in tests instead of real disk.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The five filesystem operations the sync engine needs. Implementations
/// live outside this crate's scope for a *real* backend (the desktop app's
/// existing filesystem driver is out of scope per §1); [`RealFilesystem`]
/// here is a thin std::fs-backed implementation used by integration tests
/// and as the production default when no richer driver is injected.
pub trait Filesystem: Send + Sync {
    /// Read the full contents of a file.
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
    /// Write (overwrite) the full contents of a file, creating parent directories.
    fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()>;
    /// Whether a path exists.
    fn exists(&self, path: &Path) -> bool;
    /// Move a file to the trash (best-effort recoverable delete) rather than
    /// unlinking it outright.
    fn delete_to_trash(&self, path: &Path) -> std::io::Result<()>;
    /// Recursively list every file path under `root`.
    fn read_dir_recursive(&self, root: &Path) -> std::io::Result<Vec<PathBuf>>;
}

/// `std::fs`-backed filesystem. "Trash" is a `.trash` directory under the
/// workspace root, mirroring common desktop-app conventions.
pub struct RealFilesystem;

impl Filesystem for RealFilesystem {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn delete_to_trash(&self, path: &Path) -> std::io::Result<()> {
        let trash_dir = path.parent().unwrap_or_else(|| Path::new(".")).join(".trash");
        std::fs::create_dir_all(&trash_dir)?;
        let file_name = path.file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
        })?;
        let mut dest = trash_dir.join(file_name);
        let mut suffix = 0u32;
        while dest.exists() {
            suffix += 1;
            dest = trash_dir.join(format!("{}.{}", file_name.to_string_lossy(), suffix));
        }
        std::fs::rename(path, dest)
    }

    fn read_dir_recursive(&self, root: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        walk(root, &mut out)?;
        Ok(out)
    }
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.file_name().and_then(|n| n.to_str()) == Some(".trash") {
            continue;
        }
        if path.is_dir() {
            walk(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// In-memory [`Filesystem`] fake for unit and integration tests.
#[derive(Default)]
pub struct FakeFilesystem {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    trashed: Mutex<BTreeSet<PathBuf>>,
}

impl FakeFilesystem {
    /// Create an empty fake filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file without going through `write` (useful for test setup).
    pub fn seed(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.files.lock().expect("fake fs poisoned").insert(path.into(), contents.into());
    }

    /// Paths moved to trash since creation, in call order.
    #[must_use]
    pub fn trashed_paths(&self) -> Vec<PathBuf> {
        self.trashed.lock().expect("fake fs poisoned").iter().cloned().collect()
    }
}

impl Filesystem for FakeFilesystem {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        self.files
            .lock()
            .expect("fake fs poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "not found"))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        self.files.lock().expect("fake fs poisoned").insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("fake fs poisoned").contains_key(path)
    }

    fn delete_to_trash(&self, path: &Path) -> std::io::Result<()> {
        let mut files = self.files.lock().expect("fake fs poisoned");
        if files.remove(path).is_none() {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "not found"));
        }
        self.trashed.lock().expect("fake fs poisoned").insert(path.to_path_buf());
        Ok(())
    }

    fn read_dir_recursive(&self, root: &Path) -> std::io::Result<Vec<PathBuf>> {
        Ok(self
            .files
            .lock()
            .expect("fake fs poisoned")
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect())
    }
}
