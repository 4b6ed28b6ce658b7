//! On-disk persistence for [`crate::TokenSet`] and the wrapped master key:
//! atomic write via a temp file plus rename, restricted to the owner on
//! Unix. Both live in the same key/value area (§6 "Persisted state")
//! because neither is meaningful to anyone but this device.

use std::fs;
use std::path::{Path, PathBuf};

use crypto_core::WrappedKeyMaterial;
use sync_core::{SyncError, SyncResult};

use crate::TokenSet;

const APP_DIR: &str = "notesync";
const TOKENS_FILE: &str = "tokens.json";
const KEY_MATERIAL_FILE: &str = "master-key.json";

/// `XDG_DATA_HOME/notesync` (`~/.local/share/notesync` on Linux).
pub fn default_data_dir() -> SyncResult<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR))
        .ok_or_else(|| SyncError::LocalIndex("could not determine platform data directory".into()))
}

fn tokens_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(TOKENS_FILE)
}

fn key_material_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(KEY_MATERIAL_FILE)
}

/// Writes `contents` to `path` via a temp file plus rename, owner-only on Unix.
fn write_atomic(path: &Path, contents: &str) -> SyncResult<()> {
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))?;
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

pub fn load(data_dir: &Path) -> SyncResult<Option<TokenSet>> {
    let path = tokens_file_path(data_dir);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)?;
    let tokens = serde_json::from_str(&contents)
        .map_err(|e| SyncError::LocalIndex(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(tokens))
}

pub fn save(data_dir: &Path, tokens: &TokenSet) -> SyncResult<()> {
    fs::create_dir_all(data_dir)?;
    let path = tokens_file_path(data_dir);
    let contents = serde_json::to_string_pretty(tokens)
        .map_err(|e| SyncError::LocalIndex(format!("failed to serialize tokens: {e}")))?;
    write_atomic(&path, &contents)
}

pub fn delete(data_dir: &Path) -> SyncResult<bool> {
    let path = tokens_file_path(data_dir);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path)?;
    Ok(true)
}

pub fn load_key_material(data_dir: &Path) -> SyncResult<Option<WrappedKeyMaterial>> {
    let path = key_material_file_path(data_dir);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)?;
    let material = serde_json::from_str(&contents)
        .map_err(|e| SyncError::LocalIndex(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(material))
}

pub fn save_key_material(data_dir: &Path, material: &WrappedKeyMaterial) -> SyncResult<()> {
    fs::create_dir_all(data_dir)?;
    let path = key_material_file_path(data_dir);
    let contents = serde_json::to_string_pretty(material)
        .map_err(|e| SyncError::LocalIndex(format!("failed to serialize key material: {e}")))?;
    write_atomic(&path, &contents)
}

pub fn delete_key_material(data_dir: &Path) -> SyncResult<bool> {
    let path = key_material_file_path(data_dir);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TokenSet {
        TokenSet {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            user_email: "user@example.com".into(),
            device_id: "device-1".into(),
            obtained_at_ms: 1_000,
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), &sample()).unwrap();
        let loaded = load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.access_token, "access");
    }

    #[test]
    fn key_material_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let material = WrappedKeyMaterial {
            salt: "c2FsdA==".into(),
            kdf_iterations: 100_000,
            wrapped_key: "d3JhcHBlZA==".into(),
        };
        assert!(load_key_material(dir.path()).unwrap().is_none());
        save_key_material(dir.path(), &material).unwrap();
        let loaded = load_key_material(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.wrapped_key, material.wrapped_key);
        assert!(delete_key_material(dir.path()).unwrap());
        assert!(load_key_material(dir.path()).unwrap().is_none());
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn delete_removes_file_and_reports_whether_one_existed() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!delete(dir.path()).unwrap());
        save(dir.path(), &sample()).unwrap();
        assert!(delete(dir.path()).unwrap());
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), &sample()).unwrap();
        let mode = fs::metadata(tokens_file_path(dir.path())).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
