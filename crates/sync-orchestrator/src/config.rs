//! Persisted client configuration (§6 "Persisted state").
//!
//! Opaque to the server: it only ever lives on disk next to the local
//! index and the token store, as a single TOML document.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sync_core::{SyncError, SyncResult, WorkspaceLink};

const APP_DIR: &str = "notesync";
const CONFIG_FILE: &str = "sync.toml";

/// The `sync` configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub server_url: String,
    pub local_db_name: String,
    pub current_workspace_id: Option<String>,
    pub last_sync_time: Option<String>,
    pub ignore_patterns: Vec<String>,
    pub ignored_paths: Vec<String>,
    pub onboarding_completed: bool,
    // Array-of-tables must be the last field: TOML requires scalar keys in
    // a table to precede any table/array-of-tables entries.
    pub workspace_links: Vec<WorkspaceLink>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: String::new(),
            local_db_name: "notesync.db".into(),
            current_workspace_id: None,
            last_sync_time: None,
            ignore_patterns: Vec::new(),
            ignored_paths: Vec::new(),
            onboarding_completed: false,
            workspace_links: Vec::new(),
        }
    }
}

/// `XDG_CONFIG_HOME/notesync` (`~/.config/notesync` on Linux).
pub fn default_config_dir() -> SyncResult<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .ok_or_else(|| SyncError::LocalIndex("could not determine platform config directory".into()))
}

fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE)
}

/// Loads the config, returning the default (disabled, unlinked) config if
/// none has been written yet.
pub fn load(config_dir: &Path) -> SyncResult<SyncConfig> {
    let path = config_file_path(config_dir);
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let contents = fs::read_to_string(&path)?;
    toml::from_str(&contents)
        .map_err(|e| SyncError::LocalIndex(format!("failed to parse {}: {e}", path.display())))
}

/// Writes the config atomically (temp file plus rename).
pub fn save(config_dir: &Path, config: &SyncConfig) -> SyncResult<()> {
    fs::create_dir_all(config_dir)?;
    let path = config_file_path(config_dir);
    let contents = toml::to_string_pretty(config)
        .map_err(|e| SyncError::LocalIndex(format!("failed to serialize config: {e}")))?;

    let temp_path = path.with_extension("toml.tmp");
    fs::write(&temp_path, &contents)?;
    fs::rename(&temp_path, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load(dir.path()).unwrap();
        assert_eq!(cfg, SyncConfig::default());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SyncConfig::default();
        cfg.enabled = true;
        cfg.server_url = "https://sync.example.com".into();
        cfg.current_workspace_id = Some("w1".into());
        cfg.workspace_links.push(WorkspaceLink {
            local_path: "/home/user/notes".into(),
            remote_workspace_id: "w1".into(),
            linked_at: "2026-01-01T00:00:00Z".into(),
        });

        save(dir.path(), &cfg).unwrap();
        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn onboarding_defaults_to_incomplete() {
        assert!(!SyncConfig::default().onboarding_completed);
    }
}
