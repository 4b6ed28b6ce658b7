//! Decides whether a local file change should ever reach the sync engine
//! (§4.4). Applied at every boundary where a path enters the pipeline: the
//! filesystem watcher, the initial directory scan, and the upload queue.

#![deny(unsafe_code)]

use std::collections::HashSet;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid ignore glob {pattern:?}: {source}")]
    InvalidGlob { pattern: String, #[source] source: globset::Error },
}

/// Glob patterns ignored in every workspace unless explicitly overridden.
/// Modelled on common editor/OS scratch files and the client's own
/// bookkeeping directories.
pub const DEFAULT_GLOBS: &[&str] = &[
    "**/.trash/**",
    "**/.git/**",
    "**/node_modules/**",
    "**/*.tmp",
    "**/*.swp",
    "**/.DS_Store",
    "**/Thumbs.db",
];

/// Combines glob patterns and an explicit set of ignored paths.
pub struct IgnoreFilter {
    globs: GlobSet,
    explicit_paths: HashSet<String>,
}

impl IgnoreFilter {
    /// Builds a filter from [`DEFAULT_GLOBS`] plus any workspace-configured
    /// `extra_globs`.
    pub fn new(extra_globs: &[String]) -> Result<Self, Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in DEFAULT_GLOBS.iter().copied().chain(extra_globs.iter().map(String::as_str)) {
            let glob = Glob::new(pattern)
                .map_err(|source| Error::InvalidGlob { pattern: pattern.to_string(), source })?;
            builder.add(glob);
        }
        let globs = builder
            .build()
            .map_err(|source| Error::InvalidGlob { pattern: "<set>".into(), source })?;
        Ok(Self { globs, explicit_paths: HashSet::new() })
    }

    /// Marks `path` ignored regardless of glob rules, e.g. a note the user
    /// chose to exclude from sync individually.
    pub fn ignore_path(&mut self, path: &Path) {
        self.explicit_paths.insert(normalize(path));
    }

    pub fn unignore_path(&mut self, path: &Path) {
        self.explicit_paths.remove(&normalize(path));
    }

    pub fn should_ignore(&self, path: &Path) -> bool {
        self.explicit_paths.contains(&normalize(path)) || self.globs.is_match(path)
    }
}

fn normalize(path: &Path) -> String {
    path.to_string_lossy().trim_start_matches('/').replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_globs_catch_common_scratch_files() {
        let filter = IgnoreFilter::new(&[]).unwrap();
        assert!(filter.should_ignore(Path::new("notes/.git/HEAD")));
        assert!(filter.should_ignore(Path::new("notes/draft.md.tmp")));
        assert!(filter.should_ignore(Path::new("notes/.trash/old.md")));
        assert!(!filter.should_ignore(Path::new("notes/draft.md")));
    }

    #[test]
    fn explicit_path_is_ignored_regardless_of_globs() {
        let mut filter = IgnoreFilter::new(&[]).unwrap();
        assert!(!filter.should_ignore(Path::new("notes/private.md")));
        filter.ignore_path(Path::new("notes/private.md"));
        assert!(filter.should_ignore(Path::new("notes/private.md")));
        filter.unignore_path(Path::new("notes/private.md"));
        assert!(!filter.should_ignore(Path::new("notes/private.md")));
    }

    #[test]
    fn extra_globs_are_combined_with_defaults() {
        let filter = IgnoreFilter::new(&["**/*.bak".to_string()]).unwrap();
        assert!(filter.should_ignore(Path::new("notes/old.bak")));
        assert!(filter.should_ignore(Path::new("notes/.git/config")));
    }

    #[test]
    fn leading_slash_is_stripped_before_explicit_match() {
        let mut filter = IgnoreFilter::new(&[]).unwrap();
        filter.ignore_path(Path::new("/notes/private.md"));
        assert!(filter.should_ignore(Path::new("notes/private.md")));
    }
}
