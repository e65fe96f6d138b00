//! Resolving client-supplied paths against this server's storage root
//!
//! Thin wrappers around [`netfs_common::paths`] that add the one thing the
//! shared module can't: creating missing parent directories for a path that
//! is about to be uploaded to.

use std::path::{Path, PathBuf};

use netfs_common::paths::{self, PathError};

/// Resolve the target of an incoming upload.
///
/// Ensures the parent directory exists (creating it if necessary) and then
/// validates containment the same way [`paths::resolve_new`] does for any
/// other not-yet-existing path. The `mkdir -p` happens before the
/// containment check is re-verified against the canonicalized parent, so a
/// symlink planted somewhere under the root can still cause the check to
/// fail — it just means the directory creation was wasted, not that it let
/// anything through.
pub async fn resolve_upload_target(root: &Path, client_path: &str) -> Result<PathBuf, PathError> {
    let raw = paths::join_relative(root, client_path);
    if let Some(parent) = raw.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PathError::Io(e.to_string()))?;
    }
    paths::resolve_new(root, client_path)
}

/// Resolve the target of an incoming download.
///
/// Downloads may target a path that exists only as a `.tmp` file elsewhere
/// in flight, so this can't require the final component to exist — it uses
/// the same parent-containment check as upload resolution.
pub fn resolve_download_target(root: &Path, client_path: &str) -> Result<PathBuf, PathError> {
    paths::resolve_new(root, client_path)
}

/// Classify a [`PathError`] the way the protocol requires: an escape or a
/// structurally invalid path ends the connection (spec Invariant 6), while
/// anything else becomes an ordinary I/O error scoped to one frame.
pub fn is_fatal(err: &PathError) -> bool {
    matches!(err, PathError::Invalid | PathError::Escapes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn upload_target_creates_missing_parent() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let resolved = resolve_upload_target(&root, "a/b/c.bin").await.unwrap();
        assert_eq!(resolved, root.join("a/b/c.bin"));
        assert!(root.join("a/b").is_dir());
    }

    #[tokio::test]
    async fn upload_target_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let err = resolve_upload_target(&root, "../escape.bin").await.unwrap_err();
        assert_eq!(err, PathError::Invalid);
    }

    #[test]
    fn download_target_not_found_for_missing_parent() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let err = resolve_download_target(&root, "missing/file.bin").unwrap_err();
        assert_eq!(err, PathError::NotFound);
    }
}
