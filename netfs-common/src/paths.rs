//! Safe path resolution under a storage root
//!
//! Every path netfs receives is relative to a single storage root per
//! connection. Unlike a general-purpose file area, a netfs root never links
//! out to trusted external storage, so containment is enforced strictly:
//! the canonicalized, symlink-resolved path must still be a descendant of
//! the canonicalized root.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::validators::validate_file_path;

/// Error resolving a client-supplied path against a storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Path contains `..` or is otherwise structurally invalid.
    Invalid,
    /// Path canonicalizes to somewhere outside the storage root.
    Escapes,
    /// Path does not exist on the filesystem.
    NotFound,
    /// Canonicalization failed for a reason other than not-found.
    Io(String),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid path"),
            Self::Escapes => write!(f, "path escapes storage root"),
            Self::NotFound => write!(f, "path not found"),
            Self::Io(e) => write!(f, "path resolution failed: {e}"),
        }
    }
}

impl std::error::Error for PathError {}

impl From<PathError> for io::Error {
    fn from(e: PathError) -> Self {
        match e {
            PathError::Invalid | PathError::Escapes => {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            }
            PathError::NotFound => io::Error::new(io::ErrorKind::NotFound, e.to_string()),
            PathError::Io(_) => io::Error::other(e.to_string()),
        }
    }
}

/// Reject `..` components before the path is ever joined with the root.
///
/// Must run on the raw client string, not a joined `PathBuf`: on Windows,
/// joining normalizes components and can quietly swallow a `..` segment.
fn reject_traversal(client_path: &str) -> Result<(), PathError> {
    for segment in client_path.split(['/', '\\']) {
        if segment == ".." {
            return Err(PathError::Invalid);
        }
    }
    Ok(())
}

/// Join a client-relative path onto a storage root, without touching disk.
///
/// Leading slashes are stripped so `"/foo/bar"` and `"foo/bar"` land at the
/// same place under `root`.
#[must_use]
pub fn join_relative(root: &Path, client_path: &str) -> PathBuf {
    let normalized = client_path.trim_start_matches(['/', '\\']);
    root.join(normalized)
}

/// Resolve an existing path under `root`, verifying it does not escape via
/// symlinks or `..` components.
///
/// `root` must already be canonical (obtained from [`std::fs::canonicalize`]);
/// the function can't verify that itself, only that it is absolute.
///
/// # Errors
///
/// - [`PathError::Invalid`] if `client_path` contains `..` or `root` is not absolute
/// - [`PathError::NotFound`] if the resolved path does not exist
/// - [`PathError::Escapes`] if the canonical path is not a descendant of `root`
/// - [`PathError::Io`] if canonicalization fails for another reason
pub fn resolve_existing(root: &Path, client_path: &str) -> Result<PathBuf, PathError> {
    if !root.is_absolute() {
        return Err(PathError::Invalid);
    }
    validate_file_path(client_path).map_err(|_| PathError::Invalid)?;
    reject_traversal(client_path)?;

    let candidate = join_relative(root, client_path);
    reject_component_traversal(&candidate)?;

    let canonical = candidate.canonicalize().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            PathError::NotFound
        } else {
            PathError::Io(e.to_string())
        }
    })?;

    if !canonical.starts_with(root) {
        return Err(PathError::Escapes);
    }

    Ok(canonical)
}

/// Resolve a path under `root` for a file that does not exist yet.
///
/// Validates the parent directory exists and is contained in `root`; the
/// final component is returned un-canonicalized since it has nothing to
/// canonicalize yet.
///
/// # Errors
///
/// Same conditions as [`resolve_existing`], applied to the parent directory,
/// plus [`PathError::Invalid`] if `client_path` has no file name component.
pub fn resolve_new(root: &Path, client_path: &str) -> Result<PathBuf, PathError> {
    if !root.is_absolute() {
        return Err(PathError::Invalid);
    }
    validate_file_path(client_path).map_err(|_| PathError::Invalid)?;
    reject_traversal(client_path)?;

    let candidate = join_relative(root, client_path);
    reject_component_traversal(&candidate)?;

    let file_name = candidate.file_name().ok_or(PathError::Invalid)?.to_owned();
    let parent = candidate.parent().ok_or(PathError::Invalid)?;

    let canonical_parent = if parent == root {
        root.to_path_buf()
    } else {
        parent.canonicalize().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                PathError::NotFound
            } else {
                PathError::Io(e.to_string())
            }
        })?
    };

    if !canonical_parent.starts_with(root) {
        return Err(PathError::Escapes);
    }

    Ok(canonical_parent.join(file_name))
}

fn reject_component_traversal(path: &Path) -> Result<(), PathError> {
    for component in path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(PathError::Invalid);
        }
    }
    Ok(())
}
