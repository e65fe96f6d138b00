//! Local cache-directory bookkeeping for downloads
//!
//! Two cooperating client processes sharing one cache directory must not
//! both download the same file. This locks a `<path>.tmp` sentinel via
//! `fs4` (the actively maintained successor to `fs2`) for a cross-platform
//! advisory-lock primitive.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use netfs_common::paths::{self, PathError};

/// A local directory that mirrors a subset of a storage server's namespace,
/// used to deduplicate downloads and stage uploads before they're sent.
pub struct Cache {
    root: PathBuf,
}

/// An open, exclusively-locked `<path>.tmp` sentinel held for the duration
/// of one `get()` download. Dropping this releases the lock even if the
/// caller returns early on an error, so the lock is always released
/// regardless of which exit path a download takes.
pub struct DownloadLock {
    file: File,
    tmp_path: PathBuf,
}

impl Drop for DownloadLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl Cache {
    /// Open a cache rooted at `root`, canonicalizing it so later
    /// containment checks have a stable absolute path to compare against.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` cannot be created or canonicalized.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    /// The cache's canonical root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `client_path` to an absolute path under this cache,
    /// rejecting anything that would escape the root.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::Escapes`]/[`PathError::Invalid`] if the path
    /// escapes the cache, or other [`PathError`] variants per
    /// [`paths::resolve_new`].
    pub fn resolve(&self, client_path: &str) -> Result<PathBuf, PathError> {
        paths::resolve_new(&self.root, client_path)
    }

    /// Whether `client_path` already exists in the cache.
    #[must_use]
    pub fn contains(&self, client_path: &str) -> bool {
        self.resolve(client_path)
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    /// Ensure the parent directory of `client_path` exists under the cache,
    /// returning the resolved target path.
    ///
    /// # Errors
    ///
    /// Returns a [`PathError`] if the path escapes the cache or its parent
    /// can't be created.
    pub fn prepare_target(&self, client_path: &str) -> Result<PathBuf, PathError> {
        let target = self.resolve(client_path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| PathError::Io(e.to_string()))?;
        }
        Ok(target)
    }

    /// Begin a `get()`: create (or open) `<path>.tmp`, take an exclusive
    /// advisory lock on it, and return the lock alongside whether the
    /// target already existed once the lock was acquired.
    ///
    /// The re-check happens *after* the lock is held, so a second caller
    /// that raced the first into `open()` still observes the first
    /// caller's completed download rather than starting a redundant one.
    ///
    /// # Errors
    ///
    /// Returns an error if the `.tmp` file can't be opened or locked.
    pub fn begin_download(&self, target: &Path) -> io::Result<(DownloadLock, bool)> {
        let tmp_path = tmp_sibling(target);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&tmp_path)?;
        FileExt::lock_exclusive(&file)?;
        let already_present = target.exists();
        Ok((DownloadLock { file, tmp_path }, already_present))
    }
}

impl DownloadLock {
    /// The locked `.tmp` file, to write the downloaded content into.
    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }

    /// The `.tmp` sentinel's path.
    #[must_use]
    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Finish the download: rename the `.tmp` file to `target` and set its
    /// mtime from the server-reported value. Consumes the lock, releasing
    /// it after the rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename or mtime update fails.
    pub fn finish(self, target: &Path, mtime_secs: i64) -> io::Result<()> {
        use filetime::{FileTime, set_file_mtime};

        fs::rename(&self.tmp_path, target)?;
        set_file_mtime(target, FileTime::from_unix_time(mtime_secs, 0))?;
        Ok(())
    }
}

/// The `.tmp` sibling path for a given target, mirroring the server's own
/// staged-upload naming (`netfs_server::transaction::FileUpload::staged_temp_path`).
#[must_use]
pub fn tmp_sibling(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn resolve_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        assert!(cache.resolve("../escape.bin").is_err());
    }

    #[test]
    fn contains_reflects_filesystem_state() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        assert!(!cache.contains("a/b.txt"));
        let target = cache.prepare_target("a/b.txt").unwrap();
        fs::write(&target, b"hi").unwrap();
        assert!(cache.contains("a/b.txt"));
    }

    #[test]
    fn begin_download_reports_existing_target() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        let target = cache.prepare_target("f.bin").unwrap();
        fs::write(&target, b"already here").unwrap();

        let (_lock, already_present) = cache.begin_download(&target).unwrap();
        assert!(already_present);
    }

    #[test]
    fn finish_renames_and_sets_mtime() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        let target = cache.prepare_target("f.bin").unwrap();

        let (mut lock, existed) = cache.begin_download(&target).unwrap();
        assert!(!existed);
        use std::io::Write;
        lock.file().write_all(b"downloaded").unwrap();
        lock.finish(&target, 1_700_000_000).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"downloaded");
        assert!(!tmp_sibling(&target).exists());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        let target = cache.prepare_target("f.bin").unwrap();

        {
            let (_lock, _) = cache.begin_download(&target).unwrap();
        }
        // A second begin_download should succeed immediately now that the
        // first lock has been dropped.
        let (_lock2, _) = cache.begin_download(&target).unwrap();
    }
}
