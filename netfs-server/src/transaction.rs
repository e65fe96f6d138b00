//! Staged uploads and the per-connection transaction they belong to
//!
//! A path becomes visible to downloads only when its upload is committed
//! (spec Invariant 1). Until then it exists only as a `<path>.tmp` sibling,
//! tracked here as a [`FileUpload`] inside the connection's [`Transaction`].

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use netfs_common::hash::{Digest512, RunningHash};

/// Everything that can go wrong staging or finishing an upload. Contained to
/// one frame: the caller reports `RESP_ERROR` and the connection stays open.
#[derive(Debug)]
pub enum UploadError {
    /// The `.tmp` file could not be created exclusively (another connection
    /// is mid-upload to the same path, or the parent directory is missing).
    OpeningFile(io::Error),
    /// A write to the `.tmp` file failed partway through the payload.
    WritingFile(io::Error),
    /// Closing (flushing) the `.tmp` file failed.
    ClosingFile(io::Error),
    /// The trailing digest didn't match what was actually written.
    HashMismatch,
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpeningFile(e) => write!(f, "opening temp file: {e}"),
            Self::WritingFile(e) => write!(f, "writing temp file: {e}"),
            Self::ClosingFile(e) => write!(f, "closing temp file: {e}"),
            Self::HashMismatch => write!(f, "uploaded content does not match its digest"),
        }
    }
}

impl std::error::Error for UploadError {}

/// A staged upload, from `begin()` through either `commit()` or `abort()`.
///
/// `staged_temp` is the op's own `.tmp` file: present until the op is
/// committed (moved into place) or aborted (unlinked). `previous_aside` is
/// the pre-commit copy of a path the commit displaced, kept only so a later
/// abort in the same transaction can restore it — it is `None` unless
/// `commit()` actually overwrote an existing file.
pub struct FileUpload {
    target: PathBuf,
    staged_temp: Option<PathBuf>,
    previous_aside: Option<PathBuf>,
    file: Option<File>,
    hash: RunningHash,
    committed: bool,
    error: Option<UploadError>,
}

impl FileUpload {
    /// The `.tmp` sibling path for a given target.
    #[must_use]
    pub fn staged_temp_path(target: &Path) -> PathBuf {
        let mut name = target.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Start staging an upload to `target`, exclusively creating its `.tmp`
    /// file. Failure is recorded on the op rather than returned, so the
    /// caller can still drain the rest of the upload frame to keep the
    /// stream in sync (spec §4.2 step 3).
    pub async fn begin(target: PathBuf) -> Self {
        let staged_temp = Self::staged_temp_path(&target);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staged_temp)
            .await
        {
            Ok(file) => Self {
                target,
                staged_temp: Some(staged_temp),
                previous_aside: None,
                file: Some(file),
                hash: RunningHash::new(),
                committed: false,
                error: None,
            },
            Err(e) => Self {
                target,
                staged_temp: Some(staged_temp),
                previous_aside: None,
                file: None,
                hash: RunningHash::new(),
                committed: false,
                error: Some(UploadError::OpeningFile(e)),
            },
        }
    }

    /// The target path this op will expose on commit.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// The op's own `.tmp` file, used to detect a same-path collision
    /// within one transaction (spec Invariant 2).
    #[must_use]
    pub fn staged_temp(&self) -> Option<&Path> {
        self.staged_temp.as_deref()
    }

    /// Write one chunk of the upload payload. A no-op once an error has
    /// been recorded, but the caller is still expected to keep calling this
    /// for every chunk so the stream stays synchronized.
    pub async fn write_chunk(&mut self, chunk: &[u8]) {
        if self.error.is_some() {
            return;
        }
        let Some(file) = self.file.as_mut() else {
            return;
        };
        match file.write_all(chunk).await {
            Ok(()) => self.hash.update(chunk),
            Err(e) => self.error = Some(UploadError::WritingFile(e)),
        }
    }

    /// Close the temp file and verify the trailing digest. On any recorded
    /// error (including a fresh mismatch here), unlinks the temp file and
    /// returns the error; the op must not be kept in the transaction.
    pub async fn finish(mut self, expected: Digest512) -> Result<Self, UploadError> {
        if self.error.is_none() {
            if let Some(mut file) = self.file.take() {
                if let Err(e) = file.flush().await {
                    self.error = Some(UploadError::ClosingFile(e));
                }
            }
        }
        if self.error.is_none() {
            let digest = std::mem::take(&mut self.hash).finalize();
            if digest != expected {
                self.error = Some(UploadError::HashMismatch);
            }
        }
        match self.error.take() {
            Some(err) => {
                self.abort().await;
                Err(err)
            }
            None => Ok(self),
        }
    }

    /// Probe that the target is writable. Used by `prepare`, which only
    /// votes — it never aborts on failure itself. Mirrors `open(path, 'ab')`:
    /// for a brand-new upload `target` doesn't exist yet, so the probe must
    /// create it (empty, if it wasn't there) rather than fail with `ENOENT`.
    pub async fn probe_writable(&self) -> io::Result<()> {
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.target)
            .await
            .map(|_| ())
    }

    /// Make this op's content visible at `target`.
    ///
    /// If `target` already exists, the existing file is moved aside first
    /// so a later `abort()` in the same transaction can restore it.
    pub async fn commit(&mut self) -> io::Result<()> {
        let staged = self
            .staged_temp
            .take()
            .expect("commit called on an op with no staged temp file");

        if fs::metadata(&self.target).await.is_ok() {
            let dir = self
                .target
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let aside = unique_sibling_path(dir).await?;
            fs::rename(&self.target, &aside).await?;
            fs::rename(&staged, &self.target).await?;
            self.previous_aside = Some(aside);
        } else {
            fs::rename(&staged, &self.target).await?;
        }
        self.committed = true;
        Ok(())
    }

    /// Undo this op. Before commit: unlink the `.tmp` file. After commit:
    /// unlink the now-visible target and restore whatever it displaced, if
    /// anything did.
    pub async fn abort(&mut self) {
        if self.committed {
            let _ = fs::remove_file(&self.target).await;
            if let Some(aside) = self.previous_aside.take() {
                let _ = fs::rename(&aside, &self.target).await;
            }
        } else if let Some(staged) = self.staged_temp.take() {
            let _ = fs::remove_file(&staged).await;
        }
    }
}

/// Create a uniquely-named, empty sibling file in `dir` and return its path
/// without deleting it — used to stash a collision victim during commit.
async fn unique_sibling_path(dir: PathBuf) -> io::Result<PathBuf> {
    tokio::task::spawn_blocking(move || {
        let named = tempfile::Builder::new()
            .prefix(".netfs-aside-")
            .tempfile_in(&dir)?;
        named.into_temp_path().keep().map_err(|e| e.error)
    })
    .await
    .map_err(|e| io::Error::other(format!("aside-path task failed: {e}")))?
}

/// The ordered list of uploads pending commit on one client connection.
/// Owned entirely by the connection task; never shared across connections.
#[derive(Default)]
pub struct Transaction {
    ops: Vec<FileUpload>,
}

impl Transaction {
    /// Start staging a new upload to `target`, first aborting and dropping
    /// any earlier pending op in this transaction that targets the same
    /// `.tmp` file (spec Invariant 2).
    pub async fn begin_upload(&mut self, target: PathBuf) -> &mut FileUpload {
        let staged_temp = FileUpload::staged_temp_path(&target);
        if let Some(pos) = self
            .ops
            .iter()
            .position(|op| op.staged_temp() == Some(staged_temp.as_path()))
        {
            let mut superseded = self.ops.remove(pos);
            superseded.abort().await;
        }
        let upload = FileUpload::begin(target).await;
        self.ops.push(upload);
        self.ops.last_mut().expect("just pushed")
    }

    /// Pop the most recently pushed op back off, e.g. to hand it to
    /// `finish()`, which consumes `self` by value.
    pub fn pop_last(&mut self) -> Option<FileUpload> {
        self.ops.pop()
    }

    /// Mutable access to the most recently pushed op, for streaming chunks
    /// into it without a pop/push round trip per chunk.
    pub fn last_mut(&mut self) -> Option<&mut FileUpload> {
        self.ops.last_mut()
    }

    /// Push an op back onto the transaction, e.g. after `finish()` returned
    /// it successfully.
    pub fn push(&mut self, op: FileUpload) {
        self.ops.push(op);
    }

    /// Whether any op is currently pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Probe every pending op for writability; does not mutate or abort
    /// anything. Returns `Err` on the first failure.
    pub async fn prepare(&self) -> io::Result<()> {
        for op in &self.ops {
            op.probe_writable().await?;
        }
        Ok(())
    }

    /// Commit every pending op in order. On the first failure, abort every
    /// op (including ones already committed this pass, which restore their
    /// aside) and return the error; the transaction is left empty either
    /// way.
    pub async fn commit(&mut self) -> io::Result<()> {
        let mut ops = std::mem::take(&mut self.ops);
        let mut failure = None;
        for op in &mut ops {
            if let Err(e) = op.commit().await {
                failure = Some(e);
                break;
            }
        }
        if let Some(e) = failure {
            for op in &mut ops {
                op.abort().await;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Abort every pending op and clear the transaction. Used for an
    /// explicit rollback request and for connection teardown.
    pub async fn rollback(&mut self) {
        for op in &mut self.ops {
            op.abort().await;
        }
        self.ops.clear();
    }
}
