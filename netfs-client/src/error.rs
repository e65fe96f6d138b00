//! Client-visible error types
//!
//! Everything an application integrating `netfs-client` needs to handle
//! funnels into three outcomes: a failed upload, a failed download, or a
//! failed commit. `InvalidPath` and `Io` round out the set for failures
//! that never reach the wire at all.

use std::fmt;
use std::io;

/// An error raised by a [`crate::connection::NetfsConnection`] call.
#[derive(Debug)]
pub enum ClientError {
    /// A path escaped the cache root, or failed the shared length/character
    /// validation, before any bytes were sent.
    InvalidPath(netfs_common::paths::PathError),
    /// An upload's payload did not reach the server intact, or the server
    /// reported `RESP_ERROR`.
    UploadFailed,
    /// A download could not be completed: the server reported
    /// `RESP_NOTFOUND`/`RESP_UPLOADING`/`RESP_ERROR`, or the content's hash
    /// didn't match after a retry.
    DownloadFailed(DownloadFailure),
    /// A `prepare`/`commit`/`rollback` call got a non-OK response.
    CommitFailed,
    /// Local I/O failed: opening a cache file, acquiring a lock, etc.
    Io(io::Error),
}

/// Why a download failed, surfaced for callers that want to distinguish
/// "not there yet" from "corrupted in transit".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFailure {
    /// The server has no committed content at this path.
    NotFound,
    /// The server has an upload in progress at this path.
    Uploading,
    /// The server reported a generic error.
    ServerError,
    /// The received content's hash didn't match even after one retry.
    HashMismatch,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPath(e) => write!(f, "invalid path: {e}"),
            Self::UploadFailed => write!(f, "upload failed"),
            Self::DownloadFailed(reason) => write!(f, "download failed: {reason:?}"),
            Self::CommitFailed => write!(f, "commit failed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidPath(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<netfs_common::paths::PathError> for ClientError {
    fn from(e: netfs_common::paths::PathError) -> Self {
        Self::InvalidPath(e)
    }
}
