//! The client's connection to a storage server or proxy
//!
//! One TCP connection, blocking I/O, no internal synchronization: the
//! type's `&mut self` methods are the whole story, and Rust's exclusive
//! borrow rules are what give "one logical caller at a time" here, not a
//! runtime lock. A connection configured with no server address is a legal,
//! permanently-disconnected client: every wire-touching method becomes a
//! no-op success, so code that drives an external transaction manager
//! doesn't need to special-case "no server configured" itself.

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};

use netfs_common::hash::RunningHash;
use netfs_common::protocol::{Request, Response};

use crate::cache::Cache;
use crate::error::{ClientError, DownloadFailure};
use crate::transaction::{JoinState, TwoPhaseParticipant};
use crate::wire;

/// Where to read an upload's content from.
pub enum UploadSource<'a> {
    /// An existing file on disk, either moved or copied into the cache
    /// before being sent.
    Path(&'a Path),
    /// An already-open reader, streamed directly into the cache copy and
    /// then uploaded.
    Reader(&'a mut dyn Read),
}

/// One connection to a netfs storage server or proxy, plus the local cache
/// directory it stages uploads in and deduplicates downloads against.
pub struct NetfsConnection {
    stream: Option<TcpStream>,
    peer: String,
    cache: Cache,
    join: JoinState,
}

impl NetfsConnection {
    /// Connect to `addr` and use `cache_root` as the local cache directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection or cache directory can't be
    /// established.
    pub fn connect(addr: impl ToSocketAddrs + ToString, cache_root: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let peer = addr.to_string();
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            stream: Some(stream),
            peer,
            cache: Cache::open(cache_root)?,
            join: JoinState::default(),
        })
    }

    /// Build a connection with no server configured: every wire-touching
    /// call becomes a no-op success, but the local cache still works for
    /// already-downloaded content.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory can't be established.
    pub fn disconnected(cache_root: impl Into<PathBuf>) -> Result<Self, ClientError> {
        Ok(Self {
            stream: None,
            peer: String::new(),
            cache: Cache::open(cache_root)?,
            join: JoinState::default(),
        })
    }

    /// The local cache this connection stages uploads in and serves
    /// downloads from.
    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    fn stream_mut(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "netfs client has no server configured"))
    }

    /// Stage `source` into the cache at `path`, then upload it.
    ///
    /// `move_file`, when `source` is [`UploadSource::Path`], moves the
    /// source into the cache instead of copying it (falling back to a copy
    /// across filesystems, matching `std::fs::rename`'s limitation).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidPath`] if `path` escapes the cache, or
    /// [`ClientError::UploadFailed`]/[`ClientError::Io`] otherwise.
    pub fn put(&mut self, path: &str, source: UploadSource<'_>, move_file: bool) -> Result<(), ClientError> {
        let target = self.cache.prepare_target(path)?;

        match source {
            UploadSource::Path(src) => {
                if move_file {
                    if std::fs::rename(src, &target).is_err() {
                        std::fs::copy(src, &target)?;
                        std::fs::remove_file(src)?;
                    }
                } else {
                    std::fs::copy(src, &target)?;
                }
            }
            UploadSource::Reader(reader) => {
                let mut file = File::create(&target)?;
                io::copy(reader, &mut file)?;
            }
        }

        let mut file = File::open(&target)?;
        self.upload(path, &mut file)
    }

    /// Return the local path of `path`, downloading it first if it isn't
    /// already cached.
    ///
    /// Two cooperating processes sharing one cache directory never both
    /// download the same file: the second caller blocks on the advisory
    /// lock and, once it acquires it, observes the first caller's completed
    /// download instead of starting its own.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidPath`] if `path` escapes the cache, or
    /// a download failure otherwise.
    pub fn get(&mut self, path: &str) -> Result<PathBuf, ClientError> {
        if self.cache.contains(path) {
            return Ok(self.cache.resolve(path)?);
        }

        let target = self.cache.prepare_target(path)?;
        let (mut lock, already_present) = self.cache.begin_download(&target)?;
        if already_present {
            return Ok(target);
        }

        let mtime = self.download(path, lock.file(), 1)?;
        lock.finish(&target, i64::from(mtime))?;
        Ok(target)
    }

    /// Send an upload frame for `file`'s content under `path`, computing a
    /// running SHA-512 as it streams. No-op success if this connection has
    /// no server configured.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UploadFailed`] if the server reports
    /// `RESP_ERROR`, or [`ClientError::Io`] on a connection failure.
    pub fn upload(&mut self, path: &str, file: &mut File) -> Result<(), ClientError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        let len = file.metadata()?.len();

        wire::write_request(stream, Request::Upload)?;
        wire::write_string(stream, path)?;
        wire::write_length(stream, len)?;

        let mut hash = RunningHash::new();
        let mut buf = vec![0u8; netfs_common::protocol::CHUNK_SIZE];
        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            file.read_exact(&mut buf[..want])?;
            stream.write_all(&buf[..want])?;
            hash.update(&buf[..want]);
            remaining -= want as u64;
        }
        let digest = hash.finalize();
        wire::write_digest(stream, &digest)?;
        stream.flush()?;

        let response = wire::read_response(stream)?;
        if !response.is_ok() {
            return Err(ClientError::UploadFailed);
        }

        self.join.join(self.peer.clone());
        Ok(())
    }

    /// Download `path` into `writer`, verifying its hash. On a mismatch,
    /// retries once against the same server before failing.
    ///
    /// No-op failure (`RESP_NOTFOUND`-shaped) if this connection has no
    /// server configured.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DownloadFailed`] if the server reports
    /// anything other than `RESP_OK`, or if the hash still mismatches after
    /// the retry.
    pub fn download(&mut self, path: &str, writer: &mut impl Write, retry: u8) -> Result<i32, ClientError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ClientError::DownloadFailed(DownloadFailure::NotFound));
        };

        wire::write_request(stream, Request::Download)?;
        wire::write_string(stream, path)?;
        stream.flush()?;

        let status = wire::read_response(stream)?;
        match status {
            Response::Ok => {}
            Response::NotFound => return Err(ClientError::DownloadFailed(DownloadFailure::NotFound)),
            Response::Uploading => return Err(ClientError::DownloadFailed(DownloadFailure::Uploading)),
            Response::Error => return Err(ClientError::DownloadFailed(DownloadFailure::ServerError)),
        }

        let len = wire::read_length(stream)?;
        let mut hash = RunningHash::new();
        let mut remaining = len;
        let mut buf = vec![0u8; netfs_common::protocol::CHUNK_SIZE];
        let mut received = Vec::with_capacity(len as usize);
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            stream.read_exact(&mut buf[..want])?;
            hash.update(&buf[..want]);
            received.extend_from_slice(&buf[..want]);
            remaining -= want as u64;
        }
        let expected = wire::read_digest(stream)?;
        let mtime = wire::read_mtime(stream)?;

        if hash.finalize() != expected {
            if retry > 0 {
                return self.download(path, writer, retry - 1);
            }
            return Err(ClientError::DownloadFailed(DownloadFailure::HashMismatch));
        }

        writer.write_all(&received)?;
        Ok(mtime)
    }

    /// Send `REQ_PREPARE` and translate a non-OK reply into
    /// [`ClientError::CommitFailed`]. No-op success with no server
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::CommitFailed`] on a non-OK reply, or
    /// [`ClientError::Io`] on a connection failure.
    pub fn prepare(&mut self) -> Result<(), ClientError> {
        self.send_vote(Request::Prepare)
    }

    /// Send `REQ_COMMIT` and translate a non-OK reply into
    /// [`ClientError::CommitFailed`]. No-op success with no server
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::CommitFailed`] on a non-OK reply, or
    /// [`ClientError::Io`] on a connection failure.
    pub fn commit(&mut self) -> Result<(), ClientError> {
        let result = self.send_vote(Request::Commit);
        self.join.clear();
        result
    }

    /// Send `REQ_ROLLBACK`. No response is expected; no-op with no server
    /// configured.
    pub fn rollback(&mut self) {
        self.join.clear();
        if let Some(stream) = self.stream.as_mut() {
            let _ = wire::write_request(stream, Request::Rollback);
            let _ = stream.flush();
        }
    }

    fn send_vote(&mut self, request: Request) -> Result<(), ClientError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        wire::write_request(stream, request)?;
        stream.flush()?;
        let response = wire::read_response(stream)?;
        if response.is_ok() { Ok(()) } else { Err(ClientError::CommitFailed) }
    }
}

impl TwoPhaseParticipant for NetfsConnection {
    fn tpc_vote(&mut self) -> Result<(), ClientError> {
        self.prepare()
    }

    fn tpc_finish(&mut self) -> Result<(), ClientError> {
        self.commit()
    }

    fn tpc_abort(&mut self) {
        self.rollback();
    }

    fn sort_key(&self) -> String {
        self.peer.clone()
    }
}
