//! netfs wire protocol
//!
//! A connection carries one or more requests, each a single signed byte
//! identifying the operation, followed by operation-specific fields. Every
//! multi-byte integer is big-endian. Digests are the raw 64 bytes of a
//! SHA-512 hash, never hex-encoded.
//!
//! Storage server connections see [`Request::Upload`], [`Request::Prepare`],
//! [`Request::Commit`], [`Request::Rollback`], and [`Request::Download`].
//! Proxy connections speak the identical protocol to their frontend and fan
//! it out to backends, so a single codec serves both.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::hash::{DIGEST_LEN, Digest512};

/// Chunk size used when streaming file content.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// A request byte, sent by the client (or by a proxy's frontend) to open an
/// operation on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Upload a file's content, ending with a running SHA-512 digest.
    Upload = 1,
    /// Vote on whether a previously uploaded file can be committed.
    Prepare = 2,
    /// Make a prepared upload durable.
    Commit = 3,
    /// Discard a previously uploaded or prepared file.
    Rollback = 4,
    /// Stream a file's content back to the requester.
    Download = 5,
}

impl Request {
    /// Decode a request byte read off the wire.
    #[must_use]
    pub fn from_byte(byte: i8) -> Option<Self> {
        match byte {
            1 => Some(Self::Upload),
            2 => Some(Self::Prepare),
            3 => Some(Self::Commit),
            4 => Some(Self::Rollback),
            5 => Some(Self::Download),
            _ => None,
        }
    }

    /// The byte this request is encoded as on the wire.
    #[must_use]
    pub fn to_byte(self) -> i8 {
        self as i8
    }
}

/// A response byte, sent back in answer to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// The operation succeeded.
    Ok = 1,
    /// The operation failed; no further detail travels on the wire.
    Error = 2,
    /// The requested path does not exist (download only).
    NotFound = 3,
    /// The requested path has an upload in progress (download only).
    Uploading = 4,
}

impl Response {
    /// Decode a response byte read off the wire.
    #[must_use]
    pub fn from_byte(byte: i8) -> Option<Self> {
        match byte {
            1 => Some(Self::Ok),
            2 => Some(Self::Error),
            3 => Some(Self::NotFound),
            4 => Some(Self::Uploading),
            _ => None,
        }
    }

    /// The byte this response is encoded as on the wire.
    #[must_use]
    pub fn to_byte(self) -> i8 {
        self as i8
    }

    /// Whether this response indicates the operation succeeded.
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Errors decoding a frame off the wire: either the underlying I/O failed,
/// or a byte did not match any known request/response/length constraint.
#[derive(Debug)]
pub enum ProtocolError {
    /// The connection was closed, reset, or otherwise failed at the I/O layer.
    Io(io::Error),
    /// A byte was read that does not correspond to a known request or response.
    UnknownOpcode(i8),
    /// A length field was negative or otherwise nonsensical.
    InvalidLength(i64),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "protocol I/O error: {e}"),
            Self::UnknownOpcode(b) => write!(f, "unknown opcode: {b}"),
            Self::InvalidLength(n) => write!(f, "invalid length field: {n}"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Read a single request byte.
///
/// # Errors
///
/// Returns [`ProtocolError::Io`] if the connection fails, or
/// [`ProtocolError::UnknownOpcode`] if the byte doesn't name a known request.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Request, ProtocolError> {
    let byte = reader.read_i8().await?;
    Request::from_byte(byte).ok_or(ProtocolError::UnknownOpcode(byte))
}

/// Write a single request byte.
///
/// # Errors
///
/// Returns an error if the underlying write fails.
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    request: Request,
) -> io::Result<()> {
    writer.write_i8(request.to_byte()).await
}

/// Read a single response byte.
///
/// # Errors
///
/// Returns [`ProtocolError::Io`] if the connection fails, or
/// [`ProtocolError::UnknownOpcode`] if the byte doesn't name a known response.
pub async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Response, ProtocolError> {
    let byte = reader.read_i8().await?;
    Response::from_byte(byte).ok_or(ProtocolError::UnknownOpcode(byte))
}

/// Write a single response byte.
///
/// # Errors
///
/// Returns an error if the underlying write fails.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: Response,
) -> io::Result<()> {
    writer.write_i8(response.to_byte()).await
}

/// Read a big-endian length-prefixed byte string: an `i32` length followed
/// by that many bytes. Used for file names and relative paths.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidLength`] if the length is negative, or
/// [`ProtocolError::Io`] if the connection fails.
pub async fn read_string<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, ProtocolError> {
    let len = reader.read_i32().await?;
    if len < 0 {
        return Err(ProtocolError::InvalidLength(i64::from(len)));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf)
        .map_err(|e| ProtocolError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// Write a big-endian length-prefixed byte string.
///
/// # Errors
///
/// Returns an error if the underlying write fails.
pub async fn write_string<W: AsyncWrite + Unpin>(writer: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    writer.write_i32(bytes.len() as i32).await?;
    writer.write_all(bytes).await
}

/// Read a big-endian `i64` length prefix, used before a stream of file
/// content or chunk data.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidLength`] if the value is negative, or
/// [`ProtocolError::Io`] if the connection fails.
pub async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64, ProtocolError> {
    let len = reader.read_i64().await?;
    if len < 0 {
        return Err(ProtocolError::InvalidLength(len));
    }
    Ok(len as u64)
}

/// Write a big-endian `i64` length prefix.
///
/// # Errors
///
/// Returns an error if the underlying write fails.
pub async fn write_length<W: AsyncWrite + Unpin>(writer: &mut W, len: u64) -> io::Result<()> {
    writer.write_i64(len as i64).await
}

/// Read a raw 64-byte SHA-512 digest.
///
/// # Errors
///
/// Returns an error if the connection fails before all 64 bytes arrive.
pub async fn read_digest<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Digest512> {
    let mut buf = [0u8; DIGEST_LEN];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a raw 64-byte SHA-512 digest.
///
/// # Errors
///
/// Returns an error if the underlying write fails.
pub async fn write_digest<W: AsyncWrite + Unpin>(
    writer: &mut W,
    digest: &Digest512,
) -> io::Result<()> {
    writer.write_all(digest).await
}

/// Read the 4-byte big-endian modification time that trails a download's
/// content and digest.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn read_mtime<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<i32> {
    reader.read_i32().await
}

/// Write the 4-byte big-endian modification time that trails a download's
/// content and digest.
///
/// # Errors
///
/// Returns an error if the underlying write fails.
pub async fn write_mtime<W: AsyncWrite + Unpin>(writer: &mut W, mtime: i32) -> io::Result<()> {
    writer.write_i32(mtime).await
}
