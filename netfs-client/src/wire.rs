//! Blocking mirror of `netfs_common::protocol`
//!
//! The server and proxy are single-logical-thread async event loops; the
//! client is a deliberately different regime: plain blocking socket I/O,
//! meant to be called from ordinary application code that is not itself
//! async. Rather than drag `tokio` into a library whose
//! only job is to drive one `std::net::TcpStream` at a time, this module
//! re-implements the same big-endian frame fields directly on
//! `std::io::Read`/`Write`, field for field identical to
//! `netfs_common::protocol`.

use std::io::{self, Read, Write};

use netfs_common::hash::{DIGEST_LEN, Digest512};
use netfs_common::protocol::{Request, Response};

/// Read a single request byte.
///
/// # Errors
///
/// Returns an error if the connection fails or the byte names no known
/// request.
pub fn read_request<R: Read>(reader: &mut R) -> io::Result<Request> {
    let byte = read_i8(reader)?;
    Request::from_byte(byte).ok_or_else(|| unknown_opcode(byte))
}

/// Write a single request byte.
///
/// # Errors
///
/// Returns an error if the underlying write fails.
pub fn write_request<W: Write>(writer: &mut W, request: Request) -> io::Result<()> {
    write_i8(writer, request.to_byte())
}

/// Read a single response byte.
///
/// # Errors
///
/// Returns an error if the connection fails or the byte names no known
/// response.
pub fn read_response<R: Read>(reader: &mut R) -> io::Result<Response> {
    let byte = read_i8(reader)?;
    Response::from_byte(byte).ok_or_else(|| unknown_opcode(byte))
}

/// Write a single response byte.
///
/// # Errors
///
/// Returns an error if the underlying write fails.
pub fn write_response<W: Write>(writer: &mut W, response: Response) -> io::Result<()> {
    write_i8(writer, response.to_byte())
}

/// Read a big-endian length-prefixed UTF-8 string (an `i32` length followed
/// by that many bytes).
///
/// # Errors
///
/// Returns an error if the length is negative, the connection fails, or the
/// bytes are not valid UTF-8.
pub fn read_string<R: Read>(reader: &mut R) -> io::Result<String> {
    let len = read_i32(reader)?;
    if len < 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("negative length: {len}")));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write a big-endian length-prefixed UTF-8 string.
///
/// # Errors
///
/// Returns an error if the underlying write fails.
pub fn write_string<W: Write>(writer: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    write_i32(writer, bytes.len() as i32)?;
    writer.write_all(bytes)
}

/// Read a big-endian `i64` length prefix.
///
/// # Errors
///
/// Returns an error if the value is negative or the connection fails.
pub fn read_length<R: Read>(reader: &mut R) -> io::Result<u64> {
    let len = read_i64(reader)?;
    if len < 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("negative length: {len}")));
    }
    Ok(len as u64)
}

/// Write a big-endian `i64` length prefix.
///
/// # Errors
///
/// Returns an error if the underlying write fails.
pub fn write_length<W: Write>(writer: &mut W, len: u64) -> io::Result<()> {
    write_i64(writer, len as i64)
}

/// Read a raw 64-byte SHA-512 digest.
///
/// # Errors
///
/// Returns an error if the connection fails before all 64 bytes arrive.
pub fn read_digest<R: Read>(reader: &mut R) -> io::Result<Digest512> {
    let mut buf = [0u8; DIGEST_LEN];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write a raw 64-byte SHA-512 digest.
///
/// # Errors
///
/// Returns an error if the underlying write fails.
pub fn write_digest<W: Write>(writer: &mut W, digest: &Digest512) -> io::Result<()> {
    writer.write_all(digest)
}

/// Read the 4-byte big-endian modification time trailing a download.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub fn read_mtime<R: Read>(reader: &mut R) -> io::Result<i32> {
    read_i32(reader)
}

fn unknown_opcode(byte: i8) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("unknown opcode: {byte}"))
}

fn read_i8<R: Read>(reader: &mut R) -> io::Result<i8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0] as i8)
}

fn write_i8<W: Write>(writer: &mut W, v: i8) -> io::Result<()> {
    writer.write_all(&[v as u8])
}

fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

fn write_i32<W: Write>(writer: &mut W, v: i32) -> io::Result<()> {
    writer.write_all(&v.to_be_bytes())
}

fn read_i64<R: Read>(reader: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

fn write_i64<W: Write>(writer: &mut W, v: i64) -> io::Result<()> {
    writer.write_all(&v.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn request_roundtrip() {
        for req in [
            Request::Upload,
            Request::Prepare,
            Request::Commit,
            Request::Rollback,
            Request::Download,
        ] {
            let mut buf = Vec::new();
            write_request(&mut buf, req).unwrap();
            let mut cursor = Cursor::new(buf);
            assert_eq!(read_request(&mut cursor).unwrap(), req);
        }
    }

    #[test]
    fn response_roundtrip() {
        for resp in [Response::Ok, Response::Error, Response::NotFound, Response::Uploading] {
            let mut buf = Vec::new();
            write_response(&mut buf, resp).unwrap();
            let mut cursor = Cursor::new(buf);
            assert_eq!(read_response(&mut cursor).unwrap(), resp);
        }
    }

    #[test]
    fn string_roundtrip() {
        let mut buf = Vec::new();
        write_string(&mut buf, "a/b/c.txt").unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_string(&mut cursor).unwrap(), "a/b/c.txt");
    }

    #[test]
    fn length_roundtrip() {
        let mut buf = Vec::new();
        write_length(&mut buf, 987654321).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_length(&mut cursor).unwrap(), 987654321);
    }

    #[test]
    fn digest_roundtrip() {
        let digest: Digest512 = [9u8; DIGEST_LEN];
        let mut buf = Vec::new();
        write_digest(&mut buf, &digest).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_digest(&mut cursor).unwrap(), digest);
    }

    #[test]
    fn unknown_request_byte_is_an_error() {
        let mut cursor = Cursor::new(vec![42u8]);
        assert!(read_request(&mut cursor).is_err());
    }

    #[test]
    fn matches_async_protocol_wire_bytes() {
        // The blocking and async codecs must be byte-for-byte identical,
        // since the same peer speaks both depending on which side of the
        // connection it's on.
        let mut sync_buf = Vec::new();
        write_request(&mut sync_buf, Request::Upload).unwrap();
        write_string(&mut sync_buf, "x").unwrap();
        write_length(&mut sync_buf, 5).unwrap();

        assert_eq!(sync_buf, vec![1u8, 0, 0, 0, 1, b'x', 0, 0, 0, 0, 0, 0, 0, 5]);
    }
}
