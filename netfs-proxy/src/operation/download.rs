//! Fan a download out to a random pool backend, retrying on failure
//!
//! Mirrors `proxy/operation/download.py`. Unlike upload/prepare/commit, a
//! download never touches the client's write transaction — it picks a pool
//! backend at random, forwards whatever that backend sends, and if the
//! backend goes away mid-stream, tries another untried one with skip logic:
//! bytes already forwarded to the client must never be re-sent or
//! duplicated, only the ones beyond `sent_bytes`.
//!
//! Once `RESP_OK` and a length have gone to the client, the length prefix is
//! a promise this operation has already made on the wire. If every backend
//! is exhausted after that promise, there is no way to answer it honestly,
//! so the frontend connection itself is torn down instead of limping on
//! with a short or error'd body.

use rand::seq::SliceRandom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use netfs_common::protocol::{self, Request, Response};

use crate::frontend::Frontend;

/// Sentinel returned when every pool backend has been tried and none could
/// serve the download, but nothing has been written to the client yet.
struct Exhausted;

/// Sentinel meaning some bytes were already committed to the client before
/// the last backend failed; the caller must close the frontend connection.
struct Unrecoverable;

pub async fn handle<R, W>(reader: &mut R, writer: &mut W, frontend: &mut Frontend) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let name = protocol::read_string(reader).await.map_err(crate::frontend::protocol_io_error)?;

    let mut untried: Vec<usize> = (0..frontend.pool.len()).collect();
    untried.shuffle(&mut rand::rng());

    let mut sent_bytes: u64 = 0;

    loop {
        let Some(index) = untried.pop() else {
            return protocol::write_response(writer, Response::Error).await;
        };

        match try_backend(writer, frontend, index, &name, &mut sent_bytes).await {
            Ok(()) => return Ok(()),
            Err(Ok(Exhausted)) => continue,
            Err(Err(Unrecoverable)) => {
                return Err(std::io::Error::other(
                    "proxy download: backend lost after bytes already forwarded",
                ));
            }
        }
    }
}

/// Attempt to serve the whole download from one pool backend.
///
/// Returns `Ok(())` on a clean finish (including a clean `RESP_NOTFOUND`/
/// `RESP_UPLOADING`/`RESP_ERROR` relayed to the client — those are not
/// failures of the *backend*, they are the backend's honest answer and the
/// download operation is done). Returns `Err(Ok(Exhausted))` if this backend
/// could not be used at all and no bytes reached the client yet, so the
/// caller should try the next one. Returns `Err(Err(Unrecoverable))` if the
/// backend died after the client had already been sent part of the body.
async fn try_backend<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frontend: &mut Frontend,
    index: usize,
    name: &str,
    sent_bytes: &mut u64,
) -> Result<(), Result<Exhausted, Unrecoverable>> {
    let backend = frontend.pool[index].clone();
    let Some(mut stream) = backend.take().await else {
        return Err(Ok(Exhausted));
    };

    let outcome = serve_from(&mut stream, writer, name, sent_bytes).await;
    match outcome {
        BackendOutcome::Done => {
            backend.give_back(stream).await;
            Ok(())
        }
        BackendOutcome::Lost if *sent_bytes == 0 => Err(Ok(Exhausted)),
        BackendOutcome::Lost => Err(Err(Unrecoverable)),
    }
}

enum BackendOutcome {
    /// The backend answered fully (including a non-OK status relayed as-is).
    Done,
    /// The backend's connection failed partway through talking to it.
    Lost,
}

async fn serve_from<B, W>(
    backend: &mut B,
    writer: &mut W,
    name: &str,
    sent_bytes: &mut u64,
) -> BackendOutcome
where
    B: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    if protocol::write_request(backend, Request::Download).await.is_err() {
        return BackendOutcome::Lost;
    }
    if protocol::write_string(backend, name).await.is_err() {
        return BackendOutcome::Lost;
    }
    if backend.flush().await.is_err() {
        return BackendOutcome::Lost;
    }

    let status = match protocol::read_response(backend).await {
        Ok(r) => r,
        Err(_) => return BackendOutcome::Lost,
    };

    // Any non-OK status — NotFound, Uploading, or Error — is treated the
    // same as a dead backend: try the next untried one. Only once every
    // pool backend has been exhausted does the operation answer the client
    // at all, so a lone backend's NotFound never gets relayed as-is.
    if !status.is_ok() {
        return BackendOutcome::Lost;
    }

    if *sent_bytes == 0 {
        if protocol::write_response(writer, Response::Ok).await.is_err() {
            return BackendOutcome::Lost;
        }
    }

    let content_length = match protocol::read_length(backend).await {
        Ok(n) => n,
        Err(_) => return BackendOutcome::Lost,
    };

    if *sent_bytes == 0 && protocol::write_length(writer, content_length).await.is_err() {
        return BackendOutcome::Lost;
    }

    let mut skipped_bytes: u64 = 0;
    let mut remaining = content_length;
    let mut buf = vec![0u8; protocol::CHUNK_SIZE];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        if backend.read_exact(&mut buf[..want]).await.is_err() {
            return BackendOutcome::Lost;
        }

        let chunk_start = skipped_bytes;
        skipped_bytes += want as u64;

        if chunk_start + (want as u64) > *sent_bytes {
            let drop = sent_bytes.saturating_sub(chunk_start) as usize;
            let to_write = &buf[drop..want];
            if !to_write.is_empty() {
                if writer.write_all(to_write).await.is_err() {
                    return BackendOutcome::Lost;
                }
                *sent_bytes += to_write.len() as u64;
            }
        }
        remaining -= want as u64;
    }

    let digest = match protocol::read_digest(backend).await {
        Ok(d) => d,
        Err(_) => return BackendOutcome::Lost,
    };
    let mtime = match protocol::read_mtime(backend).await {
        Ok(m) => m,
        Err(_) => return BackendOutcome::Lost,
    };

    if protocol::write_digest(writer, &digest).await.is_err() {
        return BackendOutcome::Lost;
    }
    if protocol::write_mtime(writer, mtime).await.is_err() {
        return BackendOutcome::Lost;
    }

    BackendOutcome::Done
}
