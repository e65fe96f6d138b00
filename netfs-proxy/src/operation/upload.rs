//! Fan an upload out to every transaction backend
//!
//! Mirrors `proxy/operation/upload.py`: every field of the client's upload
//! frame is re-sent verbatim to each backend still in the transaction as it
//! arrives, so no backend ever needs the whole payload buffered. A backend
//! that drops out partway (a failed write, or a non-OK status once the
//! digest has gone through) is rolled back and removed from the
//! transaction; the upload as a whole succeeds if at least one backend is
//! still standing afterward.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use netfs_common::protocol::{self, Request, Response};

use crate::frontend::{Frontend, protocol_io_error};

pub async fn handle<R, W>(reader: &mut R, writer: &mut W, frontend: &mut Frontend) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    frontend.ensure_transaction().await;

    let alive = frontend
        .distribute(|_, s| async move { protocol::write_request(s, Request::Upload).await })
        .await;
    frontend.retain(&alive).await;

    let name = protocol::read_string(reader).await.map_err(protocol_io_error)?;
    let alive = frontend
        .distribute(|_, s| {
            let name = name.clone();
            async move { protocol::write_string(s, &name).await }
        })
        .await;
    frontend.retain(&alive).await;

    let content_length = protocol::read_length(reader).await.map_err(protocol_io_error)?;
    let alive = frontend
        .distribute(move |_, s| async move { protocol::write_length(s, content_length).await })
        .await;
    frontend.retain(&alive).await;

    let mut remaining = content_length;
    let mut buf = vec![0u8; protocol::CHUNK_SIZE];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..want]).await?;
        let chunk = buf[..want].to_vec();
        let alive = frontend
            .distribute(move |_, s| {
                let chunk = chunk.clone();
                async move {
                    use tokio::io::AsyncWriteExt;
                    s.write_all(&chunk).await
                }
            })
            .await;
        frontend.retain(&alive).await;
        remaining -= want as u64;
    }

    let digest = protocol::read_digest(reader).await?;
    let alive = frontend
        .distribute(move |_, s| async move { protocol::write_digest(s, &digest).await })
        .await;
    frontend.retain(&alive).await;

    if frontend.active_len() == 0 {
        return protocol::write_response(writer, Response::Error).await;
    }

    let votes = frontend.read_votes().await;
    frontend.retain(&votes).await;

    let response = if frontend.active_len() > 0 {
        Response::Ok
    } else {
        Response::Error
    };
    protocol::write_response(writer, response).await
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::backend::{BackendAddr, PoolBackend};

    /// Build the bytes a client sends *after* its `REQ_UPLOAD` byte: name,
    /// content length, content, and trailing digest.
    async fn client_frame(name: &str, content: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        protocol::write_string(&mut buf, name).await.unwrap();
        protocol::write_length(&mut buf, content.len() as u64).await.unwrap();
        buf.extend_from_slice(content);
        let mut hash = netfs_common::hash::RunningHash::new();
        hash.update(content);
        protocol::write_digest(&mut buf, &hash.finalize()).await.unwrap();
        buf
    }

    /// Fake backend that receives a full upload frame and answers with `vote`.
    async fn fake_backend_voting(vote: Response, content: &'static [u8]) -> BackendAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let req = protocol::read_request(&mut stream).await.unwrap();
            assert_eq!(req, Request::Upload);
            let _name = protocol::read_string(&mut stream).await.unwrap();
            let len = protocol::read_length(&mut stream).await.unwrap();
            let mut received = vec![0u8; len as usize];
            tokio::io::AsyncReadExt::read_exact(&mut stream, &mut received).await.unwrap();
            assert_eq!(received, content);
            let _digest = protocol::read_digest(&mut stream).await.unwrap();
            protocol::write_response(&mut stream, vote).await.unwrap();
            stream.flush().await.unwrap();
        });
        BackendAddr {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    async fn frontend_with_pool(addrs: &[BackendAddr]) -> Frontend {
        let pool = Arc::new(Vec::<Arc<PoolBackend>>::new());
        Frontend::new(pool, Arc::new(addrs.to_vec()))
    }

    #[tokio::test]
    async fn succeeds_when_the_only_backend_votes_ok() {
        let addr = fake_backend_voting(Response::Ok, b"hello").await;
        let mut frontend = frontend_with_pool(&[addr]).await;

        let frame = client_frame("f.bin", b"hello").await;
        let mut reader = Cursor::new(frame);
        let mut out = Cursor::new(Vec::new());
        handle(&mut reader, &mut out, &mut frontend).await.unwrap();

        assert_eq!(out.into_inner(), vec![Response::Ok.to_byte() as u8]);
        assert_eq!(frontend.active_len(), 1);
    }

    #[tokio::test]
    async fn drops_a_dissenting_backend_but_still_succeeds_with_one_survivor() {
        let good = fake_backend_voting(Response::Ok, b"data").await;
        let bad = fake_backend_voting(Response::Error, b"data").await;
        let mut frontend = frontend_with_pool(&[good, bad]).await;

        let frame = client_frame("f.bin", b"data").await;
        let mut reader = Cursor::new(frame);
        let mut out = Cursor::new(Vec::new());
        handle(&mut reader, &mut out, &mut frontend).await.unwrap();

        assert_eq!(out.into_inner(), vec![Response::Ok.to_byte() as u8]);
        assert_eq!(frontend.active_len(), 1, "the dissenting backend should have been dropped");
    }

    #[tokio::test]
    async fn fails_when_no_backend_can_be_dialed() {
        // An address nothing listens on: `ensure_transaction` dials it and
        // gets nothing back, so the transaction opens empty.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = BackendAddr {
            host: dead.local_addr().unwrap().ip().to_string(),
            port: dead.local_addr().unwrap().port(),
        };
        drop(dead);
        let mut frontend = frontend_with_pool(&[dead_addr]).await;

        let frame = client_frame("f.bin", b"data").await;
        let mut reader = Cursor::new(frame);
        let mut out = Cursor::new(Vec::new());
        handle(&mut reader, &mut out, &mut frontend).await.unwrap();

        assert_eq!(out.into_inner(), vec![Response::Error.to_byte() as u8]);
    }

    #[tokio::test]
    async fn a_connected_backend_that_drops_mid_stream_is_silently_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Read the request byte then vanish without reading the rest.
            let mut stream = stream;
            let _ = protocol::read_request(&mut stream).await;
            drop(stream);
        });
        let backend_addr = BackendAddr {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        let mut frontend = frontend_with_pool(&[backend_addr]).await;

        let frame = client_frame("f.bin", b"data").await;
        let mut reader = Cursor::new(frame);
        let mut out = Cursor::new(Vec::new());
        handle(&mut reader, &mut out, &mut frontend).await.unwrap();

        assert_eq!(out.into_inner(), vec![Response::Error.to_byte() as u8]);
        assert_eq!(frontend.active_len(), 0);
    }
}
