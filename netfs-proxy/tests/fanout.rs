//! End-to-end fan-out and 2PC tests: a real proxy in front of real storage
//! server backends, driven with the raw wire protocol the way a client
//! would.

use std::net::SocketAddr;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use netfs_common::hash::RunningHash;
use netfs_common::protocol::{self, Request, Response};
use netfs_proxy::backend::BackendAddr;

/// Start a real storage server backend, returning its address and the
/// `TempDir` its root lives in (kept alive for the whole test).
async fn spawn_backend() -> (SocketAddr, TempDir) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = netfs_server::serve(listener, root, false).await;
    });
    (addr, dir)
}

/// Start a proxy in front of `backends`, returning its address.
async fn spawn_proxy(backends: &[SocketAddr]) -> SocketAddr {
    let addrs: Vec<BackendAddr> = backends
        .iter()
        .map(|a| BackendAddr {
            host: a.ip().to_string(),
            port: a.port(),
        })
        .collect();
    let addrs = Arc::new(addrs);
    let pool = netfs_proxy::spawn_pool(&addrs);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = netfs_proxy::serve(listener, pool, addrs, false).await;
    });

    // Give the pool backends a moment to dial in so downloads don't race
    // the very first reconnect attempt.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    addr
}

async fn upload(stream: &mut TcpStream, name: &str, content: &[u8]) -> Response {
    protocol::write_request(stream, Request::Upload).await.unwrap();
    protocol::write_string(stream, name).await.unwrap();
    protocol::write_length(stream, content.len() as u64).await.unwrap();
    stream.write_all(content).await.unwrap();
    let mut hash = RunningHash::new();
    hash.update(content);
    protocol::write_digest(stream, &hash.finalize()).await.unwrap();
    stream.flush().await.unwrap();
    protocol::read_response(stream).await.unwrap()
}

async fn commit(stream: &mut TcpStream) -> Response {
    protocol::write_request(stream, Request::Commit).await.unwrap();
    stream.flush().await.unwrap();
    protocol::read_response(stream).await.unwrap()
}

async fn prepare(stream: &mut TcpStream) -> Response {
    protocol::write_request(stream, Request::Prepare).await.unwrap();
    stream.flush().await.unwrap();
    protocol::read_response(stream).await.unwrap()
}

async fn rollback(stream: &mut TcpStream) {
    protocol::write_request(stream, Request::Rollback).await.unwrap();
    stream.flush().await.unwrap();
}

async fn download(stream: &mut TcpStream, name: &str) -> Result<Vec<u8>, Response> {
    protocol::write_request(stream, Request::Download).await.unwrap();
    protocol::write_string(stream, name).await.unwrap();
    stream.flush().await.unwrap();
    let status = protocol::read_response(stream).await.unwrap();
    if !status.is_ok() {
        return Err(status);
    }
    let len = protocol::read_length(stream).await.unwrap();
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await.unwrap();
    let _digest = protocol::read_digest(stream).await.unwrap();
    let _mtime = protocol::read_mtime(stream).await.unwrap();
    Ok(buf)
}

#[tokio::test]
async fn upload_fans_out_to_every_backend_and_downloads_from_either() {
    let (b1, dir1) = spawn_backend().await;
    let (b2, dir2) = spawn_backend().await;
    let proxy_addr = spawn_proxy(&[b1, b2]).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    assert_eq!(upload(&mut client, "k", b"fan out me").await, Response::Ok);
    assert_eq!(commit(&mut client).await, Response::Ok);

    assert_eq!(tokio::fs::read(dir1.path().join("k")).await.unwrap(), b"fan out me");
    assert_eq!(tokio::fs::read(dir2.path().join("k")).await.unwrap(), b"fan out me");

    assert_eq!(download(&mut client, "k").await.unwrap(), b"fan out me");
}

/// `REQ_ROLLBACK` has no response byte: the proxy forwards
/// it to every backend and tears the connections down without waiting for
/// an acknowledgement, so a backend's unlink can land slightly after the
/// client's `rollback()` call returns. Poll instead of asserting instantly.
async fn wait_until_absent(path: &std::path::Path) {
    for _ in 0..100 {
        if !path.exists() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("{} still exists after waiting", path.display());
}

#[tokio::test]
async fn rollback_discards_the_upload_on_every_backend() {
    let (b1, dir1) = spawn_backend().await;
    let (b2, dir2) = spawn_backend().await;
    let proxy_addr = spawn_proxy(&[b1, b2]).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    assert_eq!(upload(&mut client, "k", b"never committed").await, Response::Ok);
    rollback(&mut client).await;

    wait_until_absent(&dir1.path().join("k")).await;
    wait_until_absent(&dir2.path().join("k")).await;
    wait_until_absent(&dir1.path().join("k.tmp")).await;
    wait_until_absent(&dir2.path().join("k.tmp")).await;
}

#[tokio::test]
async fn commit_with_one_unreachable_backend_still_succeeds() {
    let (b1, dir1) = spawn_backend().await;
    // An address nothing is listening on: ensure_transaction's dial fails
    // for it, so the transaction opens with exactly one live backend —
    // the "at least one backend committed" rule still succeeds.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let proxy_addr = spawn_proxy(&[b1, dead_addr]).await;
    let mut client = TcpStream::connect(proxy_addr).await.unwrap();

    assert_eq!(upload(&mut client, "k", b"partial availability").await, Response::Ok);
    assert_eq!(prepare(&mut client).await, Response::Ok);
    assert_eq!(commit(&mut client).await, Response::Ok);

    assert_eq!(
        tokio::fs::read(dir1.path().join("k")).await.unwrap(),
        b"partial availability"
    );
    assert_eq!(download(&mut client, "k").await.unwrap(), b"partial availability");
}

#[tokio::test]
async fn upload_fails_when_every_backend_is_unreachable() {
    let dead1 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead1_addr = dead1.local_addr().unwrap();
    drop(dead1);
    let dead2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead2_addr = dead2.local_addr().unwrap();
    drop(dead2);

    let proxy_addr = spawn_proxy(&[dead1_addr, dead2_addr]).await;
    let mut client = TcpStream::connect(proxy_addr).await.unwrap();

    // The transaction opens with zero live backends, but the client's
    // upload bytes are still fully drained so the connection stays in sync.
    assert_eq!(upload(&mut client, "k", b"nobody home").await, Response::Error);

    // A later prepare/commit/rollback on this still-drained transaction is
    // the "empty backend list" case, not the "no transaction" case.
    assert_eq!(commit(&mut client).await, Response::Error);
}

#[tokio::test]
async fn prepare_and_commit_on_no_transaction_are_idempotent_no_ops() {
    let (b1, _dir1) = spawn_backend().await;
    let proxy_addr = spawn_proxy(&[b1]).await;
    let mut client = TcpStream::connect(proxy_addr).await.unwrap();

    assert_eq!(prepare(&mut client).await, Response::Ok);
    assert_eq!(commit(&mut client).await, Response::Ok);
    assert_eq!(commit(&mut client).await, Response::Ok);
}

#[tokio::test]
async fn second_upload_to_same_path_in_one_transaction_keeps_only_the_last() {
    let (b1, dir1) = spawn_backend().await;
    let proxy_addr = spawn_proxy(&[b1]).await;
    let mut client = TcpStream::connect(proxy_addr).await.unwrap();

    assert_eq!(upload(&mut client, "k", b"first").await, Response::Ok);
    assert_eq!(upload(&mut client, "k", b"second").await, Response::Ok);
    assert_eq!(commit(&mut client).await, Response::Ok);

    assert_eq!(tokio::fs::read(dir1.path().join("k")).await.unwrap(), b"second");
}
