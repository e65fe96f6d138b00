//! Vote prepare across the transaction backends
//!
//! Mirrors `proxy/operation/prepare.py`. No transaction open yet is a
//! trivial success (nothing to prepare); a transaction that has already
//! drained to an empty backend list is an immediate failure, distinct from
//! the "no transaction at all" case. Otherwise every remaining backend
//! votes and the proxy succeeds if any one of them does — backends that
//! vote no are rolled back and dropped, but on overall failure the
//! transaction itself resets to "none open" so a later commit or rollback
//! on this connection has nothing left to act on.

use tokio::io::AsyncWrite;

use netfs_common::protocol::{self, Request, Response};

use crate::frontend::Frontend;

pub async fn handle<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frontend: &mut Frontend,
) -> std::io::Result<()> {
    if frontend.transaction.is_none() {
        return protocol::write_response(writer, Response::Ok).await;
    }
    if frontend.active_len() == 0 {
        return protocol::write_response(writer, Response::Error).await;
    }

    let alive = frontend
        .distribute(|_, s| async move { protocol::write_request(s, Request::Prepare).await })
        .await;
    frontend.retain(&alive).await;

    let votes = frontend.read_votes().await;
    let success = votes.iter().any(|&v| v);
    frontend.retain(&votes).await;

    if success {
        protocol::write_response(writer, Response::Ok).await
    } else {
        frontend.transaction = None;
        protocol::write_response(writer, Response::Error).await
    }
}
