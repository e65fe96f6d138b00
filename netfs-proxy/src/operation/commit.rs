//! Vote commit across the transaction backends
//!
//! Mirrors `proxy/operation/commit.py`, structurally identical to
//! [`crate::operation::prepare`] except that commit always ends the
//! transaction: win or lose, every surviving backend is closed (not rolled
//! back — the ones that answered OK just committed) and the transaction
//! state resets to "none open". This is the proxy's deliberate
//! availability-over-consistency choice: the overall commit succeeds if
//! even one backend durably committed, so a client sees success even when
//! some replicas didn't make it.
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
        frontend.transaction = None;
        return protocol::write_response(writer, Response::Error).await;
    }

    let alive = frontend
        .distribute(|_, s| async move { protocol::write_request(s, Request::Commit).await })
        .await;
    frontend.retain(&alive).await;

    let votes = frontend.read_votes().await;
    let success = votes.iter().any(|&v| v);
    frontend.retain(&votes).await;
    frontend.close_transaction().await;

    let response = if success { Response::Ok } else { Response::Error };
    protocol::write_response(writer, response).await
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use tokio::net::TcpListener;

    use super::*;
    use crate::backend::{BackendAddr, PoolBackend, TransactionBackend};

    /// Run a fake backend that reads one `Commit` request and answers with
    /// `vote`; a non-OK vote is expected to be followed by a rollback.
    async fn fake_voter(vote: Response, expect_rollback: bool) -> BackendAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let req = protocol::read_request(&mut stream).await.unwrap();
            assert_eq!(req, Request::Commit);
            protocol::write_response(&mut stream, vote).await.unwrap();
            use tokio::io::AsyncWriteExt;
            stream.flush().await.unwrap();
            if expect_rollback {
                let req = protocol::read_request(&mut stream).await.unwrap();
                assert_eq!(req, Request::Rollback);
            }
        });
        BackendAddr {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    async fn frontend_with_backends(addrs: &[BackendAddr]) -> Frontend {
        let pool = Arc::new(Vec::<Arc<PoolBackend>>::new());
        let mut frontend = Frontend::new(pool, Arc::new(addrs.to_vec()));
        let mut backends = Vec::new();
        for addr in addrs {
            backends.push(TransactionBackend::dial(addr.clone()).await.unwrap());
        }
        frontend.transaction = Some(backends);
        frontend
    }

    #[tokio::test]
    async fn overall_success_rolls_back_the_dissenting_voter_and_ends_the_transaction() {
        let ok_addr = fake_voter(Response::Ok, false).await;
        let no_addr = fake_voter(Response::Error, true).await;
        let mut frontend = frontend_with_backends(&[ok_addr, no_addr]).await;

        let mut out = Cursor::new(Vec::new());
        handle(&mut out, &mut frontend).await.unwrap();

        assert_eq!(out.into_inner(), vec![Response::Ok.to_byte() as u8]);
        assert!(
            frontend.transaction.is_none(),
            "commit always ends the transaction, win or lose"
        );
    }

    #[tokio::test]
    async fn overall_failure_when_every_backend_votes_no() {
        let no_addr = fake_voter(Response::Error, true).await;
        let mut frontend = frontend_with_backends(&[no_addr]).await;

        let mut out = Cursor::new(Vec::new());
        handle(&mut out, &mut frontend).await.unwrap();

        assert_eq!(out.into_inner(), vec![Response::Error.to_byte() as u8]);
        assert!(frontend.transaction.is_none());
    }

    #[tokio::test]
    async fn no_open_transaction_is_an_immediate_ok() {
        let mut frontend = Frontend::new(Arc::new(Vec::new()), Arc::new(Vec::new()));
        let mut out = Cursor::new(Vec::new());
        handle(&mut out, &mut frontend).await.unwrap();
        assert_eq!(out.into_inner(), vec![Response::Ok.to_byte() as u8]);
    }

    #[tokio::test]
    async fn empty_backend_list_is_a_failure_that_clears_the_transaction() {
        let mut frontend = Frontend::new(Arc::new(Vec::new()), Arc::new(Vec::new()));
        frontend.transaction = Some(Vec::new());

        let mut out = Cursor::new(Vec::new());
        handle(&mut out, &mut frontend).await.unwrap();

        assert_eq!(out.into_inner(), vec![Response::Error.to_byte() as u8]);
        assert!(frontend.transaction.is_none());
    }
}
