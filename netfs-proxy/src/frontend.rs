//! Per-client-connection proxy state
//!
//! Each accepted frontend connection owns one [`Frontend`]: a shared view of
//! the long-lived backend pool (for downloads) plus whatever
//! [`TransactionBackend`]s it has dialed for its current write-transaction.
//!
//! The original `OperationMeta` metaclass wrapped every operation so any
//! exception tore down the frontend connection. Rust has no metaclasses;
//! the equivalent here is that every `handle_*` function in [`crate::operation`]
//! returns `io::Result<()>`, and the connection's dispatch loop ends the
//! connection on the first `Err` with `?`, so one bad operation still kills
//! the connection the same way.

use std::io;
use std::sync::Arc;

use netfs_common::protocol::{self, Request};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::backend::{BackendAddr, PoolBackend, TransactionBackend};

pub struct Frontend {
    pub pool: Arc<Vec<Arc<PoolBackend>>>,
    pub backend_addrs: Arc<Vec<BackendAddr>>,
    /// `None`: no transaction opened yet on this connection. `Some(vec)`:
    /// a transaction is open (possibly with an empty `vec`, meaning every
    /// backend has already dropped out of it).
    pub transaction: Option<Vec<TransactionBackend>>,
}

impl Frontend {
    pub fn new(pool: Arc<Vec<Arc<PoolBackend>>>, backend_addrs: Arc<Vec<BackendAddr>>) -> Self {
        Self {
            pool,
            backend_addrs,
            transaction: None,
        }
    }

    /// Dial one transaction backend per configured address if a transaction
    /// isn't already open. Backends that fail to dial are simply absent
    /// from the resulting list.
    pub async fn ensure_transaction(&mut self) {
        if self.transaction.is_none() {
            let mut backends = Vec::with_capacity(self.backend_addrs.len());
            for addr in self.backend_addrs.iter() {
                if let Ok(tb) = TransactionBackend::dial(addr.clone()).await {
                    backends.push(tb);
                }
            }
            self.transaction = Some(backends);
        }
    }

    /// Number of backends still participating in the open transaction.
    /// `0` both when the transaction is `None` and when it has drained to
    /// an empty `Vec`; callers that need to tell those apart check
    /// `self.transaction.is_none()` directly.
    pub fn active_len(&self) -> usize {
        self.transaction.as_ref().map_or(0, Vec::len)
    }

    /// Write `frame` to every backend still in the transaction via
    /// `write_fn`, in order. Returns a per-backend success mask; a write
    /// failure does not stop the pass over the remaining backends.
    pub async fn distribute<F, Fut>(&mut self, mut write_fn: F) -> Vec<bool>
    where
        F: FnMut(usize, &mut TcpStream) -> Fut,
        Fut: std::future::Future<Output = io::Result<()>>,
    {
        let mut alive = Vec::new();
        if let Some(backends) = self.transaction.as_mut() {
            for (i, tb) in backends.iter_mut().enumerate() {
                let result = write_fn(i, &mut tb.stream).await;
                alive.push(result.is_ok());
            }
        }
        alive
    }

    /// Read one response byte from each backend still in the transaction.
    /// A backend that errors or sends something other than OK counts as a
    /// "no" vote, same as a write failure does in [`Frontend::distribute`].
    pub async fn read_votes(&mut self) -> Vec<bool> {
        let mut votes = Vec::new();
        if let Some(backends) = self.transaction.as_mut() {
            for tb in backends.iter_mut() {
                let ok = protocol::read_response(&mut tb.stream)
                    .await
                    .map(|r| r.is_ok())
                    .unwrap_or(false);
                votes.push(ok);
            }
        }
        votes
    }

    /// Drop every backend whose slot in `alive` is `false`: send it a
    /// best-effort rollback and close its socket. Backends that stay alive
    /// keep their relative order.
    pub async fn retain(&mut self, alive: &[bool]) {
        if let Some(backends) = self.transaction.take() {
            let mut kept = Vec::new();
            for (i, tb) in backends.into_iter().enumerate() {
                if alive.get(i).copied().unwrap_or(false) {
                    kept.push(tb);
                } else {
                    rollback_and_close(tb).await;
                }
            }
            self.transaction = Some(kept);
        }
    }

    /// End the transaction: roll back and close every remaining backend.
    pub async fn abandon_transaction(&mut self) {
        if let Some(backends) = self.transaction.take() {
            for tb in backends {
                rollback_and_close(tb).await;
            }
        }
    }

    /// End the transaction without sending a rollback, e.g. right after a
    /// commit has already settled every surviving backend.
    pub async fn close_transaction(&mut self) {
        if let Some(backends) = self.transaction.take() {
            for tb in backends {
                tb.close().await;
            }
        }
    }
}

async fn rollback_and_close(mut tb: TransactionBackend) {
    let _ = protocol::write_request(&mut tb.stream, Request::Rollback).await;
    let _ = tb.stream.flush().await;
    tb.close().await;
}

pub fn protocol_io_error(e: protocol::ProtocolError) -> io::Error {
    match e {
        protocol::ProtocolError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}
