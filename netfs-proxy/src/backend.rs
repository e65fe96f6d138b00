//! Connections to storage-server backends
//!
//! A proxy talks to backends in two different shapes:
//!
//! - A [`Pool`] of long-lived connections, auto-reconnecting every two
//!   seconds, shared across every frontend connection and used only for
//!   downloads (reads need no transaction).
//! - A fresh [`TransactionBackend`] dialed per write-transaction, one per
//!   backend, held for the lifetime of that one client transaction and then
//!   torn down with a real socket shutdown rather than a silent drop — see
//!   DESIGN.md for why.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// A backend's address, shared between the pool and per-transaction dialing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAddr {
    pub host: String,
    pub port: u16,
}

impl BackendAddr {
    pub async fn dial(&self) -> std::io::Result<TcpStream> {
        TcpStream::connect((self.host.as_str(), self.port)).await
    }
}

impl std::fmt::Display for BackendAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One long-lived pool connection. Reads are exclusive: a download takes
/// the stream out of the slot for the duration of its request and either
/// returns it when done or drops it, leaving the slot empty for the
/// reconnect loop to refill.
pub struct PoolBackend {
    pub addr: BackendAddr,
    slot: Mutex<Option<TcpStream>>,
}

impl PoolBackend {
    pub fn spawn(addr: BackendAddr) -> Arc<Self> {
        let backend = Arc::new(Self {
            addr,
            slot: Mutex::new(None),
        });
        tokio::spawn(reconnect_loop(backend.clone()));
        backend
    }

    /// Take the live connection, if any, leaving the slot empty until it is
    /// returned or the reconnect loop refills it.
    pub async fn take(&self) -> Option<TcpStream> {
        self.slot.lock().await.take()
    }

    /// Return a still-good connection for reuse by a later download.
    pub async fn give_back(&self, stream: TcpStream) {
        *self.slot.lock().await = Some(stream);
    }
}

async fn reconnect_loop(backend: Arc<PoolBackend>) {
    loop {
        {
            let mut slot = backend.slot.lock().await;
            if slot.is_none() {
                if let Ok(stream) = backend.addr.dial().await {
                    *slot = Some(stream);
                }
            }
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

/// One per-transaction backend connection, dialed fresh when a client's
/// first write-operation opens a transaction and dropped at commit or
/// rollback.
pub struct TransactionBackend {
    pub addr: BackendAddr,
    pub stream: TcpStream,
}

impl TransactionBackend {
    pub async fn dial(addr: BackendAddr) -> std::io::Result<Self> {
        let stream = addr.dial().await?;
        Ok(Self { addr, stream })
    }

    /// Shut the connection down instead of silently dropping it, since the
    /// storage server treats a closed connection as an implicit rollback
    /// (spec Invariant 4) and we want that to happen promptly rather than
    /// whenever the OS notices the fd is gone.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}
