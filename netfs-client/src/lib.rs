//! Client connection library for the netfs distributed file service
//!
//! Unlike the server and proxy, which are single-logical-thread `tokio`
//! event loops, this crate is meant to be linked into ordinary, possibly
//! multithreaded application code: its connection type does blocking socket
//! I/O and exposes plain `&mut self` methods rather than `async fn`s.

pub mod cache;
pub mod connection;
pub mod error;
pub mod transaction;
pub mod wire;

pub use cache::Cache;
pub use connection::{NetfsConnection, UploadSource};
pub use error::{ClientError, DownloadFailure};
pub use transaction::{JoinState, TwoPhaseParticipant};
