//! Per-opcode proxy operations
//!
//! Each submodule fans one client request out across the backends the
//! proxy currently knows about, one module per opcode.

pub mod commit;
pub mod download;
pub mod prepare;
pub mod upload;

use tokio::io::{AsyncRead, AsyncWrite};

use netfs_common::protocol::{self, Request};

use crate::frontend::{Frontend, protocol_io_error};

/// Read one request and dispatch it. Returns `Ok(false)` on a clean client
/// disconnect at a frame boundary, `Ok(true)` otherwise.
pub async fn dispatch<R, W>(
    reader: &mut R,
    writer: &mut W,
    frontend: &mut Frontend,
) -> std::io::Result<bool>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = match protocol::read_request(reader).await {
        Ok(r) => r,
        Err(protocol::ProtocolError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(false);
        }
        Err(e) => return Err(protocol_io_error(e)),
    };

    match request {
        Request::Upload => upload::handle(reader, writer, frontend).await?,
        Request::Prepare => prepare::handle(writer, frontend).await?,
        Request::Commit => commit::handle(writer, frontend).await?,
        Request::Rollback => frontend.abandon_transaction().await,
        Request::Download => download::handle(reader, writer, frontend).await?,
    }
    Ok(true)
}
