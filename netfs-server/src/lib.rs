//! netfs storage server
//!
//! Implements the server half of the netfs wire protocol: exclusive-create
//! staged uploads, a two-phase prepare/commit/rollback transaction per
//! connection, and content-addressed downloads. See [`connection`] for the
//! per-connection dispatch loop and [`transaction`] for the upload/commit
//! state machine.

pub mod connection;
pub mod paths;
pub mod transaction;

use std::io;
use std::net::IpAddr;
use std::path::PathBuf;

use netfs_common::config::{ConfigError, IniFile};
use tokio::net::TcpListener;

/// Accept connections on `listener` forever, spawning one task per
/// connection against the given storage `root`.
///
/// Returns only if `listener.accept()` itself fails, which generally means
/// the listening socket was closed out from under it.
pub async fn serve(listener: TcpListener, root: PathBuf, debug: bool) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        if debug {
            eprintln!("netfsd: accepted {peer}");
        }
        let root = root.clone();
        tokio::spawn(async move {
            connection::handle_connection(stream, root, debug).await;
        });
    }
}

/// The bind address, port, and storage root for one `[server]` (or
/// `[server-<name>]`) section of a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub folder: PathBuf,
}

/// Read a server's settings out of a parsed config file section.
///
/// `host` and `port` fall back to `0.0.0.0` and [`netfs_common::DEFAULT_PORT`]
/// respectively; `folder` is required.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the section is missing, `folder` is unset,
/// or `host`/`port` are present but don't parse.
pub fn server_config_from_ini(ini: &IniFile, section: &str) -> Result<ServerConfig, ConfigError> {
    let folder = ini.get(section, "folder")?;
    let host = ini.get_or(section, "host", "0.0.0.0");
    let port = ini.get_or(section, "port", "");
    let port: u16 = if port.is_empty() {
        netfs_common::DEFAULT_PORT
    } else {
        port.parse().map_err(|_| ConfigError::MissingKey {
            section: section.to_string(),
            key: "port".to_string(),
        })?
    };
    let host: IpAddr = host.parse().map_err(|_| ConfigError::MissingKey {
        section: section.to_string(),
        key: "host".to_string(),
    })?;

    Ok(ServerConfig {
        host,
        port,
        folder: PathBuf::from(folder),
    })
}
