//! netfs fan-out proxy
//!
//! Accepts one client connection per frontend session and transparently
//! multiplexes it into parallel sessions against every configured backend:
//! a write-bearing request opens a per-transaction set of fresh connections
//! (the distributed 2PC side, see [`operation`] and [`frontend`]), while a
//! download picks a random connection out of a persistent pool (the
//! read-failover side, see [`backend::PoolBackend`]).

pub mod backend;
pub mod frontend;
pub mod operation;

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use netfs_common::config::{ConfigError, IniFile, parse_backend_list};
use tokio::io::BufReader;
use tokio::net::TcpListener;

use backend::{BackendAddr, PoolBackend};
use frontend::Frontend;

/// The bind address, port, and backend list for one `[proxy]` section of a
/// config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: IpAddr,
    pub port: u16,
    pub backends: Vec<(String, u16)>,
}

/// Read a proxy's settings out of a parsed config file's `[proxy]` section.
///
/// `host` and `port` fall back to `0.0.0.0` and [`netfs_common::DEFAULT_PORT`];
/// `backends` is required and parsed as a comma-separated `host:port` list.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the section or `backends` key is missing,
/// or if `host`/`port`/`backends` fail to parse.
pub fn proxy_config_from_ini(ini: &IniFile, section: &str) -> Result<ProxyConfig, ConfigError> {
    let backends_raw = ini.get(section, "backends")?;
    let backends = parse_backend_list(backends_raw).map_err(|_| ConfigError::MissingKey {
        section: section.to_string(),
        key: "backends".to_string(),
    })?;

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

    Ok(ProxyConfig { host, port, backends })
}

/// Spin up the long-lived pool backends a proxy process shares across every
/// frontend connection, one auto-reconnecting [`PoolBackend`] per address.
#[must_use]
pub fn spawn_pool(addrs: &[BackendAddr]) -> Arc<Vec<Arc<PoolBackend>>> {
    Arc::new(addrs.iter().cloned().map(PoolBackend::spawn).collect())
}

/// Accept connections on `listener` forever, spawning one frontend task per
/// connection against the shared `pool` and per-transaction `backend_addrs`.
///
/// Returns only if `listener.accept()` itself fails.
pub async fn serve(
    listener: TcpListener,
    pool: Arc<Vec<Arc<PoolBackend>>>,
    backend_addrs: Arc<Vec<BackendAddr>>,
    debug: bool,
) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        if debug {
            eprintln!("netfs-proxy: accepted {peer}");
        }
        let pool = pool.clone();
        let backend_addrs = backend_addrs.clone();
        tokio::spawn(async move {
            handle_frontend(stream, pool, backend_addrs, debug).await;
        });
    }
}

async fn handle_frontend(
    stream: tokio::net::TcpStream,
    pool: Arc<Vec<Arc<PoolBackend>>>,
    backend_addrs: Arc<Vec<BackendAddr>>,
    debug: bool,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    stream.set_nodelay(true).ok();
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut writer = writer;
    let mut frontend = Frontend::new(pool, backend_addrs);

    loop {
        match operation::dispatch(&mut reader, &mut writer, &mut frontend).await {
            Ok(true) => continue,
            Ok(false) => {
                if debug {
                    eprintln!("netfs-proxy: {peer} disconnected");
                }
                break;
            }
            Err(e) => {
                if debug {
                    eprintln!("netfs-proxy: {peer} closed with error: {e}");
                }
                break;
            }
        }
    }

    frontend.abandon_transaction().await;
}
