//! Command-line argument parsing

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use netfs_common::DEFAULT_PORT;

/// netfs fan-out proxy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a proxy, configured entirely from flags
    Proxy {
        /// IP address to bind to (IPv4 or IPv6)
        #[arg(long, default_value = "0.0.0.0")]
        host: IpAddr,

        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Comma-separated `host:port` list of storage-server backends
        #[arg(long, value_delimiter = ',')]
        backends: Vec<String>,

        /// Enable debug logging (request tracing, connection lifecycle)
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
    /// Run a proxy described by a config file's `[proxy]` section
    ProxyConf {
        /// Path to the config file
        config: PathBuf,

        /// Which `[proxy]` or `[proxy-<name>]` section to use
        #[arg(long, default_value = "proxy")]
        section: String,

        /// Enable debug logging (request tracing, connection lifecycle)
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
}
