//! Command-line argument parsing

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use netfs_common::DEFAULT_PORT;

/// netfs storage server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a single storage root, configured entirely from flags
    Serve {
        /// IP address to bind to (IPv4 or IPv6)
        #[arg(long, default_value = "0.0.0.0")]
        host: IpAddr,

        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Storage root directory
        folder: PathBuf,

        /// Enable debug logging (request tracing, connection lifecycle)
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
    /// Serve one or more storage roots described by a config file
    ServeConf {
        /// Path to the config file
        config: PathBuf,

        /// Which `[server]` or `[server-<name>]` section to use
        #[arg(long, default_value = "server")]
        section: String,

        /// Enable debug logging (request tracing, connection lifecycle)
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
}
