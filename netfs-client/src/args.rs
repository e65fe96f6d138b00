//! Command-line argument parsing

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use netfs_common::DEFAULT_PORT;

/// netfs client: upload to or download from a storage server or proxy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload a local file and commit it
    Upload {
        /// Server or proxy address to connect to
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port to connect to
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Local file to upload
        source: PathBuf,

        /// Remote path to store it under
        path: String,

        /// Move (instead of copy) the source into the local cache first
        #[arg(long, default_value_t = false)]
        r#move: bool,

        /// Local cache directory
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
    /// Download a file, reusing an already-cached copy if present
    Download {
        /// Server or proxy address to connect to
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port to connect to
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Remote path to fetch
        path: String,

        /// Where to write the downloaded file; defaults to printing the
        /// cache path
        #[arg(long)]
        out: Option<PathBuf>,

        /// Local cache directory
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
}
