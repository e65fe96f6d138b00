//! netfs client CLI entry point
//!
//! Deliberately not `#[tokio::main]`: the connection type does blocking
//! socket I/O, so this binary is an ordinary synchronous `fn main`.

mod args;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use args::{Args, Command};
use netfs_client::{NetfsConnection, UploadSource};

fn main() {
    let args = Args::parse();

    match args.command {
        Command::Upload {
            host,
            port,
            source,
            path,
            r#move,
            cache,
            debug,
        } => upload(SocketAddr::new(host, port), &source, &path, r#move, cache_dir(cache), debug),
        Command::Download {
            host,
            port,
            path,
            out,
            cache,
            debug,
        } => download(SocketAddr::new(host, port), &path, out, cache_dir(cache), debug),
    }
}

fn upload(addr: SocketAddr, source: &std::path::Path, path: &str, move_file: bool, cache: PathBuf, debug: bool) {
    if debug {
        eprintln!("netfs: connecting to {addr}");
    }
    let mut conn = match NetfsConnection::connect(addr, cache) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("netfs: connecting to {addr}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = conn.put(path, UploadSource::Path(source), move_file) {
        eprintln!("netfs: uploading {path}: {e}");
        std::process::exit(1);
    }
    if let Err(e) = conn.commit() {
        eprintln!("netfs: committing {path}: {e}");
        std::process::exit(1);
    }
    println!("netfs: uploaded {path}");
}

fn download(addr: SocketAddr, path: &str, out: Option<PathBuf>, cache: PathBuf, debug: bool) {
    if debug {
        eprintln!("netfs: connecting to {addr}");
    }
    let mut conn = match NetfsConnection::connect(addr, cache) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("netfs: connecting to {addr}: {e}");
            std::process::exit(1);
        }
    };

    let cached = match conn.get(path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("netfs: downloading {path}: {e}");
            std::process::exit(1);
        }
    };

    match out {
        Some(dest) => {
            if let Err(e) = std::fs::copy(&cached, &dest) {
                eprintln!("netfs: writing {}: {e}", dest.display());
                std::process::exit(1);
            }
            println!("netfs: wrote {}", dest.display());
        }
        None => println!("{}", cached.display()),
    }
}

fn cache_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("netfs")
    })
}
