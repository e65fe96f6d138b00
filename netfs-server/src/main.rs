//! netfs storage server entry point

mod args;

use std::net::SocketAddr;
use std::path::Path;

use clap::Parser;
use tokio::net::TcpListener;

use args::{Args, Command};
use netfs_server::{ServerConfig, server_config_from_ini};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let (config, debug) = match args.command {
        Command::Serve {
            host,
            port,
            folder,
            debug,
        } => (ServerConfig { host, port, folder }, debug),
        Command::ServeConf {
            config,
            section,
            debug,
        } => {
            let text = match std::fs::read_to_string(&config) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("netfsd: reading {}: {e}", config.display());
                    std::process::exit(1);
                }
            };
            let ini = match netfs_common::config::IniFile::parse(&text) {
                Ok(ini) => ini,
                Err(e) => {
                    eprintln!("netfsd: parsing {}: {e}", config.display());
                    std::process::exit(1);
                }
            };
            match server_config_from_ini(&ini, &section) {
                Ok(cfg) => (cfg, debug),
                Err(e) => {
                    eprintln!("netfsd: {}: {e}", config.display());
                    std::process::exit(1);
                }
            }
        }
    };

    let root = match init_storage_root(&config.folder) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("netfsd: storage root {}: {e}", config.folder.display());
            std::process::exit(1);
        }
    };

    let addr = SocketAddr::new(config.host, config.port);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("netfsd: binding {addr}: {e}");
            std::process::exit(1);
        }
    };
    println!("netfsd: listening on {addr}, serving {}", root.display());

    tokio::select! {
        result = netfs_server::serve(listener, root, debug) => {
            if let Err(e) = result {
                eprintln!("netfsd: accept loop failed: {e}");
                std::process::exit(1);
            }
        }
        () = shutdown_signal() => {
            println!("netfsd: shutting down");
        }
    }
}

/// Create the storage root if it doesn't exist and canonicalize it, so every
/// later containment check has a stable absolute path to compare against.
fn init_storage_root(folder: &Path) -> std::io::Result<std::path::PathBuf> {
    std::fs::create_dir_all(folder)?;
    folder.canonicalize()
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
    }
}
