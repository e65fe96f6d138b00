//! netfs fan-out proxy entry point

mod args;

use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;

use args::{Args, Command};
use netfs_proxy::{ProxyConfig, backend::BackendAddr, proxy_config_from_ini, serve, spawn_pool};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let (config, debug) = match args.command {
        Command::Proxy {
            host,
            port,
            backends,
            debug,
        } => {
            let backends = match parse_flag_backends(&backends) {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("netfs-proxy: {e}");
                    std::process::exit(1);
                }
            };
            (ProxyConfig { host, port, backends }, debug)
        }
        Command::ProxyConf {
            config,
            section,
            debug,
        } => {
            let text = match std::fs::read_to_string(&config) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("netfs-proxy: reading {}: {e}", config.display());
                    std::process::exit(1);
                }
            };
            let ini = match netfs_common::config::IniFile::parse(&text) {
                Ok(ini) => ini,
                Err(e) => {
                    eprintln!("netfs-proxy: parsing {}: {e}", config.display());
                    std::process::exit(1);
                }
            };
            match proxy_config_from_ini(&ini, &section) {
                Ok(cfg) => (cfg, debug),
                Err(e) => {
                    eprintln!("netfs-proxy: {}: {e}", config.display());
                    std::process::exit(1);
                }
            }
        }
    };

    if config.backends.is_empty() {
        eprintln!("netfs-proxy: at least one backend is required");
        std::process::exit(1);
    }

    let backend_addrs: Vec<BackendAddr> = config
        .backends
        .iter()
        .map(|(host, port)| BackendAddr {
            host: host.clone(),
            port: *port,
        })
        .collect();
    let backend_addrs = std::sync::Arc::new(backend_addrs);
    let pool = spawn_pool(&backend_addrs);

    let addr = SocketAddr::new(config.host, config.port);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("netfs-proxy: binding {addr}: {e}");
            std::process::exit(1);
        }
    };
    println!(
        "netfs-proxy: listening on {addr}, backends: {}",
        config
            .backends
            .iter()
            .map(|(h, p)| format!("{h}:{p}"))
            .collect::<Vec<_>>()
            .join(", ")
    );

    tokio::select! {
        result = serve(listener, pool, backend_addrs, debug) => {
            if let Err(e) = result {
                eprintln!("netfs-proxy: accept loop failed: {e}");
                std::process::exit(1);
            }
        }
        () = shutdown_signal() => {
            println!("netfs-proxy: shutting down");
        }
    }
}

fn parse_flag_backends(raw: &[String]) -> Result<Vec<(String, u16)>, String> {
    raw.iter()
        .map(|entry| {
            let (host, port) = entry
                .rsplit_once(':')
                .ok_or_else(|| format!("backend '{entry}' is not in host:port form"))?;
            let port: u16 = port
                .parse()
                .map_err(|_| format!("backend '{entry}' has a non-numeric port"))?;
            Ok((host.to_string(), port))
        })
        .collect()
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
