//! # turbo-watch
//!
//! Subscribes to one location of a Turbo store and logs every event until
//! interrupted.
//!
//! ```text
//! turbo-watch --url ws://localhost:4000/ws --path /rooms/lobby --event child_added
//! ```
//!
//! Without `--url` the store URL comes from `client.toml` / `TURBO_URL`.
//! `RUST_LOG` controls the log level (default `info`).

use std::env;
use std::path::PathBuf;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use turbo_sync::{Client, ClientConfig, ConnectionState, ListenOptions, Snapshot};

struct Options {
    url: Option<String>,
    path: String,
    event: String,
    config: Option<PathBuf>,
    credential: Option<String>,
}

fn print_usage() {
    println!("Turbo store watcher");
    println!();
    println!("Usage: turbo-watch [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -u, --url <URL>        Store URL (default: from config)");
    println!("  -p, --path <PATH>      Location to watch (default: /)");
    println!("  -e, --event <KIND>     value | child_added | child_changed | child_removed (default: value)");
    println!("  -c, --config <FILE>    Config file path");
    println!("  -a, --auth <CRED>      Authenticate before watching");
    println!("  -h, --help             Show this help message");
}

/// Returns `None` when only help was requested.
fn parse_args() -> Option<Options> {
    let args: Vec<String> = env::args().collect();
    let mut options = Options {
        url: None,
        path: "/".to_string(),
        event: "value".to_string(),
        config: None,
        credential: None,
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match args[i].as_str() {
            "--url" | "-u" => options.url = value,
            "--path" | "-p" => options.path = value.unwrap_or(options.path),
            "--event" | "-e" => options.event = value.unwrap_or(options.event),
            "--config" | "-c" => options.config = value.map(PathBuf::from),
            "--auth" | "-a" => options.credential = value,
            "--help" | "-h" => {
                print_usage();
                return None;
            }
            other => {
                warn!(arg = %other, "Ignoring unknown argument");
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    Some(options)
}

fn log_snapshot(kind: &str, snap: &Snapshot) {
    info!(
        event = kind,
        path = %snap.path(),
        children = snap.num_children(),
        value = %snap.val(),
        "Event"
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Some(options) = parse_args() else {
        return Ok(());
    };

    let mut config = ClientConfig::load_or_default(options.config);
    if let Some(url) = options.url {
        config.server.url = url;
    }
    config.validate()?;

    let root = Client::connect(config)?;
    root.go_online()?;
    let target = root.child(&options.path)?;
    info!(url = %root.url(), path = %target, event = %options.event, "Watching");

    if let Some(credential) = options.credential {
        root.auth(credential)?.await?;
    }

    let kind = options.event.clone();
    let cancel = ListenOptions::new().on_cancel(|err| {
        error!(%err, "Subscription cancelled by the store");
    });
    target.on_with(
        &options.event,
        std::sync::Arc::new(move |snap: &Snapshot| log_snapshot(&kind, snap)),
        cancel,
    )?;

    let mut states = root.connection().watch_state();
    if root.state() == ConnectionState::Offline {
        warn!("Could not reach the store");
        return Ok(());
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                if state == ConnectionState::Offline {
                    warn!("Connection to the store lost");
                    break;
                }
                info!(%state, "Connection state changed");
            }
        }
    }

    root.go_offline();
    info!("Watcher stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(?e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(?e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
