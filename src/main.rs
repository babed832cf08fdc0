mod auth;
mod config;
mod error;
mod network;
mod session;

use std::io;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::info;

use crate::config::{Cli, Invocation};
use crate::network::observer::ConnectivityWatcher;
use crate::network::NmStation;
use crate::session::{completion_line, Orchestrator, RETRY_INTERVAL};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    color_eyre::install().ok();
    init_logging(&cli.log);

    if cli.clear_device_admin {
        auth::clear_device_owner()?;
        return Ok(());
    }

    let invocation = match config::validate(&cli) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("{}", config::usage());
            std::process::exit(2);
        }
    };

    if let Invocation::Connect { target } = &invocation {
        info!("Trying to join:");
        info!("SSID: {}", target.ssid);
        if let Some(password) = &target.password {
            info!("Password type: {}", target.security);
            info!("Password: {}", password);
        }
    }

    // Connect to NetworkManager
    let station = match NmStation::new().await {
        Ok(station) => Arc::new(station),
        Err(e) => {
            eprintln!("Failed to connect to NetworkManager D-Bus: {}", e);
            eprintln!("Is NetworkManager running? Try: systemctl status NetworkManager");
            std::process::exit(1);
        }
    };

    if !station.is_running().await {
        eprintln!("NetworkManager is not running.");
        eprintln!("Start it with: sudo systemctl start NetworkManager");
        std::process::exit(1);
    }

    let orchestrator = Orchestrator::new(
        station.clone(),
        station.clone(),
        auth::caller_identity(),
        auth::is_device_owner(),
        RETRY_INTERVAL,
    );

    let result = match &invocation {
        Invocation::Disconnect => orchestrator.disconnect().await,
        Invocation::Connect { target } => {
            // The subscription is scoped to the session: registered here,
            // torn down exactly once whatever the outcome.
            let (watcher, events) = ConnectivityWatcher::spawn(station.bus().clone());
            let result = orchestrator.join(target, events).await;
            watcher.unsubscribe().await;
            result
        }
    };

    match result {
        Ok(outcome) => {
            // stdout carries only the completion signal; everything else
            // goes to stderr or the log file.
            println!("{}", completion_line(&cli.uniq, &outcome));
            Ok(())
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

/// Initialize tracing to stderr, or to a log file when requested
fn init_logging(log_path: &Option<String>) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(ref path) = log_path {
        let file = std::fs::File::create(path).expect("Failed to create log file");
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
}
