use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::cli::{Cli, Commands};

mod audio_output;
mod change_bus;
mod cli;
mod config;
mod coordinator;
mod decoder;
mod dispatch;
mod error;
mod library;
mod probe;
mod protocol;
mod queue;
mod session;
mod stream_sequence;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install().unwrap();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve {
        address: "127.0.0.1:6601".into(),
        config: None,
        log_level: "info".into(),
    });

    match command {
        Commands::Serve { address, config: config_path, log_level } => {
            setup_tracing(&log_level);
            serve(address, config_path.unwrap_or_else(config::default_config_path)).await
        }
        Commands::Ls { path, config: config_path } => {
            ls(&path, config_path.unwrap_or_else(config::default_config_path))
        }
        Commands::Probe { path } => probe_file(&path),
    }
}

async fn serve(address: String, config_path: camino::Utf8PathBuf) -> Result<()> {
    let cfg = config::load_from_file(&config_path)?;
    let registry = Arc::new(config::build_registry(&cfg)?);
    registry.ping().wrap_err("library ping failed at startup")?;

    let changes = Arc::new(change_bus::ChangeBus::new());
    let state_path = config::default_state_path();
    let coordinator = coordinator::Coordinator::new(registry, changes.clone(), state_path);
    coordinator
        .load_state()
        .await
        .wrap_err("failed to load save state")?;

    let listener = TcpListener::bind(&address)
        .await
        .wrap_err_with(|| format!("binding {address}"))?;
    info!(%address, "moped listening");

    let accept_coordinator = coordinator.clone();
    let accept_changes = changes.clone();
    let acceptor = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    let coordinator = accept_coordinator.clone();
                    let changes = accept_changes.clone();
                    tokio::spawn(session::run(stream, coordinator, changes));
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                }
            }
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutting down");
    acceptor.abort();
    coordinator.shutdown().await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn ls(path: &str, config_path: camino::Utf8PathBuf) -> Result<()> {
    let cfg = config::load_from_file(&config_path)?;
    let registry = config::build_registry(&cfg)?;
    let mut entries = registry.browse(path).map_err(|e| color_eyre::eyre::eyre!("{e}"))?;
    library::sort_entries(&mut entries);
    for entry in entries {
        println!("{}", entry.full_path());
    }
    Ok(())
}

fn probe_file(path: &camino::Utf8PathBuf) -> Result<()> {
    let result = probe::probe_path(path).map_err(|e| color_eyre::eyre::eyre!("{e}"))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub fn setup_tracing(log_level: &str) {
    use tracing_subscriber::filter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter::EnvFilter::new(log_level));
    let fmt = fmt::layer().pretty().with_line_number(true);

    let _ignore_err = tracing_subscriber::registry().with(fmt).with(filter).try_init();
}
