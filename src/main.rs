//! LanLink - tunnel TCP services across a LAN
//!
//! Loads the configuration snapshot, starts one listener per needed
//! service on the client side and, when configured, the dispatcher and
//! discovery responder on the server side, then runs until ctrl-c.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lanlink_client::{ConnectionManager, MonitorRegistry};
use lanlink_proto::Config;
use lanlink_server::{DiscoveryResponder, DispatcherConfig, ResponderConfig, ServiceDispatcher};

/// LanLink - tunnel TCP services across a LAN with broadcast discovery
#[derive(Parser, Debug)]
#[command(name = "lanlink")]
#[command(about = "Tunnel TCP services across a LAN with broadcast discovery")]
#[command(version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "lanlink.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .with(fmt::layer())
        .init();

    let raw = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("failed to read config file {}", cli.config.display()))?;
    let config: Config = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", cli.config.display()))?;

    let registry = MonitorRegistry::new();
    let manager = ConnectionManager::new(registry);
    manager
        .start_from_config(&config.client)
        .await
        .context("failed to start client connections")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server_tasks = Vec::new();

    if let Some(server) = &config.server {
        let dispatcher = ServiceDispatcher::new(DispatcherConfig::default(), server)
            .context("invalid server configuration")?;
        let dispatcher_shutdown = shutdown_rx.clone();
        server_tasks.push(tokio::spawn(async move {
            if let Err(e) = dispatcher.run(dispatcher_shutdown).await {
                error!(error = %e, "dispatcher failed");
            }
        }));

        let responder = DiscoveryResponder::new(ResponderConfig::default(), server);
        let responder_shutdown = shutdown_rx.clone();
        server_tasks.push(tokio::spawn(async move {
            if let Err(e) = responder.run(responder_shutdown).await {
                error!(error = %e, "discovery responder failed");
            }
        }));
    }

    info!("lanlink started, press ctrl-c to stop");
    signal::ctrl_c().await.context("failed to listen for ctrl-c")?;

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    manager.stop_all().await;
    for task in server_tasks {
        let _ = task.await;
    }

    Ok(())
}
