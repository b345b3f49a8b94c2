use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use decoyd::config;
use decoyd::registry::ServiceRegistry;
use decoyd::services::redis::RedisService;
use decoyd::services::ssh::SshService;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "decoyd", about = "Multi-protocol deception server")]
struct Cli {
    /// Path to the YAML configuration file.  The embedded default
    /// configuration is used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated list of services to start; all registered services
    /// start when omitted.
    #[arg(short, long, value_delimiter = ',')]
    services: Vec<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Tracing ----
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // ---- Config ----
    let config = config::load_config(cli.config.as_deref())?;
    let config = Arc::new(config);

    tracing::info!(
        config_path = ?cli.config,
        ssh_port = config.ssh.port,
        redis_port = config.redis.port,
        "starting decoyd"
    );

    // ---- Service registry ----
    let registry = ServiceRegistry::new(Arc::clone(&config));
    registry.add_service(Arc::new(SshService::new())).await;
    registry.add_service(Arc::new(RedisService::new())).await;

    let started: Vec<String> = if cli.services.is_empty() {
        let names = registry.service_names().await;
        registry.start_all_services().await?;
        names
    } else {
        for name in &cli.services {
            registry.start_service_by_name(name).await?;
        }
        cli.services.iter().map(|s| s.to_lowercase()).collect()
    };

    tracing::info!(services = ?started, "all services started");

    // ---- Await shutdown ----
    shutdown_signal().await;

    for name in &started {
        if let Err(e) = registry.stop_service_by_name(name).await {
            tracing::error!(error = %e, service = %name, "failed to stop service");
        }
    }

    tracing::info!("decoyd shut down cleanly");
    Ok(())
}
