//! Almanac server binary.

use almanac_core::config::AppConfig;
use almanac_server::{AppState, create_router};
use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Almanac - a date-keyed image cache for NASA's Astronomy Picture of the Day
#[derive(Parser, Debug)]
#[command(name = "almanacd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "ALMANAC_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Almanac v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional; defaults and ALMANAC_* env vars cover everything.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::info!(
            config_path = %args.config,
            "No config file found, using defaults and environment"
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("ALMANAC_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    if config.server.metrics_enabled {
        almanac_server::metrics::register_metrics();
        tracing::info!("Prometheus metrics registered");
    }

    let blobs = almanac_storage::from_config(&config.storage)
        .await
        .context("failed to initialize blob store")?;
    // Fail fast instead of reporting healthy while storage is unreachable.
    blobs
        .health_check()
        .await
        .context("blob store health check failed")?;
    tracing::info!(backend = blobs.backend_name(), "Blob store connectivity verified");

    let records = almanac_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize record store")?;
    records
        .health_check()
        .await
        .context("record store health check failed")?;
    tracing::info!("Record store initialized");

    let source = almanac_source::from_config(&config.source)
        .context("failed to initialize artifact source")?;

    let state = AppState::new(config.clone(), records, blobs, source);

    // Pending rows left by a crashed process would otherwise block their
    // dates until every waiter times out.
    let released = state
        .cache
        .release_stale_claims()
        .await
        .context("failed to release stale claims")?;
    tracing::info!(released, "Stale claims recovered");

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    tracing::info!("Listening on {}", addr);

    let shutdown = CancellationToken::new();
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    });
    let mut server_task = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut server_task => {
            result.context("server task panicked")?.context("server error")?;
            return Ok(());
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, draining connections");
        }
    }

    shutdown.cancel();
    let grace = config.server.shutdown_grace();
    match tokio::time::timeout(grace, server_task).await {
        Ok(result) => result.context("server task panicked")?.context("server error")?,
        Err(_) => tracing::warn!(
            grace_secs = grace.as_secs(),
            "Grace period elapsed, dropping remaining connections"
        ),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
