//! PIM sync daemon entry point
//!
//! Reads change events (one JSON object per line) from stdin until end of
//! input or a shutdown signal. `--dry-run` writes into an in-process cluster
//! instead of the configured one.

use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use pim_sync_config::{load_settings, Settings};
use pim_sync_persistence::{init, init_with_connector, InMemoryCluster, PersistenceError, PersistenceLayer};
use pim_sync_server::{apply_header_file, init_metrics, run_feed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env} > config/default > defaults
    let env = std::env::var("PIM_SYNC_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing is not up yet
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        },
    };
    let dry_run = std::env::args().skip(1).any(|arg| arg == "--dry-run");

    init_tracing(&config);
    tracing::info!("Starting PIM sync v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?config.environment,
        config_path = env.as_deref().unwrap_or("default"),
        dry_run,
        "Configuration loaded"
    );

    if let Some(port) = config.observability.metrics_port {
        if let Err(e) = init_metrics(port) {
            tracing::warn!(error = %e, "Metrics exporter disabled");
        }
    }

    let storage = match init_storage(&config, dry_run).await {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!(
                hosts = ?config.cluster.hosts(),
                keyspace = %config.cluster.keyspace_name(),
                error = %e,
                fatal = e.is_fatal(),
                "Failed to initialize storage engine"
            );
            std::process::exit(1);
        },
    };

    if let Some(path) = &config.sync.schema_headers_path {
        apply_header_file(&storage.evolver, Path::new(path)).await?;
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::select! {
        stats = run_feed(&storage.evolver, stdin) => {
            let stats = stats?;
            tracing::info!(applied = stats.applied, failed = stats.failed, rejected = stats.rejected, "Input exhausted");
        }
        _ = shutdown_signal() => {}
    }

    storage.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn init_storage(config: &Settings, dry_run: bool) -> Result<PersistenceLayer, PersistenceError> {
    if dry_run {
        tracing::warn!("Dry run: writing into an in-process cluster");
        let cluster = InMemoryCluster::new();
        return init_with_connector(config.cluster.clone(), config.sync.clone(), Arc::new(cluster)).await;
    }
    init(config.cluster.clone(), config.sync.clone()).await
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("pim_sync={level},pim_sync_persistence={level},pim_sync_server={level},scylla=warn").into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    // Logs go to stderr; stdin carries the feed
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };
    subscriber.with(fmt_layer).init();
}
