mod cli;
mod config;
mod error;
mod exec;
mod k8s;
mod model;
mod routes;

use anyhow::{Context, Result};
use clap::Parser;
use cli::CliArgs;
use config::{ConfigHandle, ConfigWatcher};
use k8s::ClusterClient;
use routes::AppState;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter)?;

    let mut watcher = ConfigWatcher::discover(args.config.clone());
    let config = ConfigHandle::new(watcher.load_current());
    info!(
        "excluding namespaces: {}",
        config.snapshot().exclude_namespaces.join(", ")
    );
    let _watcher_task = config::spawn_watcher(config.clone(), watcher);

    let cluster = ClusterClient::connect().await?;
    let state = Arc::new(AppState { cluster, config });
    let router = routes::create_router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {addr}");
    axum::serve(listener, router)
        .await
        .context("server terminated")?;

    Ok(())
}

fn init_tracing(level_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();

    Ok(())
}
