//! Neural network playground server.
//!
//! Run with: cargo run -p playground-server
//!
//! Training progress is streamed over `ws://<addr>/ws`.

mod config;

use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use clap::Parser;
use playground_core::DatasetStore;
use playground_session::{
    ModelService, Orchestrator,
    storage::{MemoryDatasetStore, MemoryModelStore},
};
use playground_trainer::DenseTrainer;
use playground_transport::{AppState, router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn cors(client_url: Option<&str>) -> anyhow::Result<CorsLayer> {
    let Some(origin) = client_url else {
        return Ok(CorsLayer::permissive());
    };
    let origin: HeaderValue = origin
        .parse()
        .with_context(|| format!("invalid CLIENT_URL: {origin}"))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any))
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Failed to register SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received Ctrl+C");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);

    let datasets: Arc<dyn DatasetStore> = Arc::new(MemoryDatasetStore::new());
    let models = Arc::new(MemoryModelStore::new());
    let trainer = Arc::new(DenseTrainer::new());

    let orchestrator = Orchestrator::new(
        Arc::clone(&datasets),
        models.clone(),
        trainer.clone(),
        config.orchestrator(),
    );
    let state = AppState::new(
        orchestrator.clone(),
        ModelService::new(models, trainer),
        datasets,
    );

    let app = router(state)
        .layer(cors(config.client_url.as_deref())?)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    tracing::info!(
        session_timeout_secs = config.session_timeout_secs,
        "Server listening on http://{}",
        config.addr
    );

    let shutdown = orchestrator.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let ended = shutdown.shutdown();
            tracing::info!(sessions = ended, "Shutting down");
        })
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}
