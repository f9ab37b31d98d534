mod config;
mod error;
mod pipeline;
mod resolver;
mod routes;
mod sanitize;
mod selector;
#[cfg(test)]
mod test_support;
mod validate;
mod ytdlp;

use std::sync::Arc;

use anyhow::Context;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    routes::{AppState, build_cors_layer, build_router},
    ytdlp::YtDlpResolver,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "yt_proxy=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    tokio::fs::create_dir_all(&config.scratch_dir)
        .await
        .with_context(|| {
            format!(
                "could not create scratch directory {}",
                config.scratch_dir.display()
            )
        })?;
    if config.stale_scratch_after.is_zero() {
        warn!("STALE_SCRATCH_SECONDS=0: leftover scratch files will not be reaped.");
    }

    let resolver =
        YtDlpResolver::new(config.yt_dlp_bin.clone()).context("could not build HTTP client")?;
    let cors = build_cors_layer(&config.allowed_origins)?;
    let state = AppState::new(Arc::new(resolver), &config);
    state.scratch.reap_stale(config.stale_scratch_after).await;
    let app = build_router(state, cors);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("could not bind {}", config.bind_addr))?;

    info!(
        scratch_dir = %config.scratch_dir.display(),
        audio_policy = ?config.selection.audio,
        "yt-proxy ready on http://{}",
        config.bind_addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")
}

async fn shutdown_signal() {
    if let Err(error) = signal::ctrl_c().await {
        warn!("could not listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
