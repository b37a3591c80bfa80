use std::net::SocketAddr;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::{
    services::{cancel_job, create_job, get_chunk_statistics, get_job, health, metrics},
    state::AppState,
};
use crate::config::Config;
use crate::pipeline::Pipeline;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/chunks", get(get_chunk_statistics))
        .route("/jobs/{job_id}/cancel", post(cancel_job))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
        // Transparently decompress gzip request bodies
        .layer(RequestDecompressionLayer::new())
}

/// Serve the API and run the worker pool until a shutdown signal arrives
pub async fn run(config: Config, address: SocketAddr) -> Result<(), AnyError> {
    info!(data_dir = %config.server.data_dir.display(), "Starting pipeline");
    let pipeline = Pipeline::start(&config).await?;

    let app = router(AppState::new(config, &pipeline));

    let listener = TcpListener::bind(address).await?;
    info!(%address, "Crawlbox API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
