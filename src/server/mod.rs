pub mod handlers;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use handlers::AppState;

/// Assembles the HTTP surface: the vision task routes plus a liveness probe.
pub fn build_router(state: AppState) -> Router {
    let vision_router = Router::new()
        .route("/answer", post(handlers::handle_answer_request))
        // 10 MB limit, base64 encoded images are bulky
        .layer(DefaultBodyLimit::max(10_000_000));

    Router::new()
        .nest("/vision", vision_router)
        .route("/health", get(handlers::handle_health_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: &Config, state: AppState) -> Result<()> {
    let router = build_router(state);

    let listener = TcpListener::bind(format!("{}:{}", config.address, config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

// TODO set timeout for shutdown signal
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
