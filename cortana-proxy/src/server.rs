use axum::{routing::post, Router};
use cortana_core::config::ProxyConfig;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::{ProxyError, Result};
use crate::handlers::{generate_handler, not_found_handler};
use crate::state::AppState;
use crate::workers_ai::{ImageModelRunner, WorkersAiClient};

/// Routes of the image proxy
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/generate/:model",
            post(generate_handler).fallback(not_found_handler),
        )
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the proxy on `config.bind` until `shutdown` resolves
pub async fn run_server<F>(config: &ProxyConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let runner: Arc<dyn ImageModelRunner> = Arc::new(WorkersAiClient::from_config(config));
    serve(config, AppState::new(runner), shutdown).await
}

pub async fn serve<F>(config: &ProxyConfig, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config
        .bind
        .parse()
        .map_err(|e| ProxyError::Bind(format!("{}: {}", config.bind, e)))?;

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Image proxy listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Image proxy shutting down");
        })
        .await?;

    Ok(())
}
