// src/server.rs
//
// HTTP boundary: POST /api/convert and GET /health.
//
// Shared state is immutable configuration only. Each request decodes, searches
// and encodes on its own blocking worker.

pub mod errors;
pub mod form;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::engine::{Limits, SearchConfig};

pub use errors::{AppError, AppResult};

/// Slack on top of the upload cap for multipart framing and the text fields.
/// The handler, not the transport, reports oversize uploads.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub limits: Limits,
    pub search: SearchConfig,
}

impl AppState {
    pub fn new(limits: Limits, search: SearchConfig) -> Self {
        Self { limits, search }
    }

    fn body_limit(&self) -> usize {
        let bytes = self
            .limits
            .max_upload_bytes
            .saturating_add(MULTIPART_OVERHEAD_BYTES);
        usize::try_from(bytes).unwrap_or(usize::MAX)
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.body_limit();
    Router::new()
        .route("/api/convert", post(handlers::convert))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Bind and serve until ctrl-c.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(
        addr = %listener.local_addr()?,
        max_upload_bytes = state.limits.max_upload_bytes,
        timeout_ms = state.limits.timeout_ms,
        "imgconv server listening"
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
