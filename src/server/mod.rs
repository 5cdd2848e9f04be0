//! HTTP surface: holding validation plus the key-protected admin API

pub mod api;
pub mod auth;
pub mod error;

use crate::core::clock::Clock;
use crate::registry::SourceRegistry;
use crate::scheduler::Scheduler;
use crate::validation::ValidationCache;
use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub struct AppState {
    pub registry: Arc<SourceRegistry>,
    pub validation: Arc<ValidationCache>,
    pub scheduler: Scheduler,
    pub clock: Arc<dyn Clock>,
    pub api_key: String,
}

pub fn app_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/validate", post(api::validate_holding))
        .route("/api/admin/cron/status", get(api::cron_status))
        .route("/api/admin/cron/next", get(api::cron_next))
        .route("/api/admin/cron/execute", post(api::cron_execute))
        .route("/api/admin/cron/info", get(api::cron_info))
        .route("/api/admin/sources", get(api::list_sources))
        .route("/api/admin/sources/resolve", get(api::resolve_source))
        .route("/api/admin/validation/stats", get(api::validation_stats))
        .route(
            "/api/admin/validation/{category_id}/{code}",
            get(api::get_validation).delete(api::clear_validation),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/api/health", get(api::health))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serves until Ctrl-C, then stops the scheduler and drains open connections.
pub async fn serve(state: Arc<AppState>, listen_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {listen_addr}"))?;
    info!("Listening on {}", listener.local_addr()?);

    let scheduler = state.scheduler.clone();
    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
            scheduler.stop();
        })
        .await
        .context("Server error")
}
