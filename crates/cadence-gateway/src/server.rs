//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use cadence_core::config::GatewayConfig;
use cadence_scheduler::{HealthFeedbackConsumer, TierEngine};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub engine: TierEngine,
    pub feedback: HealthFeedbackConsumer,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(engine: TierEngine, feedback: HealthFeedbackConsumer) -> Self {
        Self {
            engine,
            feedback,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/tiers", get(super::routes::list_tiers))
        .route("/api/v1/tiers/{rate}/tick", post(super::routes::tick_tier))
        .route("/api/v1/events/{routing_key}", post(super::routes::ingest_event))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind and serve until the process exits.
pub async fn start_server(
    config: &GatewayConfig,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
