//! API route handlers for the gateway.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{Value, json};

use cadence_core::CadenceError;
use cadence_core::types::{ConnectionRejected, RoutingKey, UrlFetchFailed};
use cadence_scheduler::FeedbackOutcome;

use crate::server::AppState;

type Reply = (StatusCode, Json<Value>);

fn error(status: StatusCode, message: impl Into<String>) -> Reply {
    (status, Json(json!({"ok": false, "error": message.into()})))
}

fn status_for(e: &CadenceError) -> StatusCode {
    match e {
        CadenceError::NotFound(_) => StatusCode::NOT_FOUND,
        CadenceError::Config(_) | CadenceError::Serialization(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": "cadence-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Per-tier tick counters.
pub async fn list_tiers(State(state): State<Arc<AppState>>) -> Json<Value> {
    let tiers = state.engine.stats().await;
    Json(json!({"ok": true, "tiers": tiers}))
}

/// Run one tick of a tier immediately.
pub async fn tick_tier(State(state): State<Arc<AppState>>, Path(rate): Path<u64>) -> Reply {
    match state.engine.tick_now(rate).await {
        Ok(report) => (StatusCode::OK, Json(json!({"ok": true, "report": report}))),
        Err(e) => {
            tracing::warn!("⚠️ Manual tick of {}s failed: {e}", rate);
            error(status_for(&e), e.to_string())
        }
    }
}

/// Feedback event ingress. The body is the event payload.
pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Path(routing_key): Path<String>,
    body: Bytes,
) -> Reply {
    let key = match RoutingKey::parse(&routing_key) {
        Some(key @ (RoutingKey::UrlFetchFailed | RoutingKey::ConnectionRejected)) => key,
        _ => return error(StatusCode::NOT_FOUND, format!("no consumer for '{routing_key}'")),
    };

    let outcome = match key {
        RoutingKey::UrlFetchFailed => match serde_json::from_slice::<UrlFetchFailed>(&body) {
            Ok(event) => state
                .feedback
                .handle_url_fetch_failed(&event)
                .await
                .map(FeedbackOutcome::Applied),
            Err(e) => return error(StatusCode::BAD_REQUEST, format!("invalid {key} payload: {e}")),
        },
        _ => match serde_json::from_slice::<ConnectionRejected>(&body) {
            Ok(event) => state.feedback.handle_connection_rejected(&event).await,
            Err(e) => return error(StatusCode::BAD_REQUEST, format!("invalid {key} payload: {e}")),
        },
    };

    match outcome {
        Ok(FeedbackOutcome::Applied(n)) => (StatusCode::OK, Json(json!({"ok": true, "applied": n}))),
        Ok(FeedbackOutcome::Missing) => (StatusCode::OK, Json(json!({"ok": true, "applied": 0, "missing": true}))),
        Ok(FeedbackOutcome::Ignored) => (StatusCode::OK, Json(json!({"ok": true, "applied": 0}))),
        Err(e) => {
            tracing::error!("❌ {} event failed: {e}", key);
            error(status_for(&e), e.to_string())
        }
    }
}
