//! API route definitions.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::state::AppState;
use crate::ingest;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/alerts", get(list_alerts).post(receive_alerts))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Sentinel backend is running" }))
}

async fn health(State(state): State<AppState>) -> Response {
    let store = state.store.clone();
    match tokio::task::spawn_blocking(move || store.count()).await {
        Ok(Ok(alerts)) => Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "alerts": alerts,
        }))
        .into_response(),
        Ok(Err(e)) => degraded(e.to_string()),
        Err(e) => degraded(e.to_string()),
    }
}

fn degraded(reason: String) -> Response {
    error!(error = %reason, "health check could not reach the store");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "status": "degraded", "error": reason })),
    )
        .into_response()
}

/// GET /alerts - stored alerts, newest first
async fn list_alerts(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let store = state.store.clone();
    match tokio::task::spawn_blocking(move || store.list(query.limit)).await {
        Ok(Ok(records)) => Json(records).into_response(),
        Ok(Err(e)) => internal_error("failed to list alerts", e.to_string()),
        Err(e) => internal_error("failed to list alerts", e.to_string()),
    }
}

/// POST /alerts - agent webhook; accepts one raw alert or an array of them
async fn receive_alerts(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    match ingest::receive_async(state.store.clone(), state.normalizer, body).await {
        Ok(summary) => Json(json!({
            "status": "success",
            "inserted": summary.inserted,
            "total_received": summary.received,
            "rejected": summary.rejected,
        }))
        .into_response(),
        Err(e) => internal_error("error processing alerts", e.to_string()),
    }
}

fn internal_error(message: &str, detail: String) -> Response {
    error!(error = %detail, "{}", message);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message, "detail": detail })),
    )
        .into_response()
}
