//! Local status surface: health probes, metrics and the last values sent to the hub.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use spabridge_mqtt::MqttService;
use tokio::sync::RwLock;
use tracing::warn;

use crate::host::HostCache;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub mqtt: MqttService,
    pub cache: Arc<RwLock<HostCache>>,
    pub metrics: Arc<Metrics>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .route("/metrics", get(metrics_handler))
        .route("/api/drivers", get(drivers))
        .route("/api/notices", get(notices))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.mqtt.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn version() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok((body, content_type)) => ([(CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn drivers(State(state): State<AppState>) -> Json<Value> {
    let cache = state.cache.read().await;
    Json(json!({ "nodes": cache.nodes, "drivers": cache.drivers }))
}

async fn notices(State(state): State<AppState>) -> Json<Value> {
    let cache = state.cache.read().await;
    Json(json!({ "notices": cache.notices }))
}
