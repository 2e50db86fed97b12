use std::sync::Arc;

use axum::{Router, routing::get};
use cwexporter_collector::{BuildInfo, Collector};
use tower_http::trace::TraceLayer;

use crate::handlers;

pub struct AppState {
    pub collector: Arc<Collector>,
    pub build: BuildInfo,
    pub metrics_path: String,
    pub health_path: String,
}

pub fn exporter_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::home::home))
        .route(&state.metrics_path, get(handlers::metrics::prometheus_metrics))
        .route(&state.health_path, get(handlers::health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
