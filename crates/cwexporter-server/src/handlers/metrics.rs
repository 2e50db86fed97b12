use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use cwexporter_collector::render_exposition;
use tracing::error;

use crate::router::AppState;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Runs one scrape cycle and returns the exposition document.
pub async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> Response {
    let samples = match Arc::clone(&state.collector).collect_detached().await {
        Ok(samples) => samples,
        Err(err) => {
            error!(code = err.code(), error = %err, "scrape cycle did not complete");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let mut response = Response::new(Body::from(render_exposition(&samples)));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(EXPOSITION_CONTENT_TYPE),
    );
    response
}
