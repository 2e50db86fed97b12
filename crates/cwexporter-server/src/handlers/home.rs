use std::sync::Arc;

use axum::{extract::State, response::Html};

use crate::router::AppState;

pub async fn home(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>AWS CloudWatch Exporter</title></head>\n\
         <body>\n\
         <h1>AWS CloudWatch Exporter</h1>\n\
         <p>Version {version}</p>\n\
         <ul>\n\
         <li><a href=\"{metrics}\">Metrics</a></li>\n\
         <li><a href=\"{health}\">Health</a></li>\n\
         </ul>\n\
         </body>\n\
         </html>\n",
        version = state.build.version,
        metrics = state.metrics_path,
        health = state.health_path,
    ))
}
