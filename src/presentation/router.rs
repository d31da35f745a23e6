use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    delta, health_check, metric_catalogue, overlay, refresh, select, snapshot, status,
    stream_overlay, timeline,
};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

// Compression is handled per response, so no CompressionLayer here.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/status", get(status))
        .route("/metrics", get(metric_catalogue))
        .route("/timeline", get(timeline))
        .route("/snapshot/:view", get(snapshot))
        .route("/delta/:view/:entity", get(delta))
        .route("/overlay", get(overlay))
        .route("/overlay/stream", get(stream_overlay))
        .route("/selection", post(select))
        .route("/refresh", post(refresh))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
