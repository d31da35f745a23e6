// HTTP request handlers
use crate::application::overlay_controller::{SelectionChange, Trigger};
use crate::domain::delta::{Delta, Unavailable};
use crate::domain::observation::{metric_info, EntityKind, METRIC_CATALOGUE};
use crate::domain::overlay::Snapshot;
use crate::infrastructure::chunked_json::stream_from_watch;
use crate::infrastructure::http_response::{accepts_brotli, json_response};
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct TimestampQuery {
    pub ts: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeltaQuery {
    pub metric: Option<String>,
    pub ts: Option<String>,
    pub window: Option<f64>,
}

#[derive(Debug, Serialize)]
struct TimelineResponse {
    timestamps: Vec<String>,
    current_index: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SnapshotResponse {
    view: EntityKind,
    timestamp: Option<String>,
    entities: Snapshot,
}

#[derive(Debug, Serialize)]
struct DeltaResponse {
    view: EntityKind,
    entity: String,
    metric: String,
    unit: Option<&'static str>,
    timestamp: Option<String>,
    window_minutes: f64,
    delta: Delta,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

async fn respond<T: Serialize>(status: StatusCode, data: &T, headers: &HeaderMap) -> Response {
    match json_response(status, data, accepts_brotli(headers)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

async fn error(status: StatusCode, message: String, headers: &HeaderMap) -> Response {
    respond(status, &ErrorBody { error: message }, headers).await
}

fn parse_view(view: &str) -> Result<EntityKind, String> {
    view.parse::<EntityKind>()
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Load state of the feeds, for "waiting for first refresh" and staleness banners
pub async fn status(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let status = state.controller.status().await;
    respond(StatusCode::OK, &status, &headers).await
}

pub async fn metric_catalogue(headers: HeaderMap) -> Response {
    respond(StatusCode::OK, &METRIC_CATALOGUE, &headers).await
}

pub async fn timeline(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let (index, selection) = state.controller.selected().await;
    let body = TimelineResponse {
        timestamps: index.timeline().timestamps().map(str::to_string).collect(),
        current_index: selection.index,
    };
    respond(StatusCode::OK, &body, &headers).await
}

/// Observations of every entity with a sample at `ts` (default: the selected timestamp)
pub async fn snapshot(
    Path(view): Path<String>,
    Query(query): Query<TimestampQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let view = match parse_view(&view) {
        Ok(view) => view,
        Err(message) => return error(StatusCode::BAD_REQUEST, message, &headers).await,
    };

    let (index, selection) = state.controller.selected().await;
    let timestamp = query
        .ts
        .or_else(|| index.selected_timestamp(&selection).map(str::to_string));
    let entities = match &timestamp {
        Some(ts) => index.snapshot(view, ts),
        None => Snapshot::new(),
    };

    let body = SnapshotResponse {
        view,
        timestamp,
        entities,
    };
    respond(StatusCode::OK, &body, &headers).await
}

/// Change of one metric for one entity; missing parameters fall back to the selection
pub async fn delta(
    Path((view, entity)): Path<(String, String)>,
    Query(query): Query<DeltaQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let view = match parse_view(&view) {
        Ok(view) => view,
        Err(message) => return error(StatusCode::BAD_REQUEST, message, &headers).await,
    };

    let (index, selection) = state.controller.selected().await;
    let timestamp = query
        .ts
        .or_else(|| index.selected_timestamp(&selection).map(str::to_string));
    let metric = query.metric.unwrap_or(selection.metric);
    let window_minutes = query.window.unwrap_or(selection.window_minutes);

    let delta = match &timestamp {
        Some(ts) => index.delta(view, &entity, &metric, ts, window_minutes),
        None => Delta::unavailable(Unavailable::UnknownTimestamp),
    };

    let body = DeltaResponse {
        view,
        entity,
        unit: metric_info(&metric).map(|info| info.unit),
        metric,
        timestamp,
        window_minutes,
        delta,
    };
    respond(StatusCode::OK, &body, &headers).await
}

/// Snapshot and deltas for the current selection
pub async fn overlay(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let view = state.controller.current_view().await;
    respond(StatusCode::OK, view.as_ref(), &headers).await
}

/// Stream the overlay every time it is recomputed
pub async fn stream_overlay(headers: HeaderMap, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    stream_from_watch(state.controller.subscribe(), accepts_brotli(&headers))
}

/// Change the selection; the fields present are applied together or not at all
pub async fn select(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(change): Json<SelectionChange>,
) -> Response {
    match state.controller.recompute(Trigger::Select(change)).await {
        Ok(view) => respond(StatusCode::OK, view.as_ref(), &headers).await,
        Err(e) => error(StatusCode::BAD_REQUEST, e.to_string(), &headers).await,
    }
}

/// Reload both feeds now instead of waiting for the timer
pub async fn refresh(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let outcome = state.controller.refresh().await;
    state.controller.publish().await;

    match outcome {
        Ok(outcome) => respond(StatusCode::OK, &outcome, &headers).await,
        Err(e) => error(StatusCode::BAD_GATEWAY, e.to_string(), &headers).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::feed_repository::FeedRepository;
    use crate::application::overlay_controller::OverlayController;
    use crate::domain::feed::RawFeed;
    use crate::infrastructure::config::{EngineSettings, FeedsSettings, RefreshSettings};
    use crate::presentation::router::build_router;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct StaticRepository {
        regions: Option<RawFeed>,
    }

    #[async_trait]
    impl FeedRepository for StaticRepository {
        async fn fetch_feed(&self, kind: EntityKind) -> anyhow::Result<RawFeed> {
            match kind {
                EntityKind::Station => Ok(RawFeed::default()),
                EntityKind::Region => self
                    .regions
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("feed offline")),
            }
        }
    }

    async fn app(regions: Option<RawFeed>, refresh: bool) -> axum::Router {
        let controller = Arc::new(OverlayController::new(
            Arc::new(StaticRepository { regions }),
            &FeedsSettings::default(),
            EngineSettings::default(),
            RefreshSettings::default(),
        ));
        if refresh {
            let _ = controller.refresh().await;
        }
        build_router(Arc::new(AppState { controller }))
    }

    fn sample_regions() -> RawFeed {
        serde_json::from_value(json!({"features": [
            {"geometry": {"type": "Point", "coordinates": [5.1, 52.1]},
             "properties": {"name": "R", "history": [
                {"timestamp": "2025-06-01T10:00:00Z", "qg": 100.0},
                {"timestamp": "2025-06-01T10:10:00Z", "qg": 150.0},
                {"timestamp": "2025-06-01T10:20:00Z", "qg": 130.0}
            ]}}
        ]}))
        .unwrap()
    }

    async fn call(router: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = app(None, false).await.oneshot(get("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_timeline_and_delta() {
        let (status, body) = call(app(Some(sample_regions()), true).await, get("/timeline")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["timestamps"].as_array().unwrap().len(), 3);
        assert_eq!(body["current_index"], 2);

        let (_, body) = call(app(Some(sample_regions()), true).await, get("/delta/region/R")).await;
        assert_eq!(body["delta"]["status"], "available");
        assert_eq!(body["delta"]["value"], -20.0);
        assert_eq!(body["delta"]["reference_timestamp"], "2025-06-01T10:10:00Z");
        assert_eq!(body["unit"], "W/m²");

        let (_, body) = call(
            app(Some(sample_regions()), true).await,
            get("/delta/region/R?window=30"),
        )
        .await;
        assert_eq!(body["delta"]["status"], "unavailable");
        assert_eq!(body["delta"]["reason"], "insufficient_history");
    }

    #[tokio::test]
    async fn test_snapshot_defaults_to_selected_timestamp() {
        let (status, body) = call(app(Some(sample_regions()), true).await, get("/snapshot/region")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["timestamp"], "2025-06-01T10:20:00Z");
        assert_eq!(body["entities"]["R"]["metrics"]["qg"], 130.0);

        let (_, body) = call(
            app(Some(sample_regions()), true).await,
            get("/snapshot/station?ts=2025-06-01T10:20:00Z"),
        )
        .await;
        assert_eq!(body["entities"], json!({}));

        let (status, _) = call(app(None, false).await, get("/snapshot/county")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_service_renders_empty_state() {
        let (_, body) = call(app(None, false).await, get("/timeline")).await;
        assert_eq!(body["timestamps"], json!([]));
        assert_eq!(body["current_index"], Value::Null);

        let (_, body) = call(app(None, false).await, get("/delta/region/R")).await;
        assert_eq!(body["delta"]["reason"], "unknown_timestamp");

        let (_, body) = call(app(None, false).await, get("/status")).await;
        assert_eq!(body["state"], "loading");
    }

    #[tokio::test]
    async fn test_selection_and_errors() {
        let router = app(Some(sample_regions()), true).await;

        let (status, body) = call(
            router.clone(),
            post_json("/selection", json!({"index": 1, "window_minutes": 10.0})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["timestamp"], "2025-06-01T10:10:00Z");
        assert_eq!(body["features"][0]["delta"]["value"], 50.0);

        let (status, body) = call(router, post_json("/selection", json!({"window_minutes": -3.0}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("window"));
    }

    #[tokio::test]
    async fn test_rejected_selection_changes_nothing() {
        let router = app(Some(sample_regions()), true).await;
        let (_, before) = call(router.clone(), get("/status")).await;

        let (status, _) = call(
            router.clone(),
            post_json(
                "/selection",
                json!({"view": "station", "metric": "ff", "window_minutes": -3.0, "index": 0}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, after) = call(router.clone(), get("/status")).await;
        assert_eq!(after["selection"], before["selection"]);
        assert_eq!(after["selection"]["view"], "region");
        assert_eq!(after["selection"]["metric"], "qg");
        assert_eq!(after["selection"]["window_minutes"], 10.0);
        assert_eq!(after["selection"]["index"], 2);

        let (status, _) = call(router, post_json("/selection", json!({"metric": "  ", "index": 0}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reads_follow_the_scrubbed_position() {
        let router = app(Some(sample_regions()), true).await;
        call(router.clone(), post_json("/selection", json!({"index": 0}))).await;

        let (_, body) = call(router.clone(), get("/timeline")).await;
        assert_eq!(body["current_index"], 0);

        let (_, body) = call(router.clone(), get("/snapshot/region")).await;
        assert_eq!(body["timestamp"], "2025-06-01T10:00:00Z");
        assert_eq!(body["entities"]["R"]["metrics"]["qg"], 100.0);

        let (_, body) = call(router, get("/delta/region/R?window=20")).await;
        assert_eq!(body["timestamp"], "2025-06-01T10:00:00Z");
        assert_eq!(body["window_minutes"], 20.0);
        assert_eq!(body["delta"]["reason"], "insufficient_history");
    }

    #[tokio::test]
    async fn test_refresh_failure_is_reported() {
        let router = app(None, false).await;

        let (status, body) = call(router.clone(), post_json("/refresh", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("region feed"));
        assert!(body["error"].as_str().unwrap().contains("feed offline"));

        let (_, body) = call(router, get("/status")).await;
        assert_eq!(body["state"], "failed");
        assert_eq!(body["stale"], false);
    }

    #[tokio::test]
    async fn test_refresh_reports_outcome() {
        let (status, body) = call(app(Some(sample_regions()), false).await, post_json("/refresh", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "applied");
        assert_eq!(body["timeline_len"], 3);
    }

    #[tokio::test]
    async fn test_metric_catalogue() {
        let (_, body) = call(app(None, false).await, get("/metrics")).await;
        assert!(body.as_array().unwrap().iter().any(|m| m["code"] == "qg"));
    }
}
