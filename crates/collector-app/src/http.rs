use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tracing::{debug, warn};

use state_store::StateStore;

pub const REQUESTS_COUNTER: &str = "total_requests";
pub const REQUEST_DURATION_HISTOGRAM: &str = "request_duration_seconds";

#[derive(Clone)]
pub struct AppState {
    pub store: StateStore,
    pub prometheus: Option<PrometheusHandle>,
    pub state_wait: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/state", get(get_state))
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

async fn get_state(State(app): State<AppState>) -> Response {
    let snapshot = match app.store.read(app.state_wait).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(error = %err, "state requested before first poll cycle");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response();
        }
    };

    match serde_json::to_string_pretty(snapshot.as_ref()) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(err) => {
            warn!(error = %err, "snapshot serialization failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "snapshot serialization failed" })),
            )
                .into_response()
        }
    }
}

async fn get_health(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "ready": app.store.is_ready(),
        "available": app.store.is_available(),
        "last_cycle_ms": app.store.last_cycle_duration().map(|d| d.as_millis() as u64),
    }))
}

async fn get_metrics(State(app): State<AppState>) -> Response {
    match app.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    debug!(%method, %endpoint, "http request");

    counter!(REQUESTS_COUNTER, "method" => method.clone(), "endpoint" => endpoint.clone())
        .increment(1);
    let started = Instant::now();
    let response = next.run(request).await;
    histogram!(REQUEST_DURATION_HISTOGRAM, "method" => method, "endpoint" => endpoint)
        .record(started.elapsed().as_secs_f64());

    response
}
