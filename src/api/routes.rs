use crate::api::model::{CountersView, HostView};
use crate::api::server::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub(super) fn new(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(health_check))
        .route("/hosts", get(hosts))
        .route("/counters", get(counters))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.api_timeout))
        .with_state(state)
}

#[allow(clippy::unused_async)]
async fn health_check() -> impl IntoResponse {
    Json(json!({"ok":"healthy"}))
}

async fn hosts(State(state): State<AppState>) -> Json<Vec<HostView>> {
    let now = state.clock.now();
    let server = state.server.read().await;
    Json(server.hosts().map(|h| HostView::from_host(h, now)).collect())
}

async fn counters(State(state): State<AppState>) -> Json<CountersView> {
    let server = state.server.read().await;
    Json(CountersView {
        state: server.state(),
        port: server.port(),
        counters: server.counters(),
    })
}
