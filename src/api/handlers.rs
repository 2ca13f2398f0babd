//! Request handlers

use axum::{
    body::Bytes,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::node::LoadSnapshot;
use crate::AppState;

/// `POST /generate`
///
/// The body is taken raw so that malformed JSON is reported by the
/// orchestrator as a payload error rather than by an extractor rejection.
pub async fn generate(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match state.orchestrator.handle(&body).await {
        Ok(response) => ([(header::CONNECTION, "close")], Json(response)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Health and load report
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub in_flight: bool,
    pub started_at: DateTime<Utc>,
    pub last_announcement: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub load: LoadSnapshot,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        in_flight: state.node.is_in_flight(),
        started_at: state.node.started_at(),
        last_announcement: state.liveness.last_announcement(),
        load: state.node.load().snapshot(),
    })
}
