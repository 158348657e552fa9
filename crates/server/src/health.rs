use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use linesheet_core::MessageBuffer;
use serde::Serialize;

pub const ROOT_BANNER: &str = "Line Bot 正在運行中！";

#[derive(Clone)]
pub struct HealthState {
    buffer: Arc<MessageBuffer>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub buffer: HealthCheck,
    pub checked_at: String,
}

pub fn router(buffer: Arc<MessageBuffer>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .with_state(HealthState { buffer })
}

pub async fn root() -> &'static str {
    ROOT_BANNER
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let pending = state.buffer.snapshot().await;
    let pending_messages: usize = pending.values().map(Vec::len).sum();

    let payload = HealthResponse {
        status: "ready",
        service: HealthCheck {
            status: "ready",
            detail: "linesheet-server runtime initialized".to_string(),
        },
        buffer: HealthCheck {
            status: "ready",
            detail: format!(
                "{pending_messages} unsaved messages across {} users",
                pending.len()
            ),
        },
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}
