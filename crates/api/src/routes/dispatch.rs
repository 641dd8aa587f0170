//! Dispatch control routes.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use relay_common::error::AppError;
use relay_common::types::{SessionPhase, StartCommand};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/dispatch/start", post(start_dispatch))
        .route("/api/dispatch/stop", post(stop_dispatch))
        .route("/api/dispatch/status", get(dispatch_status))
}

#[derive(Debug, Serialize)]
pub struct DispatchStatus {
    pub phase: SessionPhase,
    pub connected: bool,
    pub total: u64,
    pub pending: u64,
}

/// POST /api/dispatch/start: Queue a new dispatch session.
async fn start_dispatch(
    State(state): State<AppState>,
    payload: Result<Json<StartCommand>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let Json(command) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    if command.message.trim().is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }

    tracing::info!(source = %command.source, resume = command.resume, "Dispatch start requested");
    state.dispatch.start(command).await?;

    Ok((StatusCode::ACCEPTED, Json(json!({"accepted": true}))))
}

/// POST /api/dispatch/stop: Ask the running session to stop.
async fn stop_dispatch(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let running = state.dispatch.is_sending();
    state.dispatch.stop().await?;

    Ok((StatusCode::ACCEPTED, Json(json!({"stopping": running}))))
}

/// GET /api/dispatch/status: Current phase and recipient counts.
async fn dispatch_status(
    State(state): State<AppState>,
) -> Result<Json<DispatchStatus>, AppError> {
    let total = state.store.count_all().await?;
    let pending = state.store.count_pending().await?;

    Ok(Json(DispatchStatus {
        phase: state.dispatch.phase(),
        connected: state.is_connected(),
        total,
        pending,
    }))
}
