//! Reconciliation status and manual trigger

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::reconciler::PassReport;
use crate::{ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub last_pass: Option<PassReport>,
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: state.reconciler.is_running(),
        last_pass: state.reconciler.last_report().await,
    })
}

/// POST /reconcile
///
/// Runs a pass now; 409 when one is already in progress.
pub async fn trigger_pass(State(state): State<AppState>) -> ApiResult<Json<PassReport>> {
    let report = state.reconciler.run_pass().await?;
    Ok(Json(report))
}

pub fn reconcile_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/reconcile", post(trigger_pass))
}
