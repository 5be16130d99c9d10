//! Suffix-range backfill trigger

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::reconciler::BackfillReport;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct BackfillRequest {
    #[serde(default)]
    pub from: u16,
    #[serde(default = "last_suffix")]
    pub to: u16,
}

fn last_suffix() -> u16 {
    9999
}

/// POST /backfill with `{"from": 0, "to": 9999}`
pub async fn start_backfill(
    State(state): State<AppState>,
    Json(request): Json<BackfillRequest>,
) -> ApiResult<Json<BackfillReport>> {
    if request.from > request.to || request.to > 9999 {
        return Err(ApiError::BadRequest(format!(
            "suffix range {}..={} is not within 0..=9999",
            request.from, request.to
        )));
    }

    let report = state.reconciler.backfill(request.from..=request.to).await?;
    Ok(Json(report))
}

pub fn backfill_routes() -> Router<AppState> {
    Router::new().route("/backfill", post(start_backfill))
}
