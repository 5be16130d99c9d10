//! Ghost ratio lookup

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::Local;
use serde::Deserialize;

use crate::reconciler::GhostReport;
use crate::scheduler::GHOST_LAG_MINUTES;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct GhostQuery {
    pub minutes_ago: Option<i64>,
}

/// GET /ghosts?minutes_ago=N
pub async fn ghost_ratio(
    State(state): State<AppState>,
    Query(query): Query<GhostQuery>,
) -> ApiResult<Json<GhostReport>> {
    let minutes_ago = query.minutes_ago.unwrap_or(GHOST_LAG_MINUTES);
    if !(0..=7 * 24 * 60).contains(&minutes_ago) {
        return Err(ApiError::BadRequest(format!(
            "minutes_ago must be between 0 and 10080, got {minutes_ago}"
        )));
    }

    let minute = Local::now().naive_local() - chrono::Duration::minutes(minutes_ago);
    let report = state.reconciler.ghost_report(minute).await?;
    Ok(Json(report))
}

pub fn ghost_routes() -> Router<AppState> {
    Router::new().route("/ghosts", get(ghost_ratio))
}
