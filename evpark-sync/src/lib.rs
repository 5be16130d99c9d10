//! evpark-sync library
//!
//! Lifecycle reconciliation between the camera evidence, the monitoring
//! store and the vendor location service, plus the service's HTTP API.

pub mod api;
pub mod error;
pub mod reconciler;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod vendor;

pub use crate::error::{ApiError, ApiResult, ReconcileError};

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::reconciler::Reconciler;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub startup_time: DateTime<Utc>,
    /// Last scheduled pass failure, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            reconciler,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::reconcile_routes())
        .merge(api::ghost_routes())
        .merge(api::backfill_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
