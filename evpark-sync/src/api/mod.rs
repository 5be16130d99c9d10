//! HTTP API handlers for evpark-sync

pub mod backfill;
pub mod ghosts;
pub mod health;
pub mod reconcile;

pub use backfill::backfill_routes;
pub use ghosts::ghost_routes;
pub use health::health_routes;
pub use reconcile::reconcile_routes;
