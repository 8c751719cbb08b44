//! fdc-ingest - Survey ingestion service
//!
//! Receives batches from capture devices, re-applies the shared allowlist
//! and rules to every item, and inserts the valid ones on behalf of the
//! operator that owns the bearer token.

use axum::Router;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod db;
pub mod error;

pub use error::{ApiError, ApiResult};

/// Default listen port
pub const DEFAULT_PORT: u16 = 5780;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

/// Build application router
///
/// The sync route requires a bearer token; `/health` does not.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::post;

    let protected = Router::new()
        .route("/api/encuestas/sync", post(api::sync_encuestas))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    let public = Router::new().merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
