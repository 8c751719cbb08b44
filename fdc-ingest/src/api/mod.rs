//! HTTP API handlers for fdc-ingest

pub mod auth;
pub mod health;
pub mod ingest;

pub use auth::{auth_middleware, AccessScope};
pub use health::health_routes;
pub use ingest::sync_encuestas;
