//! # FDC Common Library
//!
//! Shared code for the field data collection binaries:
//! - Submission schema, allowlist and server-side rules
//! - Ingestion API request/response types and token helpers
//! - Event types (FdcEvent enum) and the EventBus
//! - Configuration loading and root folder resolution
//! - SQLite pool opening
//! - Time helpers

pub mod api;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod schema;
pub mod time;

pub use error::{Error, Result};
