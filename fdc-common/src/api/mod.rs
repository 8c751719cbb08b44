//! API module for the ingestion wire contract
//!
//! Shared by the ingestion endpoint (server) and the capture engine's
//! transport (client).
//!
//! # Design Principle
//!
//! This module contains ONLY:
//! - Pure functions (no HTTP framework dependencies)
//! - Shared types
//!
//! The ingestion service wraps these with axum extractors and middleware.

pub mod auth;
pub mod types;

pub use auth::{bearer_token, generate_token, hash_token};
pub use types::{ErrorResponse, HealthResponse, IngestRequest, IngestResponse, ItemError};
