//! Error types for fdc-capture
//!
//! Maps the failure taxonomy of the capture engine:
//! - validation failures are not errors here; they come back as
//!   [`crate::validator::ValidationResult`] and never reach the network
//! - [`TransportError`]: transient sync failures, always requeued
//! - [`StoreError::Capacity`]: persistent-store write failure, surfaced
//! - [`TransportError::Rejected`]: server-side rejection of an item

use thiserror::Error;

/// Local key-value store failures
#[derive(Error, Debug)]
pub enum StoreError {
    /// Write would exceed the store quota or the disk is full
    #[error("Storage capacity exceeded: {0}")]
    Capacity(String),

    /// Stored value could not be decoded
    #[error("Corrupt value under '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// Backend failure (database, lock poisoning, ...)
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_capacity(&self) -> bool {
        matches!(self, StoreError::Capacity(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        // SQLITE_FULL (13): database or disk is full
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("13") {
                return StoreError::Capacity(db_err.message().to_string());
            }
        }
        StoreError::Backend(err.to_string())
    }
}

/// Ingestion transport failures
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection refused, DNS failure, transport timeout, ...
    #[error("Network error: {0}")]
    Network(String),

    /// Endpoint rejected the token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Endpoint answered with a non-success status
    #[error("Rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Response body did not match the wire contract
    #[error("Invalid response: {0}")]
    Decode(String),
}

/// Capture session errors
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Response could not be persisted anywhere; the success path is aborted
    #[error("Response not saved: {0}")]
    Capacity(String),

    /// Operation not valid for the current wizard state
    #[error("Invalid wizard state: {0}")]
    InvalidState(String),

    /// Local store failure outside the submit path
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Shared library error
    #[error("Common error: {0}")]
    Common(#[from] fdc_common::Error),
}

/// Convenience Result type using CaptureError
pub type Result<T> = std::result::Result<T, CaptureError>;
