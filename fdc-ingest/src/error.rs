//! HTTP error mapping
//!
//! Every failure leaves the service as `{"error": "..."}`; batch rejections
//! additionally carry the per-item reasons.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fdc_common::api::{ErrorResponse, ItemError};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed or out-of-bounds request
    #[error("{0}")]
    BadRequest(String),

    /// No item of the batch passed validation
    #[error("{message}")]
    NoValidItems {
        message: String,
        errors: Vec<ItemError>,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, ErrorResponse::new(message)),
            ApiError::NoValidItems { message, errors } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_items(message, errors),
            ),
            ApiError::Database(e) => {
                error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Database error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
