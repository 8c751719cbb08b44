//! Bearer token authentication
//!
//! Tokens are never stored: the middleware hashes the presented token and
//! looks the hash up among the operators. The resolved [`AccessScope`] is
//! attached to the request for the handler; handlers never see the token.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use fdc_common::api::{bearer_token, hash_token, ErrorResponse};
use tracing::{debug, warn};

pub use crate::db::operators::AccessScope;
use crate::db::operators;
use crate::AppState;

/// Resolve the bearer token to an operator scope
///
/// Returns 401 when the header is missing, malformed or unknown.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or(AuthError::MissingToken)?;

    let scope = operators::find_scope_by_token_hash(&state.db, &hash_token(token))
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?
        .ok_or_else(|| {
            warn!("Rejected unknown access token");
            AuthError::InvalidToken
        })?;

    debug!(operator = %scope.operator_id, "Authenticated request");
    request.extensions_mut().insert(scope);
    Ok(next.run(request).await)
}

/// Authentication error types for HTTP responses
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    Database(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (
                StatusCode::UNAUTHORIZED,
                "Missing bearer token".to_string(),
            ),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()),
            AuthError::Database(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Authentication error: {}", msg),
            ),
        };

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}
