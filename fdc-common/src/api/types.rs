//! Shared API request/response types
//!
//! Field names are part of the deployed wire contract and stay in Spanish.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ========================================
// Ingestion
// ========================================

/// Body of `POST /api/encuestas/sync`
///
/// Items are kept as raw JSON: each one is sanitized and validated
/// independently so one malformed item cannot fail its siblings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IngestRequest {
    /// Raw submissions, oldest first
    #[serde(default)]
    pub encuestas: Option<Vec<Value>>,
}

impl IngestRequest {
    /// Wrap items into a request body
    pub fn new(encuestas: Vec<Value>) -> Self {
        Self {
            encuestas: Some(encuestas),
        }
    }
}

/// Per-item rejection, indexed by position in the request batch
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ItemError {
    /// Zero-based index in `encuestas`
    pub index: usize,
    /// Reason the item was excluded
    pub error: String,
}

/// 200 response of the ingestion endpoint
///
/// # Examples
///
/// ```
/// use fdc_common::api::types::IngestResponse;
///
/// let response = IngestResponse::new(4, Vec::new());
/// assert!(response.success);
/// assert_eq!(response.errores_validacion, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    /// Rows inserted
    pub sincronizadas: usize,
    /// Items excluded by validation
    pub errores_validacion: usize,
    /// Details of excluded items (omitted when none)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ItemError>>,
}

impl IngestResponse {
    /// Build a response from inserted count and item errors
    pub fn new(inserted: usize, errors: Vec<ItemError>) -> Self {
        Self {
            success: true,
            sincronizadas: inserted,
            errores_validacion: errors.len(),
            errors: if errors.is_empty() { None } else { Some(errors) },
        }
    }
}

// ========================================
// Error / Health
// ========================================

/// Error body for 4xx/5xx responses
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    /// Human readable message
    pub error: String,
    /// Item details when every item of a batch was rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ItemError>>,
}

impl ErrorResponse {
    /// Create error response
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            errors: None,
        }
    }

    /// Create error response carrying item details
    pub fn with_items(error: impl Into<String>, errors: Vec<ItemError>) -> Self {
        Self {
            error: error.into(),
            errors: Some(errors),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_encuestas_deserializes_to_none() {
        let request: IngestRequest = serde_json::from_str("{}").unwrap();
        assert!(request.encuestas.is_none());
    }

    #[test]
    fn test_response_omits_empty_errors() {
        let json = serde_json::to_string(&IngestResponse::new(3, Vec::new())).unwrap();
        assert!(json.contains("\"sincronizadas\":3"));
        assert!(!json.contains("errors"));
    }

    #[test]
    fn test_response_counts_item_errors() {
        let response = IngestResponse::new(
            4,
            vec![ItemError {
                index: 2,
                error: "simpatia: must be between 0 and 5, got 9".to_string(),
            }],
        );
        assert_eq!(response.errores_validacion, 1);

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["errors"][0]["index"], 2);
    }

    #[test]
    fn test_error_response() {
        let json = serde_json::to_string(&ErrorResponse::new("No hay encuestas")).unwrap();
        assert_eq!(json, r#"{"error":"No hay encuestas"}"#);
    }
}
