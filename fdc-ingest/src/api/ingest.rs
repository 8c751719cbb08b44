//! Survey batch ingestion
//!
//! `POST /api/encuestas/sync`. Each item is sanitized against the shared
//! allowlist, checked against the shared rules and the caller's campaign
//! scope, and either inserted or reported by index. One bad item never fails
//! its siblings, but a batch with no valid item is a client error.

use axum::{extract::rejection::JsonRejection, extract::State, Extension, Json};
use fdc_common::api::{IngestRequest, IngestResponse, ItemError};
use fdc_common::schema::{self, field, MAX_BATCH_ITEMS};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::api::AccessScope;
use crate::db::encuestas::ScopedRepository;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub async fn sync_encuestas(
    State(state): State<AppState>,
    Extension(scope): Extension<AccessScope>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> ApiResult<Json<IngestResponse>> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let items = match request.encuestas {
        Some(items) if !items.is_empty() => items,
        _ => {
            return Err(ApiError::BadRequest(
                "encuestas must be a non-empty array".to_string(),
            ))
        }
    };
    if items.len() > MAX_BATCH_ITEMS {
        return Err(ApiError::BadRequest(format!(
            "Batch of {} items exceeds the limit of {}",
            items.len(),
            MAX_BATCH_ITEMS
        )));
    }

    let total = items.len();
    let (valid, errors) = partition_items(&scope, items);

    if valid.is_empty() {
        info!(
            operator = %scope.operator_id,
            rejected = errors.len(),
            "Rejected batch with no valid items"
        );
        return Err(ApiError::NoValidItems {
            message: "No valid items in batch".to_string(),
            errors,
        });
    }

    let inserted = ScopedRepository::new(&state.db, &scope)
        .insert_batch(valid)
        .await?;

    info!(
        operator = %scope.operator_id,
        total,
        inserted,
        rejected = errors.len(),
        "Ingested survey batch"
    );
    Ok(Json(IngestResponse::new(inserted, errors)))
}

/// Split a batch into insertable payloads and per-item errors
fn partition_items(
    scope: &AccessScope,
    items: Vec<Value>,
) -> (Vec<Map<String, Value>>, Vec<ItemError>) {
    let mut valid = Vec::with_capacity(items.len());
    let mut errors = Vec::new();

    for (index, raw) in items.into_iter().enumerate() {
        match check_item(scope, &raw) {
            Ok(payload) => valid.push(payload),
            Err(error) => {
                debug!(index, "Item rejected: {}", error);
                errors.push(ItemError { index, error });
            }
        }
    }

    (valid, errors)
}

fn check_item(scope: &AccessScope, raw: &Value) -> Result<Map<String, Value>, String> {
    let payload = schema::sanitize(raw).ok_or_else(|| "item must be a JSON object".to_string())?;
    schema::check_rules(&payload).map_err(|violation| violation.to_string())?;

    // check_rules guarantees a non-empty string
    let campaign = payload
        .get(field::CAMPANA_ID)
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !scope.allows_campaign(campaign) {
        return Err(format!(
            "campana_id: campaign '{}' is not assigned to this operator",
            campaign
        ));
    }

    Ok(payload)
}
