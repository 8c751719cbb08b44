//! Submission payload schema
//!
//! Single definition of the survey payload shared by the device-side
//! sanitizer, the device-side submit check and the ingestion endpoint.
//!
//! # Allowlist
//!
//! Only the keys in [`ALLOWLIST`] survive [`sanitize`]. Anything else a client
//! sends (including server-owned columns such as `encuestador_id`) is dropped
//! by omission, never rejected, so older clients with extra fields keep
//! syncing.
//!
//! # Rules
//!
//! [`check_rules`] applies the ingestion rules in fixed order and reports the
//! first violation:
//! 1. `campana_id` required, non-empty string
//! 2. `intencion_voto` / `simpatia` integers in `[0, 5]` when present
//!    (`0` is an explicit "no answer")
//! 3. `duracion_segundos` integer `>= 30` when present

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Payload field names
pub mod field {
    pub const CAMPANA_ID: &str = "campana_id";
    pub const LATITUD: &str = "latitud";
    pub const LONGITUD: &str = "longitud";
    pub const PRECISION_GPS: &str = "precision_gps";
    pub const EDAD_RANGO: &str = "edad_rango";
    pub const GENERO: &str = "genero";
    pub const COLONIA: &str = "colonia";
    pub const TEMAS_PRIORITARIOS: &str = "temas_prioritarios";
    pub const CONOCIMIENTO_CANDIDATO: &str = "conocimiento_candidato";
    pub const IMAGEN_PERCIBIDA: &str = "imagen_percibida";
    pub const INTENCION_VOTO: &str = "intencion_voto";
    pub const SIMPATIA: &str = "simpatia";
    pub const COMENTARIOS: &str = "comentarios";
    pub const CONSENTIMIENTO: &str = "consentimiento";
    pub const DURACION_SEGUNDOS: &str = "duracion_segundos";
    pub const CAPTURADO_EN: &str = "capturado_en";
}

/// Fields a client may send. Order matches the `encuestas` table columns.
pub const ALLOWLIST: &[&str] = &[
    field::CAMPANA_ID,
    field::LATITUD,
    field::LONGITUD,
    field::PRECISION_GPS,
    field::EDAD_RANGO,
    field::GENERO,
    field::COLONIA,
    field::TEMAS_PRIORITARIOS,
    field::CONOCIMIENTO_CANDIDATO,
    field::IMAGEN_PERCIBIDA,
    field::INTENCION_VOTO,
    field::SIMPATIA,
    field::COMENTARIOS,
    field::CONSENTIMIENTO,
    field::DURACION_SEGUNDOS,
    field::CAPTURADO_EN,
];

/// Scalar rating fields checked against [`RATING_MIN`]..=[`RATING_MAX`]
pub const RATING_FIELDS: &[&str] = &[field::INTENCION_VOTO, field::SIMPATIA];

/// Lowest accepted rating; means "no answer"
pub const RATING_MIN: i64 = 0;

/// Highest accepted rating
pub const RATING_MAX: i64 = 5;

/// Shortest plausible interview
pub const MIN_DURATION_SECS: i64 = 30;

/// Hard cap on items per ingestion request
pub const MAX_BATCH_ITEMS: usize = 100;

/// Check whether a key may pass into a persisted record
pub fn is_allowed(key: &str) -> bool {
    ALLOWLIST.contains(&key)
}

/// Keep only allowlisted keys of a JSON object
///
/// Returns `None` when `raw` is not an object.
pub fn sanitize(raw: &Value) -> Option<Map<String, Value>> {
    raw.as_object().map(|obj| {
        obj.iter()
            .filter(|(key, _)| is_allowed(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    })
}

/// Owned variant of [`sanitize`] for payloads already known to be objects
pub fn sanitize_map(mut payload: Map<String, Value>) -> Map<String, Value> {
    payload.retain(|key, _| is_allowed(key));
    payload
}

/// Whether a rating lies in the accepted range
pub fn rating_in_range(value: i64) -> bool {
    (RATING_MIN..=RATING_MAX).contains(&value)
}

/// Whether an interview duration is plausible
pub fn duration_plausible(secs: i64) -> bool {
    secs >= MIN_DURATION_SECS
}

/// A payload failed an ingestion rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleViolation {
    /// Offending field
    pub field: &'static str,
    /// Human readable reason
    pub message: String,
}

impl RuleViolation {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for RuleViolation {}

/// Apply the ingestion rules to a sanitized payload
pub fn check_rules(payload: &Map<String, Value>) -> Result<(), RuleViolation> {
    match payload.get(field::CAMPANA_ID) {
        Some(Value::String(s)) if !s.trim().is_empty() => {}
        Some(Value::String(_)) => {
            return Err(RuleViolation::new(field::CAMPANA_ID, "must not be empty"))
        }
        Some(Value::Null) | None => {
            return Err(RuleViolation::new(field::CAMPANA_ID, "is required"))
        }
        Some(_) => return Err(RuleViolation::new(field::CAMPANA_ID, "must be a string")),
    }

    for &name in RATING_FIELDS {
        match present(payload, name) {
            None => {}
            Some(value) => match value.as_i64() {
                Some(rating) if rating_in_range(rating) => {}
                Some(rating) => {
                    return Err(RuleViolation::new(
                        name,
                        format!(
                            "must be between {} and {}, got {}",
                            RATING_MIN, RATING_MAX, rating
                        ),
                    ))
                }
                None => return Err(RuleViolation::new(name, "must be an integer")),
            },
        }
    }

    if let Some(value) = present(payload, field::DURACION_SEGUNDOS) {
        match value.as_i64() {
            Some(secs) if duration_plausible(secs) => {}
            Some(secs) => {
                return Err(RuleViolation::new(
                    field::DURACION_SEGUNDOS,
                    format!("must be at least {} seconds, got {}", MIN_DURATION_SECS, secs),
                ))
            }
            None => {
                return Err(RuleViolation::new(
                    field::DURACION_SEGUNDOS,
                    "must be an integer",
                ))
            }
        }
    }

    Ok(())
}

/// Field value, treating JSON `null` as absent
fn present<'a>(payload: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    payload.get(name).filter(|v| !v.is_null())
}
