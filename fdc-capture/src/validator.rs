//! Per-step field validation
//!
//! [`validate`] is pure: the same draft, step and geolocation inputs always
//! produce the same [`ValidationResult`]. Every rule of the step runs (no
//! fail-fast) and issues are reported in the order the fields appear on the
//! step, so the first blocking error is always the topmost field.

use crate::draft::{SurveyDraft, MAX_COLONIA_CHARS, MAX_COMMENT_CHARS, MAX_TOPICS, TOPICS};
use crate::geolocation::GeoStatus;
use crate::wizard::WizardStep;
use fdc_common::schema::{self, field};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Accuracy (meters) above which a fix is accepted with a warning
pub const DEFAULT_WARN_ACCURACY_M: f64 = 100.0;

/// One problem with one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldIssue {
    pub field: &'static str,
    pub message: String,
}

impl FieldIssue {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Outcome of validating one step (or the whole form)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub blocking_errors: Vec<FieldIssue>,
    pub warnings: Vec<FieldIssue>,
    pub satisfied_fields: Vec<&'static str>,
}

impl ValidationResult {
    /// Whether the wizard may move past this step
    pub fn can_advance(&self) -> bool {
        self.blocking_errors.is_empty()
    }

    fn block(&mut self, field: &'static str, message: impl Into<String>) {
        self.blocking_errors.push(FieldIssue::new(field, message));
    }

    fn warn(&mut self, field: &'static str, message: impl Into<String>) {
        self.warnings.push(FieldIssue::new(field, message));
    }

    fn satisfy(&mut self, field: &'static str) {
        self.satisfied_fields.push(field);
    }

    fn merge(&mut self, other: ValidationResult) {
        self.blocking_errors.extend(other.blocking_errors);
        self.warnings.extend(other.warnings);
        self.satisfied_fields.extend(other.satisfied_fields);
    }
}

/// Field validator with a configurable accuracy warning threshold
#[derive(Debug, Clone, Copy)]
pub struct FieldValidator {
    warn_accuracy_m: f64,
}

impl Default for FieldValidator {
    fn default() -> Self {
        Self::new(DEFAULT_WARN_ACCURACY_M)
    }
}

impl FieldValidator {
    pub fn new(warn_accuracy_m: f64) -> Self {
        Self { warn_accuracy_m }
    }

    /// Validate the fields of one step
    pub fn validate(
        &self,
        step: WizardStep,
        draft: &SurveyDraft,
        geo_status: GeoStatus,
        geo_accuracy: Option<f64>,
    ) -> ValidationResult {
        let mut result = ValidationResult::default();
        match step {
            WizardStep::Perfil => self.profile(&mut result, draft, geo_status, geo_accuracy),
            WizardStep::Temas => topics(&mut result, draft),
            WizardStep::Opinion => opinion(&mut result, draft),
            WizardStep::Cierre => closing(&mut result, draft),
            WizardStep::Submitted => {}
        }
        result
    }

    /// Validate every step, then the shared server rules on `payload`
    pub fn validate_all(
        &self,
        draft: &SurveyDraft,
        payload: &Map<String, Value>,
        geo_status: GeoStatus,
        geo_accuracy: Option<f64>,
    ) -> ValidationResult {
        let mut result = ValidationResult::default();
        for step in WizardStep::FORM_STEPS {
            result.merge(self.validate(step, draft, geo_status, geo_accuracy));
        }
        if let Err(violation) = schema::check_rules(payload) {
            result.block(violation.field, violation.message);
        }
        result
    }

    fn profile(
        &self,
        result: &mut ValidationResult,
        draft: &SurveyDraft,
        geo_status: GeoStatus,
        geo_accuracy: Option<f64>,
    ) {
        match geo_status {
            GeoStatus::Success => {
                result.satisfy(field::LATITUD);
                if let Some(accuracy) = geo_accuracy.filter(|a| *a > self.warn_accuracy_m) {
                    result.warn(
                        field::PRECISION_GPS,
                        format!(
                            "Location accuracy is {:.0} m (over {:.0} m)",
                            accuracy, self.warn_accuracy_m
                        ),
                    );
                }
            }
            GeoStatus::Loading => result.block(field::LATITUD, "Location is still being acquired"),
            GeoStatus::Idle | GeoStatus::Error => {
                result.block(field::LATITUD, "Location is required")
            }
        }

        if draft.consentimiento {
            result.satisfy(field::CONSENTIMIENTO);
        } else {
            result.block(field::CONSENTIMIENTO, "Respondent consent is required");
        }

        required(result, field::EDAD_RANGO, draft.edad_rango.is_some(), "Age range is required");
        required(result, field::GENERO, draft.genero.is_some(), "Gender is required");

        match draft.colonia.as_deref().map(str::trim) {
            None | Some("") => result.block(field::COLONIA, "Neighbourhood is required"),
            Some(colonia) if colonia.chars().count() > MAX_COLONIA_CHARS => result.block(
                field::COLONIA,
                format!("Neighbourhood must be at most {} characters", MAX_COLONIA_CHARS),
            ),
            Some(_) => result.satisfy(field::COLONIA),
        }
    }
}

/// Validate one step with the default accuracy threshold
pub fn validate(
    step: WizardStep,
    draft: &SurveyDraft,
    geo_status: GeoStatus,
    geo_accuracy: Option<f64>,
) -> ValidationResult {
    FieldValidator::default().validate(step, draft, geo_status, geo_accuracy)
}

fn required(result: &mut ValidationResult, field: &'static str, present: bool, message: &str) {
    if present {
        result.satisfy(field);
    } else {
        result.block(field, message);
    }
}

fn topics(result: &mut ValidationResult, draft: &SurveyDraft) {
    let picked = &draft.temas_prioritarios;
    let unknown: Vec<&str> = picked
        .iter()
        .map(String::as_str)
        .filter(|t| !TOPICS.contains(t))
        .collect();
    let distinct: HashSet<&str> = picked.iter().map(String::as_str).collect();

    if picked.is_empty() {
        result.block(field::TEMAS_PRIORITARIOS, "Pick at least one topic");
    } else if picked.len() > MAX_TOPICS {
        result.block(
            field::TEMAS_PRIORITARIOS,
            format!("Pick at most {} topics", MAX_TOPICS),
        );
    } else if !unknown.is_empty() {
        result.block(
            field::TEMAS_PRIORITARIOS,
            format!("Unknown topics: {}", unknown.join(", ")),
        );
    } else if distinct.len() != picked.len() {
        result.block(field::TEMAS_PRIORITARIOS, "Topics must not repeat");
    } else {
        result.satisfy(field::TEMAS_PRIORITARIOS);
    }
}

fn opinion(result: &mut ValidationResult, draft: &SurveyDraft) {
    match draft.conocimiento_candidato {
        None => result.block(
            field::CONOCIMIENTO_CANDIDATO,
            "Candidate awareness is required",
        ),
        Some(awareness) => {
            result.satisfy(field::CONOCIMIENTO_CANDIDATO);
            if awareness.asks_image() {
                required(
                    result,
                    field::IMAGEN_PERCIBIDA,
                    draft.imagen_percibida.is_some(),
                    "Perceived image is required",
                );
            }
        }
    }

    rating(result, field::INTENCION_VOTO, draft.intencion_voto, "Vote intention");
    rating(result, field::SIMPATIA, draft.simpatia, "Sympathy");
}

fn rating(result: &mut ValidationResult, field: &'static str, value: Option<i64>, label: &str) {
    match value {
        None => result.block(field, format!("{} is required", label)),
        Some(v) if !schema::rating_in_range(v) => result.block(
            field,
            format!(
                "{} must be between {} and {}",
                label,
                schema::RATING_MIN,
                schema::RATING_MAX
            ),
        ),
        Some(_) => result.satisfy(field),
    }
}

fn closing(result: &mut ValidationResult, draft: &SurveyDraft) {
    match draft.comentarios.as_deref().map(str::trim) {
        Some(text) if text.chars().count() > MAX_COMMENT_CHARS => result.block(
            field::COMENTARIOS,
            format!("Comments must be at most {} characters", MAX_COMMENT_CHARS),
        ),
        Some(text) if !text.is_empty() => result.satisfy(field::COMENTARIOS),
        _ => {}
    }
}
