//! In-progress survey response
//!
//! [`SurveyDraft`] is mutated step by step by the wizard and owned by the
//! capture session until it is submitted. It only becomes a wire payload
//! through [`SurveyDraft::to_payload`], which always runs the shared
//! allowlist sanitizer.

use crate::geolocation::Coords;
use crate::session::SessionContext;
use chrono::{DateTime, Utc};
use fdc_common::schema::{self, field};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Priority topic codes offered on the topics step
pub const TOPICS: &[&str] = &[
    "seguridad",
    "empleo",
    "salud",
    "educacion",
    "agua",
    "transporte",
    "corrupcion",
    "vivienda",
];

/// Maximum topics a respondent may pick
pub const MAX_TOPICS: usize = 3;

/// Maximum length of the neighbourhood field
pub const MAX_COLONIA_CHARS: usize = 120;

/// Maximum length of the free-text comments
pub const MAX_COMMENT_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeRange {
    #[serde(rename = "18-24")]
    From18To24,
    #[serde(rename = "25-34")]
    From25To34,
    #[serde(rename = "35-44")]
    From35To44,
    #[serde(rename = "45-54")]
    From45To54,
    #[serde(rename = "55-64")]
    From55To64,
    #[serde(rename = "65+")]
    Over65,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Mujer,
    Hombre,
    Otro,
    PrefiereNoDecir,
}

/// How well the respondent knows the candidate
///
/// `Nada` is the most negative option: the perceived-image question is
/// skipped for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Awareness {
    Nada,
    Poco,
    Algo,
    Mucho,
}

impl Awareness {
    /// Whether the perceived-image question applies
    pub fn asks_image(self) -> bool {
        self != Awareness::Nada
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerceivedImage {
    MuyMala,
    Mala,
    Regular,
    Buena,
    MuyBuena,
}

/// Survey response under construction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyDraft {
    /// When the operator opened this response; drives `duracion_segundos`
    pub started_at: Option<DateTime<Utc>>,
    pub ubicacion: Option<Coords>,
    pub consentimiento: bool,
    pub edad_rango: Option<AgeRange>,
    pub genero: Option<Gender>,
    pub colonia: Option<String>,
    pub temas_prioritarios: Vec<String>,
    pub conocimiento_candidato: Option<Awareness>,
    pub imagen_percibida: Option<PerceivedImage>,
    /// 0 = explicit "no answer", 1..=5 otherwise
    pub intencion_voto: Option<i64>,
    pub simpatia: Option<i64>,
    pub comentarios: Option<String>,
}

impl SurveyDraft {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(started_at),
            ..Self::default()
        }
    }

    /// Whether any field that identifies a household is filled
    ///
    /// Autosave and recovery only kick in once this is true; an untouched
    /// form is not worth restoring.
    pub fn has_identifying_field(&self) -> bool {
        self.edad_rango.is_some()
            || self.genero.is_some()
            || self
                .colonia
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty())
    }

    /// Seconds elapsed since the response was opened
    pub fn duration_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.started_at
            .map(|started| fdc_common::time::age(started, now).num_seconds())
    }

    /// Build the sanitized wire payload
    pub fn to_payload(&self, context: &SessionContext, now: DateTime<Utc>) -> Map<String, Value> {
        let mut payload = Map::new();

        payload.insert(field::CAMPANA_ID.into(), json!(context.campaign_id()));
        if let Some(coords) = &self.ubicacion {
            payload.insert(field::LATITUD.into(), json!(coords.latitude));
            payload.insert(field::LONGITUD.into(), json!(coords.longitude));
            payload.insert(field::PRECISION_GPS.into(), json!(coords.accuracy_m));
        }
        payload.insert(field::CONSENTIMIENTO.into(), json!(self.consentimiento));
        insert_opt(&mut payload, field::EDAD_RANGO, &self.edad_rango);
        insert_opt(&mut payload, field::GENERO, &self.genero);
        if let Some(colonia) = self.colonia.as_deref().map(str::trim) {
            if !colonia.is_empty() {
                payload.insert(field::COLONIA.into(), json!(colonia));
            }
        }
        payload.insert(
            field::TEMAS_PRIORITARIOS.into(),
            json!(self.temas_prioritarios),
        );
        insert_opt(
            &mut payload,
            field::CONOCIMIENTO_CANDIDATO,
            &self.conocimiento_candidato,
        );
        // Image only applies when the candidate is known at all
        if self.conocimiento_candidato.is_some_and(Awareness::asks_image) {
            insert_opt(&mut payload, field::IMAGEN_PERCIBIDA, &self.imagen_percibida);
        }
        insert_opt(&mut payload, field::INTENCION_VOTO, &self.intencion_voto);
        insert_opt(&mut payload, field::SIMPATIA, &self.simpatia);
        if let Some(text) = self.comentarios.as_deref().map(str::trim) {
            if !text.is_empty() {
                payload.insert(field::COMENTARIOS.into(), json!(text));
            }
        }
        if let Some(secs) = self.duration_secs(now) {
            payload.insert(field::DURACION_SEGUNDOS.into(), json!(secs));
        }
        payload.insert(field::CAPTURADO_EN.into(), json!(now.to_rfc3339()));

        schema::sanitize_map(payload)
    }
}

fn insert_opt<T: Serialize>(payload: &mut Map<String, Value>, key: &str, value: &Option<T>) {
    if let Some(value) = value {
        if let Ok(encoded) = serde_json::to_value(value) {
            payload.insert(key.to_string(), encoded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn context() -> SessionContext {
        SessionContext::begin("op-1", "org-1", "Zapopan", "camp-1")
    }

    #[test]
    fn test_identifying_fields() {
        let mut draft = SurveyDraft::default();
        assert!(!draft.has_identifying_field());

        draft.colonia = Some("   ".to_string());
        assert!(!draft.has_identifying_field());

        draft.colonia = Some("Centro".to_string());
        assert!(draft.has_identifying_field());

        let draft = SurveyDraft {
            genero: Some(Gender::Mujer),
            ..SurveyDraft::default()
        };
        assert!(draft.has_identifying_field());
    }

    #[test]
    fn test_payload_fields() {
        let now = Utc::now();
        let draft = SurveyDraft {
            started_at: Some(now - Duration::seconds(95)),
            ubicacion: Some(Coords {
                latitude: 20.67,
                longitude: -103.35,
                accuracy_m: 12.0,
            }),
            consentimiento: true,
            edad_rango: Some(AgeRange::From25To34),
            genero: Some(Gender::PrefiereNoDecir),
            temas_prioritarios: vec!["agua".to_string()],
            conocimiento_candidato: Some(Awareness::Algo),
            imagen_percibida: Some(PerceivedImage::Buena),
            intencion_voto: Some(0),
            simpatia: Some(4),
            ..SurveyDraft::default()
        };

        let payload = draft.to_payload(&context(), now);
        assert_eq!(payload["campana_id"], "camp-1");
        assert_eq!(payload["edad_rango"], "25-34");
        assert_eq!(payload["genero"], "prefiere_no_decir");
        assert_eq!(payload["imagen_percibida"], "buena");
        assert_eq!(payload["intencion_voto"], 0);
        assert_eq!(payload["duracion_segundos"], 95);
        assert_eq!(payload["latitud"], 20.67);
        assert!(!payload.contains_key("colonia"));
        assert!(payload.keys().all(|k| schema::is_allowed(k)));
    }

    #[test]
    fn test_payload_skips_image_when_candidate_unknown() {
        let draft = SurveyDraft {
            conocimiento_candidato: Some(Awareness::Nada),
            imagen_percibida: Some(PerceivedImage::Mala),
            ..SurveyDraft::new(Utc::now())
        };
        let payload = draft.to_payload(&context(), Utc::now());
        assert_eq!(payload["conocimiento_candidato"], "nada");
        assert!(!payload.contains_key("imagen_percibida"));
    }
}
