//! Configuration for fdc-capture
//!
//! Loaded from `<config dir>/fdc/fdc-capture.toml`. Every key has a default so
//! a missing file still yields a working (offline-only) engine.
//!
//! ```toml
//! endpoint_url = "https://encuestas.example.org/api/encuestas/sync"
//! access_token = "..."
//! operator_id = "op-17"
//! organization_id = "org-3"
//! municipality = "Zapopan"
//! campaign_id = "camp-2026-oct"
//!
//! [autosave]
//! interval_secs = 30
//!
//! [duplicates]
//! threshold = 3
//! ```

use chrono::Duration as ChronoDuration;
use fdc_common::config::{load_toml_or_default, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default ingestion endpoint (local fdc-ingest)
pub const DEFAULT_ENDPOINT_URL: &str = "http://127.0.0.1:5780/api/encuestas/sync";

/// Local database file name inside the root folder
pub const DATABASE_FILE: &str = "fdc-capture.db";

/// Module name used for config file and root folder resolution
pub const MODULE_NAME: &str = "fdc-capture";

/// Complete capture configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub root_folder: Option<PathBuf>,
    pub endpoint_url: String,
    pub access_token: String,
    pub operator_id: String,
    pub organization_id: String,
    pub municipality: String,
    pub campaign_id: String,
    pub logging: LoggingConfig,
    pub autosave: AutosaveConfig,
    pub duplicates: DuplicateConfig,
    pub geolocation: GeolocationConfig,
    pub http: HttpConfig,
    pub storage: StorageConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            access_token: String::new(),
            operator_id: "operator".to_string(),
            organization_id: String::new(),
            municipality: String::new(),
            campaign_id: String::new(),
            logging: LoggingConfig::default(),
            autosave: AutosaveConfig::default(),
            duplicates: DuplicateConfig::default(),
            geolocation: GeolocationConfig::default(),
            http: HttpConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// Load from `path`, or from the platform config location when `None`
    pub fn load(path: Option<&Path>) -> Self {
        let default_path = fdc_common::config::config_file_path(MODULE_NAME);
        load_toml_or_default(path.or(default_path.as_deref()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AutosaveConfig {
    pub interval_secs: u64,
    /// Snapshots this old or older are never offered for recovery
    pub max_age_hours: i64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            max_age_hours: 24,
        }
    }
}

impl AutosaveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn max_age(&self) -> ChronoDuration {
        ChronoDuration::hours(self.max_age_hours)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DuplicateConfig {
    pub window_minutes: i64,
    pub threshold: usize,
    /// Timestamps kept per operator; oldest dropped beyond this
    pub log_capacity: usize,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            window_minutes: 10,
            threshold: 3,
            log_capacity: 20,
        }
    }
}

impl DuplicateConfig {
    pub fn window(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.window_minutes)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeolocationConfig {
    /// Additional attempts after the first one
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub attempt_timeout_secs: u64,
    /// Accuracy (meters) above which a fix only produces a warning
    pub warn_accuracy_m: f64,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 2000,
            attempt_timeout_secs: 15,
            warn_accuracy_m: 100.0,
        }
    }
}

impl GeolocationConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Transport-level request timeout
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 20 }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Byte budget for all local keys; `None` means disk-limited only
    pub quota_bytes: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            quota_bytes: Some(5 * 1024 * 1024),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.autosave.interval(), Duration::from_secs(30));
        assert_eq!(config.autosave.max_age(), ChronoDuration::hours(24));
        assert_eq!(config.duplicates.window(), ChronoDuration::minutes(10));
        assert_eq!(config.duplicates.threshold, 3);
        assert_eq!(config.geolocation.max_retries, 2);
        assert_eq!(config.geolocation.attempt_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
operator_id = "op-17"
campaign_id = "camp-1"

[duplicates]
threshold = 5
"#
        )
        .unwrap();

        let config = CaptureConfig::load(Some(file.path()));
        assert_eq!(config.operator_id, "op-17");
        assert_eq!(config.campaign_id, "camp-1");
        assert_eq!(config.duplicates.threshold, 5);
        assert_eq!(config.duplicates.window_minutes, 10);
        assert_eq!(config.endpoint_url, DEFAULT_ENDPOINT_URL);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::load(Some(&dir.path().join("absent.toml")));
        assert_eq!(config.autosave.interval_secs, 30);
    }
}
