//! Configuration for fdc-ingest
//!
//! Loaded from `<config dir>/fdc/fdc-ingest.toml`; every key has a default.

use fdc_common::config::{load_toml_or_default, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MODULE_NAME: &str = "fdc-ingest";

pub const DATABASE_FILE: &str = "fdc-ingest.db";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    pub root_folder: Option<PathBuf>,
    pub bind_address: String,
    pub port: u16,
    pub logging: LoggingConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind_address: "127.0.0.1".to_string(),
            port: crate::DEFAULT_PORT,
            logging: LoggingConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load from `path`, or from the platform config location when `None`
    pub fn load(path: Option<&Path>) -> Self {
        let default_path = fdc_common::config::config_file_path(MODULE_NAME);
        load_toml_or_default(path.or(default_path.as_deref()))
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
