//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable `FDC_ROOT_FOLDER`
//! 3. `root_folder` key of the module TOML file
//! 4. OS-dependent compiled default (fallback)
//!
//! Missing or unreadable TOML files never abort startup: the caller gets a
//! warning in the log and compiled defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "FDC_ROOT_FOLDER";

/// Compiled-in defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
        }
    }
}

/// Logging section shared by every module TOML
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// tracing filter directive, e.g. "info" or "fdc_capture=debug"
    pub level: Option<String>,
}

/// Keys common to every module TOML file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resolves the data root folder for a module
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml_root: None,
        }
    }

    /// Set the command-line override (highest priority)
    pub fn with_cli_arg(mut self, cli_arg: Option<PathBuf>) -> Self {
        self.cli_arg = cli_arg;
        self
    }

    /// Use a `root_folder` value already read from a TOML file
    ///
    /// Replaces the lookup in the default module TOML (third tier).
    pub fn with_toml_root(mut self, toml_root: Option<PathBuf>) -> Self {
        self.toml_root = toml_root;
        self
    }

    /// Module TOML path (`<config dir>/fdc/<module>.toml`)
    pub fn config_path(&self) -> Option<PathBuf> {
        config_file_path(&self.module_name)
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            debug!("Root folder from command line: {}", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                debug!("Root folder from {}: {}", ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        if let Some(root) = &self.toml_root {
            debug!("Root folder from TOML: {}", root.display());
            return root.clone();
        }

        if let Some(config_path) = self.config_path() {
            if config_path.exists() {
                match load_toml::<TomlConfig>(&config_path) {
                    Ok(TomlConfig {
                        root_folder: Some(root),
                        ..
                    }) => return root,
                    Ok(_) => {}
                    Err(e) => warn!("Ignoring {}: {}", config_path.display(), e),
                }
            }
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder and derives file paths inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Path of a database file inside the root folder
    pub fn database_path(&self, file_name: &str) -> PathBuf {
        self.root_folder.join(file_name)
    }
}

/// Module TOML location for the platform
pub fn config_file_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fdc").join(format!("{}.toml", module_name)))
}

/// Read and parse a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Read a TOML file, falling back to defaults when missing or invalid
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> T {
    let Some(path) = path else {
        warn!("No config directory on this platform, using defaults");
        return T::default();
    };

    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return T::default();
    }

    match load_toml(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}; using defaults", e);
            T::default()
        }
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("fdc"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/fdc"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("fdc"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/fdc"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("fdc"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\fdc"))
    } else {
        PathBuf::from("./fdc_data")
    }
}
