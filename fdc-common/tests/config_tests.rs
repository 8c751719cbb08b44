//! Root folder resolution and TOML fallback behavior
//!
//! Tests touching `FDC_ROOT_FOLDER` are marked `#[serial]` so they never see
//! each other's environment.

use fdc_common::config::{
    load_toml, load_toml_or_default, CompiledDefaults, RootFolderInitializer, RootFolderResolver,
    TomlConfig, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::PathBuf;

const MODULE: &str = "fdc-config-test-module";

#[test]
#[serial]
fn test_resolver_without_overrides_uses_compiled_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let root = RootFolderResolver::new(MODULE).resolve();
    assert_eq!(root, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
#[serial]
fn test_resolver_env_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/fdc-from-env");

    let root = RootFolderResolver::new(MODULE)
        .with_toml_root(Some(PathBuf::from("/tmp/fdc-from-toml")))
        .resolve();
    assert_eq!(root, PathBuf::from("/tmp/fdc-from-env"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_cli_beats_env() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/fdc-from-env");

    let root = RootFolderResolver::new(MODULE)
        .with_cli_arg(Some(PathBuf::from("/tmp/fdc-from-cli")))
        .with_toml_root(Some(PathBuf::from("/tmp/fdc-from-toml")))
        .resolve();
    assert_eq!(root, PathBuf::from("/tmp/fdc-from-cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_blank_env_is_ignored() {
    env::set_var(ROOT_FOLDER_ENV, "   ");

    let root = RootFolderResolver::new(MODULE)
        .with_toml_root(Some(PathBuf::from("/tmp/fdc-from-toml")))
        .resolve();
    assert_eq!(root, PathBuf::from("/tmp/fdc-from-toml"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
fn test_initializer_creates_nested_root() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("a").join("b");

    let initializer = RootFolderInitializer::new(root.clone());
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert_eq!(initializer.database_path("x.db"), root.join("x.db"));
}

#[test]
fn test_missing_toml_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config: TomlConfig = load_toml_or_default(Some(&dir.path().join("absent.toml")));
    assert!(config.root_folder.is_none());
    assert!(config.logging.level.is_none());
}

#[test]
fn test_invalid_toml_falls_back_to_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "root_folder = [not toml").unwrap();

    assert!(load_toml::<TomlConfig>(file.path()).is_err());
    let config: TomlConfig = load_toml_or_default(Some(file.path()));
    assert!(config.root_folder.is_none());
}

#[test]
fn test_toml_root_and_logging_parse() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "root_folder = \"/srv/fdc\"\n\n[logging]\nlevel = \"fdc_ingest=debug\""
    )
    .unwrap();

    let config: TomlConfig = load_toml(file.path()).unwrap();
    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/fdc")));
    assert_eq!(config.logging.level.as_deref(), Some("fdc_ingest=debug"));
}
