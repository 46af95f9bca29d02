//! Configuration loading and precedence tests

use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use warden_config::{ConfigError, ConfigLoader, SandboxSettings};

fn create_config_file(dir: &Path, content: &str) -> PathBuf {
    let config_path = dir.join("warden.toml");
    fs::write(&config_path, content).unwrap();
    config_path
}

fn loader_without_global(dir: &Path) -> ConfigLoader {
    ConfigLoader::new().with_global_config_path(dir.join("missing-global.toml"))
}

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
#[serial]
fn test_load_when_no_config_exists() {
    let temp_dir = TempDir::new().unwrap();

    let mut loader = loader_without_global(temp_dir.path());
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert!(!config.is_project());
    assert_eq!(config.project_name(), None);
    assert_eq!(config.sandbox, SandboxSettings::default());
    assert!(config.policies().is_empty());
}

#[test]
#[serial]
fn test_load_from_nested_subdirectory() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[project]\nname = \"nested\"\n");

    let deep = temp_dir.path().join("a").join("b").join("c");
    fs::create_dir_all(&deep).unwrap();

    let mut loader = loader_without_global(temp_dir.path());
    let config = loader.load_from_directory(&deep).unwrap();

    assert_eq!(config.project_name(), Some("nested"));
    assert_eq!(config.project_root(), Some(temp_dir.path()));
}

#[test]
#[serial]
fn test_policies_are_carried_through() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        r#"
[[policy]]
capability = "file.read"
allow = ["/srv/data/**"]
deny = ["/srv/data/secrets/**"]

[[policy.indicators]]
name = "dump"
pattern = "\\.sql$"
score = 0.4
"#,
    );

    let mut loader = loader_without_global(temp_dir.path());
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    let policies = config.policies();
    assert_eq!(policies.len(), 1);
    assert_eq!(policies[0].capability, "file.read");
    assert_eq!(policies[0].deny, vec!["/srv/data/secrets/**".to_string()]);
    assert_eq!(policies[0].indicators[0].name, "dump");
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[test]
#[serial]
fn test_invalid_toml_reports_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(temp_dir.path(), "[sandbox\nwall_clock_ms = 1");

    let mut loader = loader_without_global(temp_dir.path());
    match loader.load_from_directory(temp_dir.path()) {
        Err(ConfigError::TomlParseError { file, .. }) => assert_eq!(file, path),
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_unknown_section_rejected() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[network]\nproxy = \"none\"\n");

    let mut loader = loader_without_global(temp_dir.path());
    assert!(loader.load_from_directory(temp_dir.path()).is_err());
}

#[test]
#[serial]
fn test_missing_explicit_file() {
    let temp_dir = TempDir::new().unwrap();

    let mut loader = loader_without_global(temp_dir.path());
    let result = loader.load_from_file(&temp_dir.path().join("nope.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[rstest]
#[case("[sandbox]\nwall_clock_ms = 0\n")]
#[case("[sandbox]\ninterpreter = []\n")]
#[case("[analysis]\nconfidence_floor = -0.1\n")]
#[case("[analysis]\nblock_severity = \"extreme\"\n")]
#[case("[validator]\nhistory_capacity = 0\n")]
#[case("[[policy]]\ncapability = \"\"\n")]
#[serial]
fn test_invalid_values_rejected(#[case] content: &str) {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), content);

    let mut loader = loader_without_global(temp_dir.path());
    assert!(loader.load_from_directory(temp_dir.path()).is_err());
}

// ============================================================================
// Precedence Tests
// ============================================================================

#[test]
#[serial]
fn test_global_fills_gaps_project_wins_conflicts() {
    let temp_dir = TempDir::new().unwrap();
    let global = temp_dir.path().join("global.toml");
    fs::write(
        &global,
        r#"
[sandbox]
wall_clock_ms = 3000
memory_limit_mb = 64

[validator]
cache_size = 16
"#,
    )
    .unwrap();
    create_config_file(temp_dir.path(), "[sandbox]\nwall_clock_ms = 750\n");

    let mut loader = ConfigLoader::new().with_global_config_path(&global);
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert_eq!(config.sandbox.wall_clock_ms, 750);
    assert_eq!(config.sandbox.memory_limit_mb, 64);
    assert_eq!(config.validator.cache_size, 16);
}

#[test]
#[serial]
fn test_env_overrides_project() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        "[sandbox]\nmemory_limit_mb = 512\n\n[analysis]\nblock_severity = \"critical\"\n",
    );

    env::set_var("WARDEN_MEMORY_LIMIT", "32");
    env::set_var("WARDEN_BLOCK_SEVERITY", "Medium");

    let mut loader = loader_without_global(temp_dir.path());
    let result = loader.load_from_directory(temp_dir.path());

    env::remove_var("WARDEN_MEMORY_LIMIT");
    env::remove_var("WARDEN_BLOCK_SEVERITY");

    let config = result.unwrap();
    assert_eq!(config.sandbox.memory_limit_mb, 32);
    assert_eq!(config.analysis.block_severity, "medium");
}

#[test]
#[serial]
fn test_env_override_is_validated() {
    let temp_dir = TempDir::new().unwrap();

    env::set_var("WARDEN_CONFIDENCE_FLOOR", "2.5");

    let mut loader = loader_without_global(temp_dir.path());
    let result = loader.load_from_directory(temp_dir.path());

    env::remove_var("WARDEN_CONFIDENCE_FLOOR");
    assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
}
