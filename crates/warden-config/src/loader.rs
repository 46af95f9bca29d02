//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::ProjectConfig;
use crate::settings::{AnalysisSettings, PolicySettings, SandboxSettings, ValidatorSettings};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Project config file name
pub const PROJECT_CONFIG_FILE: &str = "warden.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Built-in defaults - lowest priority
/// 2. Global config (~/.warden/config.toml)
/// 3. Project config (./warden.toml) - overrides global
/// 4. Environment variables (WARDEN_*) - overrides project
/// 5. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration as written
    pub project: ProjectConfig,

    /// Global configuration as written
    pub global: GlobalConfig,

    /// Project root directory (where warden.toml was found)
    pub project_root: Option<PathBuf>,

    /// Resolved analysis settings
    pub analysis: AnalysisSettings,

    /// Resolved sandbox settings
    pub sandbox: SandboxSettings,

    /// Resolved validator settings
    pub validator: ValidatorSettings,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use a specific global config file instead of ~/.warden/config.toml
    pub fn with_global_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find warden.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let global_config = self.load_global_config()?;
        self.resolve(project_config, global_config, project_root)
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config()?;
        let project_root = config_path.parent().map(|p| p.to_path_buf());
        self.resolve(project_config, global_config, project_root)
    }

    /// Defaults with only the global config and environment applied
    pub fn load_defaults(&mut self) -> ConfigResult<Config> {
        let global_config = self.load_global_config()?;
        self.resolve(ProjectConfig::default(), global_config, None)
    }

    fn resolve(
        &self,
        project: ProjectConfig,
        global: GlobalConfig,
        project_root: Option<PathBuf>,
    ) -> ConfigResult<Config> {
        let mut config = Config {
            analysis: AnalysisSettings::default(),
            sandbox: SandboxSettings::default(),
            validator: ValidatorSettings::default(),
            project,
            global,
            project_root,
        };

        for layer in [&config.global.analysis, &config.project.analysis]
            .into_iter()
            .flatten()
        {
            config.analysis.apply(layer);
        }
        for layer in [&config.global.sandbox, &config.project.sandbox]
            .into_iter()
            .flatten()
        {
            config.sandbox.apply(layer);
        }
        for layer in [&config.global.validator, &config.project.validator]
            .into_iter()
            .flatten()
        {
            config.validator.apply(layer);
        }

        self.apply_env_overrides(&mut config)?;

        config.analysis.validate()?;
        config.sandbox.validate()?;
        config.validator.validate()?;
        Ok(config)
    }

    /// Find project configuration by walking up directory tree
    ///
    /// Returns (project_root, project_config); no file yields the default config
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_CONFIG_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration from ~/.warden/config.toml
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => match GlobalConfig::global_config_path() {
                Ok(path) => {
                    self.global_config_path = Some(path.clone());
                    path
                }
                // No home directory means no global config
                Err(ConfigError::HomeNotFound) => return Ok(GlobalConfig::default()),
                Err(e) => return Err(e),
            },
        };

        // Global config is optional - if it doesn't exist, return default
        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides to the resolved settings
    fn apply_env_overrides(&self, config: &mut Config) -> ConfigResult<()> {
        if let Some(ms) = env_value::<u64>("WARDEN_TIMEOUT_MS")? {
            config.sandbox.wall_clock_ms = ms;
        }
        if let Some(mb) = env_value::<u64>("WARDEN_MEMORY_LIMIT")? {
            config.sandbox.memory_limit_mb = mb;
        }
        if let Some(floor) = env_value::<f64>("WARDEN_CONFIDENCE_FLOOR")? {
            config.analysis.confidence_floor = floor;
        }
        if let Ok(severity) = env::var("WARDEN_BLOCK_SEVERITY") {
            config.analysis.block_severity = severity.trim().to_lowercase();
        }
        if let Some(workers) = env_value::<usize>("WARDEN_WORKERS")? {
            config.analysis.workers = workers;
        }
        Ok(())
    }

    /// Get the global configuration directory (~/.warden)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".warden"))
    }

    /// Ensure global configuration directory exists
    pub fn ensure_global_config_dir() -> ConfigResult<PathBuf> {
        let dir = Self::global_config_dir()?;
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn env_value<T: FromStr>(name: &str) -> ConfigResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                field: name.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Get the project name
    pub fn project_name(&self) -> Option<&str> {
        self.project.project_name()
    }

    /// Check if this is a project (has warden.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }

    /// Policies declared by the project
    pub fn policies(&self) -> &[PolicySettings] {
        &self.project.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(PROJECT_CONFIG_FILE);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    fn isolated_loader(dir: &Path) -> ConfigLoader {
        ConfigLoader::new().with_global_config_path(dir.join("no-global.toml"))
    }

    #[test]
    #[serial]
    fn test_load_project_config() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[project]
name = "test-project"

[sandbox]
wall_clock_ms = 1500
"#,
        );

        let mut loader = isolated_loader(temp_dir.path());
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.project_name(), Some("test-project"));
        assert!(config.is_project());
        assert_eq!(config.sandbox.wall_clock_ms, 1500);
        assert_eq!(config.sandbox.grace_period_ms, 500);
    }

    #[test]
    #[serial]
    fn test_find_config_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[project]\nname = \"parent-project\"\n");

        let sub_dir = temp_dir.path().join("subdir");
        fs::create_dir(&sub_dir).unwrap();

        let mut loader = isolated_loader(temp_dir.path());
        let config = loader.load_from_directory(&sub_dir).unwrap();

        assert_eq!(config.project_name(), Some("parent-project"));
        assert_eq!(config.project_root(), Some(temp_dir.path()));
    }

    #[test]
    #[serial]
    fn test_project_overrides_global() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("global.toml");
        fs::write(
            &global,
            "[analysis]\nblock_severity = \"medium\"\nworkers = 2\n",
        )
        .unwrap();
        create_config_file(temp_dir.path(), "[analysis]\nworkers = 8\n");

        let mut loader = ConfigLoader::new().with_global_config_path(&global);
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.analysis.block_severity, "medium");
        assert_eq!(config.analysis.workers, 8);
    }

    #[test]
    #[serial]
    fn test_env_override_timeout() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[sandbox]\nwall_clock_ms = 1500\n");

        env::set_var("WARDEN_TIMEOUT_MS", "200");

        let mut loader = isolated_loader(temp_dir.path());
        let config = loader.load_from_directory(temp_dir.path());

        env::remove_var("WARDEN_TIMEOUT_MS");
        assert_eq!(config.unwrap().sandbox.wall_clock_ms, 200);
    }

    #[test]
    #[serial]
    fn test_env_override_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();

        env::set_var("WARDEN_WORKERS", "many");

        let mut loader = isolated_loader(temp_dir.path());
        let result = loader.load_from_directory(temp_dir.path());

        env::remove_var("WARDEN_WORKERS");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    #[serial]
    fn test_load_from_specific_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config_file(
            temp_dir.path(),
            "[project]\nname = \"specific-file\"\n",
        );

        let mut loader = isolated_loader(temp_dir.path());
        let config = loader.load_from_file(&config_path).unwrap();

        assert_eq!(config.project_name(), Some("specific-file"));
    }
}
