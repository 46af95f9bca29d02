//! Global Configuration (~/.warden/config.toml)
//!
//! Handles user-level defaults stored in `~/.warden/config.toml`. Policies are
//! project-scoped and cannot be set here.

use crate::settings::{validate_severity, AnalysisConfig, SandboxSection, ValidatorConfig};
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.warden/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator: Option<ValidatorConfig>,

    /// Terminal output preferences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,
}

/// Terminal output preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Emit JSON instead of human-readable text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,

    /// Colorize human-readable output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<bool>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(severity) = self
            .analysis
            .as_ref()
            .and_then(|a| a.block_severity.as_deref())
        {
            validate_severity("analysis.block_severity", severity)?;
        }
        Ok(())
    }

    /// Get the global config file path (~/.warden/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".warden").join("config.toml"))
    }

    pub fn json_output(&self) -> Option<bool> {
        self.output.as_ref().and_then(|o| o.json)
    }

    pub fn color_output(&self) -> Option<bool> {
        self.output.as_ref().and_then(|o| o.color)
    }

    /// Merge another global config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &GlobalConfig) {
        if other.analysis.is_some() {
            self.analysis = other.analysis.clone();
        }
        if other.sandbox.is_some() {
            self.sandbox = other.sandbox.clone();
        }
        if other.validator.is_some() {
            self.validator = other.validator.clone();
        }
        if other.output.is_some() {
            self.output = other.output.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_global_config() {
        let toml = r#"
[analysis]
block_severity = "medium"

[sandbox]
cpu_time_ms = 2000

[validator]
history_capacity = 64

[output]
json = true
color = false
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.json_output(), Some(true));
        assert_eq!(config.color_output(), Some(false));
    }

    #[test]
    fn test_policy_not_allowed_globally() {
        let toml = r#"
[[policy]]
capability = "file.read"
"#;
        assert!(toml::from_str::<GlobalConfig>(toml).is_err());
    }

    #[test]
    fn test_merge_configs() {
        let mut base = GlobalConfig::default();
        let override_config = GlobalConfig {
            output: Some(OutputConfig {
                json: Some(true),
                color: None,
            }),
            ..Default::default()
        };

        base.merge(&override_config);
        assert_eq!(base.json_output(), Some(true));
    }
}
