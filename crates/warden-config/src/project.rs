//! Project Configuration (warden.toml)
//!
//! Handles project-level configuration stored in `warden.toml` at the project root.

use crate::settings::{
    validate_severity, AnalysisConfig, PolicySettings, SandboxSection, ValidatorConfig,
};
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Project configuration from warden.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectMeta>,

    /// Static analysis configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisConfig>,

    /// Sandbox ceilings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxSection>,

    /// Validator cache and history
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator: Option<ValidatorConfig>,

    /// Per-capability validation policies
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policy: Vec<PolicySettings>,
}

/// Project metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProjectMeta {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Directories scanned by `warden scan` when no path is given
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl ProjectConfig {
    /// Load project configuration from a file
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

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(meta) = &self.project {
            if meta.name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "project.name".to_string(),
                    reason: "name cannot be empty".to_string(),
                });
            }
        }

        if let Some(severity) = self
            .analysis
            .as_ref()
            .and_then(|a| a.block_severity.as_deref())
        {
            validate_severity("analysis.block_severity", severity)?;
        }

        for (i, policy) in self.policy.iter().enumerate() {
            policy.validate()?;
            if self.policy[..i]
                .iter()
                .any(|p| p.capability == policy.capability)
            {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate [[policy]] for '{}'",
                    policy.capability
                )));
            }
        }

        Ok(())
    }

    /// Get the project name, if present
    pub fn project_name(&self) -> Option<&str> {
        self.project.as_ref().map(|p| p.name.as_str())
    }

    /// Source directories listed in the project table
    pub fn sources(&self) -> &[String] {
        self.project
            .as_ref()
            .map(|p| p.sources.as_slice())
            .unwrap_or(&[])
    }
}
