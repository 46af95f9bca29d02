//! Configuration sections and resolved settings
//!
//! Each `[section]` in a config file deserializes into a `*Config` struct whose
//! fields are all optional. Layers are folded onto the built-in defaults to
//! produce the `*Settings` structs the runtime consumes.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

const SEVERITIES: [&str; 4] = ["low", "medium", "high", "critical"];

/// `[analysis]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Pattern matches below this confidence are dropped (0.0..=1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_floor: Option<f64>,

    /// Severity at which execution is blocked ("low" … "critical")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_severity: Option<String>,

    /// Worker threads for batch analysis (0 = one per core)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Cached reports (0 disables the cache)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<usize>,

    /// Block sources that could not be fully analyzed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_incomplete: Option<bool>,
}

/// `[sandbox]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SandboxSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub wall_clock_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_wait_ms: Option<u64>,

    /// Interpreter command; the code is appended as the last argument
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_bytes: Option<usize>,
}

/// `[validator]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ValidatorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ttl_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_capacity: Option<usize>,
}

/// One `[[policy]]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct PolicySettings {
    /// Capability type, e.g. "file.read"
    pub capability: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub indicators: Vec<IndicatorSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspicious_threshold: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny_threshold: Option<f64>,
}

/// Suspicious-indicator rule inside a policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IndicatorSettings {
    pub name: String,
    /// Regular expression tested against the resource
    pub pattern: String,
    pub score: f64,
}

/// Resolved analysis settings
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    pub confidence_floor: f64,
    pub block_severity: String,
    pub workers: usize,
    pub cache_size: usize,
    pub block_incomplete: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            confidence_floor: 0.5,
            block_severity: "high".to_string(),
            workers: 0,
            cache_size: 256,
            block_incomplete: true,
        }
    }
}

impl AnalysisSettings {
    pub fn apply(&mut self, section: &AnalysisConfig) {
        if let Some(v) = section.confidence_floor {
            self.confidence_floor = v;
        }
        if let Some(v) = &section.block_severity {
            self.block_severity = v.clone();
        }
        if let Some(v) = section.workers {
            self.workers = v;
        }
        if let Some(v) = section.cache_size {
            self.cache_size = v;
        }
        if let Some(v) = section.block_incomplete {
            self.block_incomplete = v;
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(ConfigError::InvalidValue {
                field: "analysis.confidence_floor".to_string(),
                reason: format!("must be within 0.0..=1.0, got {}", self.confidence_floor),
            });
        }
        validate_severity("analysis.block_severity", &self.block_severity)
    }
}

/// Resolved sandbox settings
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSettings {
    pub cpu_time_ms: u64,
    pub memory_limit_mb: u64,
    pub wall_clock_ms: u64,
    pub grace_period_ms: u64,
    pub poll_interval_ms: u64,
    pub termination_wait_ms: u64,
    pub interpreter: Vec<String>,
    pub max_output_bytes: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            cpu_time_ms: 5_000,
            memory_limit_mb: 256,
            wall_clock_ms: 10_000,
            grace_period_ms: 500,
            poll_interval_ms: 100,
            termination_wait_ms: 100,
            interpreter: vec!["/bin/sh".to_string(), "-c".to_string()],
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl SandboxSettings {
    pub fn apply(&mut self, section: &SandboxSection) {
        if let Some(v) = section.cpu_time_ms {
            self.cpu_time_ms = v;
        }
        if let Some(v) = section.memory_limit_mb {
            self.memory_limit_mb = v;
        }
        if let Some(v) = section.wall_clock_ms {
            self.wall_clock_ms = v;
        }
        if let Some(v) = section.grace_period_ms {
            self.grace_period_ms = v;
        }
        if let Some(v) = section.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = section.termination_wait_ms {
            self.termination_wait_ms = v;
        }
        if let Some(v) = &section.interpreter {
            self.interpreter = v.clone();
        }
        if let Some(v) = section.max_output_bytes {
            self.max_output_bytes = v;
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("sandbox.cpu_time_ms", self.cpu_time_ms),
            ("sandbox.memory_limit_mb", self.memory_limit_mb),
            ("sandbox.wall_clock_ms", self.wall_clock_ms),
            ("sandbox.poll_interval_ms", self.poll_interval_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.interpreter.first().map_or(true, |p| p.is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "sandbox.interpreter".to_string(),
                reason: "interpreter cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolved validator settings
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorSettings {
    pub cache_ttl_ms: u64,
    pub cache_size: usize,
    pub history_capacity: usize,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5_000,
            cache_size: 512,
            history_capacity: 1024,
        }
    }
}

impl ValidatorSettings {
    pub fn apply(&mut self, section: &ValidatorConfig) {
        if let Some(v) = section.cache_ttl_ms {
            self.cache_ttl_ms = v;
        }
        if let Some(v) = section.cache_size {
            self.cache_size = v;
        }
        if let Some(v) = section.history_capacity {
            self.history_capacity = v;
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.history_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "validator.history_capacity".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl PolicySettings {
    /// Shape checks only; patterns and regexes are compiled by the runtime
    pub fn validate(&self) -> ConfigResult<()> {
        if self.capability.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "policy.capability".to_string(),
                reason: "capability cannot be empty".to_string(),
            });
        }
        for indicator in &self.indicators {
            if indicator.name.is_empty() || indicator.pattern.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("policy.{}.indicators", self.capability),
                    reason: "indicator name and pattern cannot be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_severity(field: &str, value: &str) -> ConfigResult<()> {
    if !SEVERITIES.contains(&value) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!(
                "must be one of {}, got '{}'",
                SEVERITIES.join(", "),
                value
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overrides_only_present_fields() {
        let mut settings = SandboxSettings::default();
        settings.apply(&SandboxSection {
            wall_clock_ms: Some(250),
            ..Default::default()
        });
        assert_eq!(settings.wall_clock_ms, 250);
        assert_eq!(settings.grace_period_ms, 500);
    }

    #[test]
    fn test_invalid_severity() {
        let settings = AnalysisSettings {
            block_severity: "severe".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_confidence_floor_range() {
        let mut settings = AnalysisSettings::default();
        settings.apply(&AnalysisConfig {
            confidence_floor: Some(1.5),
            ..Default::default()
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_empty_interpreter_rejected() {
        let settings = SandboxSettings {
            interpreter: Vec::new(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
