//! Validation policy definition and loading

use crate::security::capability::pattern::ResourcePattern;
use crate::security::types::{CapabilityType, Severity};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use warden_config::PolicySettings;

use super::{DENY_SCORE_THRESHOLD, SUSPICION_THRESHOLD};

/// Policy errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("Policy parse error: {0}")]
    ParseError(String),

    #[error("Policy validation error: {0}")]
    ValidationError(String),

    #[error("Invalid policy field: {field} - {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Policy not found: {0}")]
    NotFound(String),
}

/// Suspicious-indicator matcher with its score contribution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IndicatorRule {
    pub name: String,
    /// Regular expression tested against the resource
    pub pattern: String,
    pub score: f64,
}

/// Rule set for one capability type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ValidationPolicy {
    pub capability: CapabilityType,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,

    /// When non-empty, resources outside these patterns are denied
    #[serde(default, rename = "allow")]
    pub allowed_patterns: Vec<String>,

    /// Always denied, taking priority over `allow`
    #[serde(default, rename = "deny")]
    pub denied_patterns: Vec<String>,

    #[serde(default)]
    pub indicators: Vec<IndicatorRule>,

    #[serde(default = "default_suspicious_threshold")]
    pub suspicious_threshold: f64,

    #[serde(default = "default_deny_threshold")]
    pub deny_threshold: f64,

    /// Severity of a denied-pattern match; never below high
    #[serde(default = "default_denied_severity")]
    pub denied_severity: Severity,
}

fn default_suspicious_threshold() -> f64 {
    SUSPICION_THRESHOLD
}

fn default_deny_threshold() -> f64 {
    DENY_SCORE_THRESHOLD
}

fn default_denied_severity() -> Severity {
    Severity::High
}

/// A policy file: `[[policy]]` tables in TOML, `{"policy": [...]}` in JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PolicyFile {
    #[serde(default)]
    pub policy: Vec<ValidationPolicy>,
}

impl PolicyFile {
    pub fn from_toml(content: &str) -> Result<Self, PolicyError> {
        let file: Self = toml::from_str(content).map_err(|e| PolicyError::ParseError(e.to_string()))?;
        file.validate()?;
        Ok(file)
    }

    pub fn from_json(content: &str) -> Result<Self, PolicyError> {
        let file: Self =
            serde_json::from_str(content).map_err(|e| PolicyError::ParseError(e.to_string()))?;
        file.validate()?;
        Ok(file)
    }

    /// Load by extension: `.json` is JSON, anything else TOML
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PolicyError::NotFound(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content),
        }
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        for (i, policy) in self.policy.iter().enumerate() {
            if self.policy[..i].iter().any(|p| p.capability == policy.capability) {
                return Err(PolicyError::ValidationError(format!(
                    "duplicate policy for {}",
                    policy.capability
                )));
            }
            policy.validate()?;
        }
        Ok(())
    }

    pub fn get(&self, capability: CapabilityType) -> Option<&ValidationPolicy> {
        self.policy.iter().find(|p| p.capability == capability)
    }
}

impl ValidationPolicy {
    /// Empty, non-limiting policy
    pub fn new(capability: CapabilityType) -> Self {
        Self {
            capability,
            description: None,
            allowed_patterns: Vec::new(),
            denied_patterns: Vec::new(),
            indicators: Vec::new(),
            suspicious_threshold: SUSPICION_THRESHOLD,
            deny_threshold: DENY_SCORE_THRESHOLD,
            denied_severity: Severity::High,
        }
    }

    pub fn allow(mut self, pattern: impl Into<String>) -> Self {
        self.allowed_patterns.push(pattern.into());
        self
    }

    pub fn deny(mut self, pattern: impl Into<String>) -> Self {
        self.denied_patterns.push(pattern.into());
        self
    }

    pub fn indicator(mut self, name: impl Into<String>, pattern: impl Into<String>, score: f64) -> Self {
        self.indicators.push(IndicatorRule {
            name: name.into(),
            pattern: pattern.into(),
            score,
        });
        self
    }

    /// Load a single policy from TOML
    pub fn from_toml(content: &str) -> Result<Self, PolicyError> {
        let policy: Self =
            toml::from_str(content).map_err(|e| PolicyError::ParseError(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load a single policy from JSON
    pub fn from_json(content: &str) -> Result<Self, PolicyError> {
        let policy: Self =
            serde_json::from_str(content).map_err(|e| PolicyError::ParseError(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn from_settings(settings: &PolicySettings) -> Result<Self, PolicyError> {
        let capability = settings
            .capability
            .parse()
            .map_err(|reason| PolicyError::InvalidField {
                field: "capability".to_string(),
                reason,
            })?;
        let mut policy = Self::new(capability);
        policy.description = settings.description.clone();
        policy.allowed_patterns = settings.allow.clone();
        policy.denied_patterns = settings.deny.clone();
        policy.indicators = settings
            .indicators
            .iter()
            .map(|i| IndicatorRule {
                name: i.name.clone(),
                pattern: i.pattern.clone(),
                score: i.score,
            })
            .collect();
        if let Some(t) = settings.suspicious_threshold {
            policy.suspicious_threshold = t;
        }
        if let Some(t) = settings.deny_threshold {
            policy.deny_threshold = t;
        }
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.suspicious_threshold.is_nan() || self.suspicious_threshold <= 0.0 {
            return Err(PolicyError::InvalidField {
                field: "suspicious_threshold".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.deny_threshold < self.suspicious_threshold {
            return Err(PolicyError::InvalidField {
                field: "deny_threshold".to_string(),
                reason: "must not be below suspicious_threshold".to_string(),
            });
        }
        if self.denied_severity < Severity::High {
            return Err(PolicyError::InvalidField {
                field: "denied_severity".to_string(),
                reason: "denied resources are at least high severity".to_string(),
            });
        }
        for pattern in self.allowed_patterns.iter().chain(&self.denied_patterns) {
            self.validate_pattern(pattern)?;
        }
        for indicator in &self.indicators {
            if !(0.0..=1.0).contains(&indicator.score) {
                return Err(PolicyError::InvalidField {
                    field: format!("indicators.{}.score", indicator.name),
                    reason: "must be within 0.0..=1.0".to_string(),
                });
            }
            Regex::new(&indicator.pattern).map_err(|e| PolicyError::InvalidField {
                field: format!("indicators.{}.pattern", indicator.name),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn validate_pattern(&self, pattern: &str) -> Result<(), PolicyError> {
        if pattern.is_empty() {
            return Err(PolicyError::InvalidField {
                field: "pattern".to_string(),
                reason: "Pattern cannot be empty".to_string(),
            });
        }
        if self.capability.segment_separator() == Some('/')
            && !pattern.starts_with('/')
            && !pattern.starts_with('*')
        {
            return Err(PolicyError::InvalidField {
                field: "pattern".to_string(),
                reason: format!("file pattern '{}' must be absolute or start with a wildcard", pattern),
            });
        }
        ResourcePattern::new(pattern, self.capability.segment_separator())
            .map(|_| ())
            .map_err(|e| PolicyError::InvalidField {
                field: "pattern".to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_load_policy_file_from_toml() {
        let toml = r#"
            [[policy]]
            capability = "file.read"
            allow = ["/data/**"]
            deny = ["/data/secret/**"]

            [[policy.indicators]]
            name = "backup"
            pattern = "\\.bak$"
            score = 0.5

            [[policy]]
            capability = "network.connect"
            allow = ["*.example.com"]
            suspicious_threshold = 0.4
        "#;
        let file = PolicyFile::from_toml(toml).unwrap();
        assert_eq!(file.policy.len(), 2);
        let read = file.get(CapabilityType::FileRead).unwrap();
        assert_eq!(read.denied_patterns, vec!["/data/secret/**".to_string()]);
        assert_eq!(read.indicators[0].score, 0.5);
        assert_eq!(read.deny_threshold, DENY_SCORE_THRESHOLD);
        let net = file.get(CapabilityType::NetworkConnect).unwrap();
        assert_eq!(net.suspicious_threshold, 0.4);
    }

    #[test]
    fn test_load_single_policy_from_json() {
        let json = r#"{"capability": "process.spawn", "allow": ["/usr/bin/*"]}"#;
        let policy = ValidationPolicy::from_json(json).unwrap();
        assert_eq!(policy.capability, CapabilityType::ProcessSpawn);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
            capability = "file.read"
            alow = ["/data/**"]
        "#;
        assert!(matches!(
            ValidationPolicy::from_toml(toml),
            Err(PolicyError::ParseError(_))
        ));
    }

    #[test]
    fn test_relative_file_pattern_rejected() {
        let policy = ValidationPolicy::new(CapabilityType::FileWrite).allow("data/out");
        assert!(matches!(
            policy.validate(),
            Err(PolicyError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_thresholds_validated() {
        let mut policy = ValidationPolicy::new(CapabilityType::FileRead);
        policy.deny_threshold = 0.2;
        assert!(policy.validate().is_err());

        let mut policy = ValidationPolicy::new(CapabilityType::FileRead);
        policy.denied_severity = Severity::Medium;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_bad_indicator_regex_rejected() {
        let policy = ValidationPolicy::new(CapabilityType::FileRead).indicator("bad", "(", 0.5);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_duplicate_capability_rejected() {
        let file = PolicyFile {
            policy: vec![
                ValidationPolicy::new(CapabilityType::FileRead),
                ValidationPolicy::new(CapabilityType::FileRead),
            ],
        };
        assert!(matches!(file.validate(), Err(PolicyError::ValidationError(_))));
    }
}
