//! CLI configuration via environment variables
//!
//! Terminal preferences only; analysis, sandbox and policy settings come from
//! warden.toml through `warden_config`.

use std::env;

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Default to JSON output (WARDEN_JSON=1)
    pub default_json: bool,
    /// Disable colored output (WARDEN_NO_COLOR=1 or NO_COLOR=1)
    pub no_color: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            default_json: env::var("WARDEN_JSON")
                .map(|v| is_truthy(&v))
                .unwrap_or(false),
            no_color: env::var("WARDEN_NO_COLOR").is_ok() || env::var("NO_COLOR").is_ok(),
        }
    }

    /// Apply global-config output preferences where the environment is silent
    pub fn with_global(mut self, global: &warden_config::GlobalConfig) -> Self {
        if env::var("WARDEN_JSON").is_err() {
            if let Some(json) = global.json_output() {
                self.default_json = json;
            }
        }
        if !self.no_color {
            if let Some(color) = global.color_output() {
                self.no_color = !color;
            }
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn is_truthy(value: &str) -> bool {
    let lower = value.to_lowercase();
    !(lower.is_empty() || lower == "0" || lower == "false" || lower == "off")
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_config::global::OutputConfig;
    use warden_config::GlobalConfig;

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("yes"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("False"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn test_global_color_preference() {
        let config = Config {
            default_json: false,
            no_color: false,
        };
        let global = GlobalConfig {
            output: Some(OutputConfig {
                json: None,
                color: Some(false),
            }),
            ..Default::default()
        };
        assert!(config.with_global(&global).no_color);
    }
}
