//! Warden Configuration System
//!
//! Provides configuration management for warden including:
//! - Project configuration (warden.toml)
//! - Global user configuration (~/.warden/config.toml)
//! - Resolved settings consumed by the runtime
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config (~/.warden/config.toml)
//! 3. Project config (./warden.toml)
//! 4. Environment variables (WARDEN_*)
//! 5. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use warden_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("wall clock limit: {} ms", config.sandbox.wall_clock_ms);
//! ```

pub mod global;
pub mod loader;
pub mod project;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use global::GlobalConfig;
pub use loader::{Config, ConfigLoader};
pub use project::ProjectConfig;
pub use settings::{
    AnalysisSettings, IndicatorSettings, PolicySettings, SandboxSettings, ValidatorSettings,
};
