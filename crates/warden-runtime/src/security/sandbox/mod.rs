//! Process sandbox
//!
//! Authorized code runs in a child process under a supervisory thread that
//! polls its resource usage and tears it down on breach. The caller blocks
//! until the child completes or is terminated; the whole sequence is bounded
//! by `wall_clock_timeout + grace_period` plus the reap and join waits.

mod executor;
mod monitor;

pub use executor::SandboxExecutor;
pub use monitor::{ResourceMonitor, ResourceUsageSnapshot};

use crate::security::capability::token::{CapabilityToken, TokenSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use warden_config::SandboxSettings;

/// Environment variable carrying the granted tokens as JSON
pub const CAPABILITIES_ENV: &str = "WARDEN_CAPABILITIES";

/// Lower bound on any wait for a signalled child to exit
pub const MIN_TERMINATION_WAIT: Duration = Duration::from_millis(100);

/// Sandbox errors
///
/// Limit breaches are not errors; they are reported in [`ExecutionResult`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    #[error("Failed to spawn '{command}': {message}")]
    SpawnFailed { command: String, message: String },

    #[error("Sandboxed process {pid} could not be killed")]
    ForceKillFailed { pid: u32 },

    #[error("Sandbox I/O error: {0}")]
    Io(String),

    #[error("Invalid sandbox configuration: {0}")]
    InvalidConfig(String),
}

/// Ceilings and environment for one sandboxed run
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxConfig {
    pub cpu_time_limit: Duration,
    /// Resident memory ceiling in bytes
    pub memory_limit: u64,
    pub wall_clock_timeout: Duration,
    /// How long a child may take to exit after SIGTERM before SIGKILL
    pub grace_period: Duration,
    pub poll_interval: Duration,
    /// Wait slice after each signal; never below [`MIN_TERMINATION_WAIT`]
    pub termination_wait: Duration,
    /// Bound on joining the output readers once the child is gone
    pub join_timeout: Duration,
    /// Program and leading arguments; the code is appended as the last argument
    pub interpreter: Vec<String>,
    /// Tokens handed to the child
    pub capabilities: Vec<TokenSnapshot>,
    /// Variables passed through in addition to `PATH`
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Captured bytes per stream; the rest is drained and discarded
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            cpu_time_limit: Duration::from_secs(5),
            memory_limit: 256 * 1024 * 1024,
            wall_clock_timeout: Duration::from_secs(10),
            grace_period: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            termination_wait: MIN_TERMINATION_WAIT,
            join_timeout: Duration::from_secs(1),
            interpreter: vec!["/bin/sh".to_string(), "-c".to_string()],
            capabilities: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl SandboxConfig {
    pub fn from_settings(settings: &SandboxSettings) -> Self {
        let defaults = Self::default();
        Self {
            cpu_time_limit: Duration::from_millis(settings.cpu_time_ms),
            memory_limit: settings.memory_limit_mb.saturating_mul(1024 * 1024),
            wall_clock_timeout: Duration::from_millis(settings.wall_clock_ms),
            grace_period: Duration::from_millis(settings.grace_period_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            termination_wait: Duration::from_millis(settings.termination_wait_ms),
            interpreter: if settings.interpreter.is_empty() {
                defaults.interpreter.clone()
            } else {
                settings.interpreter.clone()
            },
            max_output_bytes: settings.max_output_bytes,
            ..defaults
        }
    }

    pub fn with_wall_clock_timeout(mut self, timeout: Duration) -> Self {
        self.wall_clock_timeout = timeout;
        self
    }

    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = bytes;
        self
    }

    pub fn with_cpu_time_limit(mut self, limit: Duration) -> Self {
        self.cpu_time_limit = limit;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Pass a token's current state to the child
    pub fn grant(mut self, token: &CapabilityToken) -> Self {
        self.capabilities.push(token.snapshot());
        self
    }

    /// Effective wait after a signal
    pub fn signal_wait(&self) -> Duration {
        self.termination_wait.max(MIN_TERMINATION_WAIT)
    }

    /// Upper bound on one run, from spawn to the last reap attempt
    pub fn supervision_bound(&self) -> Duration {
        self.wall_clock_timeout + self.grace_period.max(self.signal_wait()) + self.signal_wait() + self.poll_interval
    }

    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.interpreter.is_empty() || self.interpreter[0].is_empty() {
            return Err(SandboxError::InvalidConfig("interpreter must not be empty".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(SandboxError::InvalidConfig("poll interval must be positive".to_string()));
        }
        if self.wall_clock_timeout.is_zero() {
            return Err(SandboxError::InvalidConfig("wall clock timeout must be positive".to_string()));
        }
        if self.memory_limit == 0 {
            return Err(SandboxError::InvalidConfig("memory limit must be positive".to_string()));
        }
        if self.env.contains_key(CAPABILITIES_ENV) {
            return Err(SandboxError::InvalidConfig(format!(
                "{} is reserved",
                CAPABILITIES_ENV
            )));
        }
        Ok(())
    }
}

/// Lifecycle of one sandboxed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Spawned,
    Running,
    Completed,
    TimedOut,
    ResourceExceeded,
    Terminated,
    Collected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    CpuTime,
    Memory,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LimitKind::CpuTime => "cpu time",
            LimitKind::Memory => "memory",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The child exited on its own
    Completed,
    TimedOut,
    ResourceExceeded(LimitKind),
    /// The child survived SIGKILL and the reap wait
    KillFailed,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Completed => f.write_str("completed"),
            TerminationReason::TimedOut => f.write_str("timed out"),
            TerminationReason::ResourceExceeded(kind) => write!(f, "{} limit exceeded", kind),
            TerminationReason::KillFailed => f.write_str("kill failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// Exit code when the child ran to completion, otherwise why it did not
    pub outcome: Result<i32, String>,
    /// Peak usage observed by the monitor
    pub resource_usage: ResourceUsageSnapshot,
    pub termination_reason: TerminationReason,
    pub states: Vec<ExecutionState>,
    pub elapsed: Duration,
    #[serde(default)]
    pub output_truncated: bool,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Ok(0))
    }

    pub fn final_state(&self) -> Option<ExecutionState> {
        self.states.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.cpu_time_limit, Duration::from_secs(5));
        assert_eq!(config.memory_limit, 256 * 1024 * 1024);
        assert_eq!(config.grace_period, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_signal_wait_has_floor() {
        let config = SandboxConfig {
            termination_wait: Duration::from_millis(5),
            ..Default::default()
        };
        assert_eq!(config.signal_wait(), MIN_TERMINATION_WAIT);
    }

    #[test]
    fn test_reserved_env_rejected() {
        let config = SandboxConfig::default().with_env(CAPABILITIES_ENV, "[]");
        assert!(matches!(config.validate(), Err(SandboxError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_settings() {
        let settings = SandboxSettings {
            cpu_time_ms: 1000,
            memory_limit_mb: 64,
            wall_clock_ms: 2000,
            grace_period_ms: 200,
            poll_interval_ms: 50,
            termination_wait_ms: 150,
            interpreter: Vec::new(),
            max_output_bytes: 4096,
        };
        let config = SandboxConfig::from_settings(&settings);
        assert_eq!(config.memory_limit, 64 * 1024 * 1024);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.interpreter, SandboxConfig::default().interpreter);
    }
}
