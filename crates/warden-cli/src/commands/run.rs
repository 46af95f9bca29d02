//! Run command - gate a script, then execute it in the sandbox

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use warden_config::Config;
use warden_runtime::security::{
    AnalysisOptions, CapabilityManager, LogAuditLogger, PipelineError, SandboxConfig,
    SecurePipeline,
};

pub struct RunOptions {
    /// Executed instead of the script text when non-empty
    pub command: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub memory_mb: Option<u64>,
    pub json: bool,
}

pub fn run(settings: &Config, file: &Path, options: &RunOptions) -> Result<()> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("Failed to read source file: {}", file.display()))?;

    let sandbox = sandbox_config(settings, options);
    let manager = CapabilityManager::new(Arc::new(super::project_validator(settings)?));
    let pipeline = SecurePipeline::new(AnalysisOptions::from_settings(&settings.analysis), sandbox)
        .with_manager(manager)
        .with_audit_logger(Arc::new(LogAuditLogger));

    let code = if options.command.is_empty() {
        source.clone()
    } else {
        options.command.join(" ")
    };

    let result = match pipeline.execute(&source, &code) {
        Ok(result) => result,
        Err(PipelineError::Blocked { report }) => {
            if options.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                super::print_report(&file.display().to_string(), &report);
            }
            bail!("{} blocked by static analysis", file.display());
        }
        Err(e) => return Err(e.into()),
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
        std::io::stdout().flush()?;
        let status = match &result.outcome {
            Ok(code) => format!("exit {}", code),
            Err(reason) => reason.clone(),
        };
        eprintln!(
            "{} {} ({}) in {} ms, peak memory {} KiB",
            "warden:".dimmed(),
            status,
            result.termination_reason,
            result.elapsed.as_millis(),
            result.resource_usage.memory_bytes / 1024
        );
        if result.output_truncated {
            eprintln!("{} output truncated", "warden:".dimmed());
        }
    }

    if !result.succeeded() {
        bail!("sandboxed process {}", result.termination_reason);
    }
    Ok(())
}

/// Resolved sandbox settings with command-line overrides on top
fn sandbox_config(settings: &Config, options: &RunOptions) -> SandboxConfig {
    let mut config = SandboxConfig::from_settings(&settings.sandbox);
    if let Some(ms) = options.timeout_ms {
        config = config.with_wall_clock_timeout(Duration::from_millis(ms));
    }
    if let Some(mb) = options.memory_mb {
        config = config.with_memory_limit(mb.saturating_mul(1024 * 1024));
    }
    if let Some(root) = settings.project_root() {
        config.working_dir = Some(root.to_path_buf());
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_config::ConfigLoader;

    #[test]
    fn test_flags_override_settings() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = ConfigLoader::new()
            .with_global_config_path(dir.path().join("none.toml"))
            .load_defaults()
            .unwrap();
        let options = RunOptions {
            command: Vec::new(),
            timeout_ms: Some(250),
            memory_mb: Some(8),
            json: false,
        };
        let config = sandbox_config(&settings, &options);
        assert_eq!(config.wall_clock_timeout, Duration::from_millis(250));
        assert_eq!(config.memory_limit, 8 * 1024 * 1024);
    }
}
