use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

/// Warden: static analysis, capability checks and sandboxed execution for
/// untrusted scripts.
///
/// EXAMPLES:
///     warden scan scripts/                      Analyze every script under scripts/
///     warden run job.wd                         Analyze job.wd, then run it sandboxed
///     warden check -C file.read -r /etc/passwd  Ask the validator about one request
///
/// ENVIRONMENT VARIABLES:
///     WARDEN_JSON       Set to '1' for JSON output by default
///     WARDEN_LOG        Log filter for diagnostics on stderr (e.g. 'debug')
///     WARDEN_TIMEOUT_MS Override the sandbox wall-clock limit
///     NO_COLOR          Set to disable colored output
#[derive(Parser)]
#[command(name = "warden")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Use this project config instead of searching for warden.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Statically analyze script files
    ///
    /// Directories are walked for `.wd` files. Exits non-zero when any file
    /// reaches the blocking severity.
    ///
    /// EXAMPLES:
    ///     warden scan                        Scan the project's source directories
    ///     warden scan job.wd lib/            Scan a file and a directory
    ///     warden scan . --json               Print reports as JSON
    #[command(visible_alias = "s")]
    Scan {
        /// Files or directories to scan (defaults to the project sources)
        paths: Vec<PathBuf>,
        /// Output reports in JSON format
        #[arg(long, env = "WARDEN_JSON")]
        json: bool,
        /// Analyze on the calling thread instead of the worker pool
        #[arg(long)]
        sequential: bool,
        /// Severity at which a file counts as blocked (low, medium, high, critical)
        #[arg(long)]
        block_severity: Option<String>,
    },

    /// Analyze a script and run it in the sandbox
    ///
    /// The script is analyzed first; blocked scripts never start. Capabilities
    /// declared in the script are granted to the sandboxed process.
    ///
    /// EXAMPLES:
    ///     warden run job.wd                      Run the script itself
    ///     warden run job.wd -- ./ingest.sh       Gate on job.wd, run ingest.sh
    ///     warden run job.wd --timeout-ms 500     Tighter wall-clock limit
    #[command(visible_alias = "r")]
    Run {
        /// Script to analyze
        file: PathBuf,
        /// Command to run instead of the script's own text
        #[arg(last = true)]
        command: Vec<String>,
        /// Wall-clock limit in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Memory limit in megabytes
        #[arg(long)]
        memory_mb: Option<u64>,
        /// Output the execution result in JSON format
        #[arg(long, env = "WARDEN_JSON")]
        json: bool,
    },

    /// Validate one capability request against the configured policies
    ///
    /// EXAMPLES:
    ///     warden check -C file.read -r /data/a.csv
    ///     warden check -C network.connect -r evil.onion -o connect --grant '*'
    ///     warden check -C file.read -r /srv/x --policy policies.toml
    #[command(visible_alias = "c")]
    Check {
        /// Capability type, e.g. file.read
        #[arg(long, short = 'C')]
        capability: String,
        /// Concrete resource the operation targets
        #[arg(long, short = 'r')]
        resource: String,
        /// Operation name
        #[arg(long, short = 'o', default_value = "read")]
        operation: String,
        /// Pattern of the token to grant before validating
        #[arg(long, default_value = "**")]
        grant: String,
        /// Additional policy file (TOML, or JSON by extension)
        #[arg(long, short = 'p')]
        policy: Option<PathBuf>,
        /// Output the validation result in JSON format
        #[arg(long, env = "WARDEN_JSON")]
        json: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::new()
            .filter_or("WARDEN_LOG", "warn")
            .write_style("WARDEN_LOG_STYLE"),
    )
    .init();

    let cli = Cli::parse();

    let mut loader = warden_config::ConfigLoader::new();
    let settings = match &cli.config {
        Some(path) => loader.load_from_file(path),
        None => loader.load_from_directory(&std::env::current_dir()?),
    }
    .context("Failed to load configuration")?;

    let cli_config = config::Config::from_env().with_global(&settings.global);
    if cli_config.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Scan {
            paths,
            json,
            sequential,
            block_severity,
        } => {
            let options = commands::scan::ScanOptions {
                json: json || cli_config.default_json,
                sequential,
                block_severity,
            };
            commands::scan::run(&settings, &paths, &options)?;
        }
        Commands::Run {
            file,
            command,
            timeout_ms,
            memory_mb,
            json,
        } => {
            let options = commands::run::RunOptions {
                command,
                timeout_ms,
                memory_mb,
                json: json || cli_config.default_json,
            };
            commands::run::run(&settings, &file, &options)?;
        }
        Commands::Check {
            capability,
            resource,
            operation,
            grant,
            policy,
            json,
        } => {
            let request = commands::check::CheckRequest {
                capability,
                resource,
                operation,
                grant,
                policy,
            };
            commands::check::run(&settings, &request, json || cli_config.default_json)?;
        }
    }

    Ok(())
}
