//! Scan command - static analysis of script files

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use warden_config::Config;
use warden_runtime::security::{AnalysisOptions, AnalysisRunner, SecurityReport, Severity};

/// Script file extension picked up when walking directories
pub const SCRIPT_EXTENSION: &str = "wd";

pub struct ScanOptions {
    pub json: bool,
    pub sequential: bool,
    pub block_severity: Option<String>,
}

#[derive(Serialize)]
struct FileReport<'a> {
    file: String,
    blocked: bool,
    report: &'a SecurityReport,
}

/// Analyze every script under `paths` and report per file
pub fn run(settings: &Config, paths: &[PathBuf], options: &ScanOptions) -> Result<()> {
    let mut analysis = AnalysisOptions::from_settings(&settings.analysis);
    if let Some(severity) = &options.block_severity {
        analysis.block_severity = severity
            .parse::<Severity>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }

    let roots = scan_roots(settings, paths);
    let files = collect_scripts(&roots)?;
    if files.is_empty() {
        bail!("No .{} files found", SCRIPT_EXTENSION);
    }

    let sources = files
        .iter()
        .map(|f| fs::read_to_string(f).with_context(|| format!("Failed to read {}", f.display())))
        .collect::<Result<Vec<_>>>()?;

    let runner = AnalysisRunner::new(analysis);
    let reports = if options.sequential {
        runner.analyze_sequential(&sources)
    } else {
        runner.analyze_batch(&sources)
    };
    log::debug!("analyzed {} file(s)", reports.len());

    let results: Vec<FileReport> = files
        .iter()
        .zip(&reports)
        .map(|(file, report)| FileReport {
            file: file.display().to_string(),
            blocked: runner.gate(report).is_err(),
            report,
        })
        .collect();
    let blocked = results.iter().filter(|r| r.blocked).count();

    if options.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            super::print_report(&result.file, result.report);
        }
        println!(
            "\n{} file(s) scanned, {} blocked at {}",
            results.len(),
            blocked,
            runner.options().block_severity
        );
    }

    if blocked > 0 {
        bail!("{} file(s) blocked", blocked);
    }
    Ok(())
}

/// Explicit paths, else the project's `sources`, else the current directory
fn scan_roots(settings: &Config, paths: &[PathBuf]) -> Vec<PathBuf> {
    if !paths.is_empty() {
        return paths.to_vec();
    }
    let base = settings
        .project_root()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let sources = settings.project.sources();
    if sources.is_empty() {
        vec![base]
    } else {
        sources.iter().map(|s| base.join(s)).collect()
    }
}

/// Files are taken as given; directories contribute their `.wd` files, sorted
fn collect_scripts(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for root in roots {
        if root.is_file() {
            files.push(root.clone());
            continue;
        }
        if !root.exists() {
            bail!("Path not found: {}", root.display());
        }
        let mut found: Vec<PathBuf> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(SCRIPT_EXTENSION))
            .collect();
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_scripts_filters_extension() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.wd"), "x = 1").unwrap();
        fs::write(dir.path().join("nested").join("a.wd"), "y = 2").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = collect_scripts(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.extension().unwrap() == "wd"));
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(collect_scripts(&[dir.path().join("absent")]).is_err());
    }
}
