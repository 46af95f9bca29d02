pub mod check;
pub mod run;
pub mod scan;

use anyhow::{Context, Result};
use colored::Colorize;
use warden_config::Config;
use warden_runtime::security::{
    EnhancedValidator, RiskLevel, SecurityReport, ValidationPolicy, ValidatorOptions,
};

/// Validator with the project's `[[policy]]` tables installed
pub fn project_validator(settings: &Config) -> Result<EnhancedValidator> {
    let validator = EnhancedValidator::new(ValidatorOptions::from_settings(&settings.validator));
    for policy in settings.policies() {
        let policy = ValidationPolicy::from_settings(policy)
            .with_context(|| format!("Invalid policy for '{}'", policy.capability))?;
        validator.set_policy(policy)?;
    }
    Ok(validator)
}

pub fn colored_risk(risk: RiskLevel) -> String {
    let label = risk.to_string();
    match risk {
        RiskLevel::Critical => label.red().bold().to_string(),
        RiskLevel::High => label.red().to_string(),
        RiskLevel::Medium => label.yellow().to_string(),
        _ => label.green().to_string(),
    }
}

/// Human-readable report body, one violation per line
pub fn print_report(label: &str, report: &SecurityReport) {
    println!(
        "{}: risk {}, {} violation(s)",
        label.bold(),
        colored_risk(report.risk),
        report.violations.len()
    );
    if report.incomplete {
        println!("  {}", "analysis incomplete".yellow());
        for diag in &report.diagnostics {
            println!("  {}:{}: {}", diag.line, diag.column, diag.message);
        }
    }
    for violation in &report.violations {
        println!("  {}", violation);
    }
    let sanitized = report.data_flows.iter().filter(|f| f.sanitized).count();
    if sanitized > 0 {
        println!("  {} sanitized flow(s) not reported", sanitized);
    }
    let undeclared = report.undeclared_capabilities();
    if !undeclared.is_empty() {
        let names: Vec<&str> = undeclared.iter().map(|c| c.as_str()).collect();
        println!("  undeclared capabilities: {}", names.join(", "));
    }
}
