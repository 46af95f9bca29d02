//! Check command - ask the validator about a single capability request

use anyhow::{bail, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use warden_config::Config;
use warden_runtime::security::{CapabilityManager, CapabilityType, Decision, PolicyFile};

pub struct CheckRequest {
    pub capability: String,
    pub resource: String,
    pub operation: String,
    /// Pattern of the token granted for the check
    pub grant: String,
    pub policy: Option<PathBuf>,
}

/// Grant one token, validate the request and print the decision
///
/// Exits non-zero unless the decision is ALLOWED.
pub fn run(settings: &Config, request: &CheckRequest, json: bool) -> Result<()> {
    let capability: CapabilityType = request
        .capability
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let validator = super::project_validator(settings)?;
    if let Some(path) = &request.policy {
        validator.load_policies(&PolicyFile::load(path)?)?;
    }

    let manager = CapabilityManager::new(Arc::new(validator));
    let _scope = manager.enter_scope("check");
    manager.issue(capability, &request.grant, [request.operation.as_str()])?;
    let result = manager.authorize(capability, &request.resource, &request.operation)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let decision = match result.decision {
            Decision::Allowed => result.decision.to_string().green(),
            Decision::Suspicious => result.decision.to_string().yellow(),
            Decision::Denied => result.decision.to_string().red().bold(),
        };
        println!(
            "{} {} {} on {} (score {:.2}): {}",
            decision, result.capability, result.operation, result.resource, result.score, result.reason
        );
    }

    if !result.is_allowed() {
        bail!("{}", result.decision);
    }
    Ok(())
}
