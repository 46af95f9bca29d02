//! Detect, authorize, contain
//!
//! [`SecurePipeline`] analyzes a source, refuses it when the report reaches the
//! blocking threshold, and otherwise runs the supplied code in the sandbox
//! with exactly the capabilities the source declares.

use crate::parser::parse_source;
use crate::security::analysis::{AnalysisOptions, AnalysisRunner};
use crate::security::audit::{AuditEvent, AuditLogger, NullAuditLogger};
use crate::security::capability::{declaration_tokens, CapabilityError, CapabilityManager};
use crate::security::report::SecurityReport;
use crate::security::sandbox::{ExecutionResult, SandboxConfig, SandboxError, SandboxExecutor};
use std::sync::Arc;
use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Execution blocked: risk {}, {} violation(s)", .report.risk, .report.violations.len())]
    Blocked { report: Box<SecurityReport> },

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

pub struct SecurePipeline {
    runner: AnalysisRunner,
    manager: CapabilityManager,
    sandbox: SandboxConfig,
    executor: SandboxExecutor,
    audit: Arc<dyn AuditLogger>,
}

impl Default for SecurePipeline {
    fn default() -> Self {
        Self::new(AnalysisOptions::default(), SandboxConfig::default())
    }
}

impl SecurePipeline {
    pub fn new(options: AnalysisOptions, sandbox: SandboxConfig) -> Self {
        Self {
            runner: AnalysisRunner::new(options),
            manager: CapabilityManager::default(),
            sandbox,
            executor: SandboxExecutor::new(),
            audit: Arc::new(NullAuditLogger::new()),
        }
    }

    pub fn with_manager(mut self, manager: CapabilityManager) -> Self {
        self.manager = manager;
        self
    }

    /// Send blocking and sandbox events to `logger`
    pub fn with_audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.executor = SandboxExecutor::new().with_audit_logger(Arc::clone(&logger));
        self.audit = logger;
        self
    }

    pub fn runner(&self) -> &AnalysisRunner {
        &self.runner
    }

    pub fn manager(&self) -> &CapabilityManager {
        &self.manager
    }

    pub fn sandbox_config(&self) -> &SandboxConfig {
        &self.sandbox
    }

    pub fn analyze(&self, source: &str) -> SecurityReport {
        self.runner.analyze(source)
    }

    /// Analyze and gate; the report is returned when execution may proceed
    pub fn check(&self, source: &str) -> Result<SecurityReport, PipelineError> {
        let report = self.analyze(source);
        if let Err(e) = self.runner.gate(&report) {
            self.audit.log(AuditEvent::AnalysisBlocked {
                source_hash: report.source_hash.clone(),
                risk: report.risk.to_string(),
                violations: report.violations.len(),
            });
            return Err(e);
        }
        Ok(report)
    }

    /// Gate `source`, then run `code` in the sandbox
    ///
    /// The source's `capability` declarations are granted in a scope of their
    /// own and handed to the child; nothing else is.
    pub fn execute(&self, source: &str, code: &str) -> Result<ExecutionResult, PipelineError> {
        self.check(source)?;

        let parsed = parse_source(source);
        let scope = self.manager.enter_scope("sandbox");
        let mut config = self.sandbox.clone();
        for decl in parsed.program.capability_decls() {
            for token in declaration_tokens(decl)? {
                let token = self.manager.add_capability(Some(scope.context()), token)?;
                config = config.grant(&token);
            }
        }
        let result = self.executor.run(code, &config)?;
        drop(scope);
        Ok(result)
    }
}
