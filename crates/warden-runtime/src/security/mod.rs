//! Security core: detect, authorize, contain
//!
//! # Overview
//!
//! Untrusted scripts pass three layers before and while they run:
//!
//! - **Detect**: the pattern detector, AST analyzer and taint tracker each
//!   inspect the source independently; [`SecurityAnalyzer`] merges their
//!   findings into a [`SecurityReport`] and [`gate`] refuses sources that
//!   reach the blocking severity.
//! - **Authorize**: capability-annotated operations look up a
//!   [`CapabilityToken`] in the thread's active [`CapabilityContext`] through
//!   the [`CapabilityManager`], and the [`EnhancedValidator`] makes the final
//!   ALLOWED / SUSPICIOUS / DENIED call for the concrete resource.
//! - **Contain**: code that is allowed to run executes in a child process
//!   supervised by the [`SandboxExecutor`].
//!
//! # Example
//!
//! ```
//! use warden_runtime::security::{CapabilityManager, CapabilityType, Decision};
//!
//! let manager = CapabilityManager::default();
//! let _scope = manager.enter_scope("job");
//! manager.issue(CapabilityType::FileRead, "/data/**", ["read"]).unwrap();
//!
//! let result = manager.authorize(CapabilityType::FileRead, "/data/report.csv", "read").unwrap();
//! assert_eq!(result.decision, Decision::Allowed);
//!
//! // Outside the grant: a typed failure, not a policy decision
//! assert!(manager.require_capability(CapabilityType::FileRead, "/srv/x", "read").is_err());
//! ```

pub mod aliases;
pub mod analysis;
pub mod ast_analyzer;
pub mod audit;
pub mod capability;
pub mod guard;
pub mod patterns;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod sandbox;
pub mod taint;
pub mod types;
pub mod validator;

pub use analysis::{gate, source_hash, AnalysisOptions, AnalysisRunner, SecurityAnalyzer};
pub use ast_analyzer::{AstAnalysis, AstAnalyzer};
pub use audit::{
    AuditEntry, AuditEvent, AuditLogger, LogAuditLogger, MemoryAuditLogger, NullAuditLogger,
};
pub use capability::{
    get_current_context, set_current_context, CapabilityContext, CapabilityError,
    CapabilityManager, CapabilityToken, ResourcePattern, ScopeGuard,
};
pub use guard::OperationGuard;
pub use patterns::{PatternDetector, PatternMatch, PatternRegistry, SecurityPattern};
pub use pipeline::{PipelineError, SecurePipeline};
pub use registry::OperationRegistry;
pub use report::{RiskLevel, SecurityReport, SecurityViolation};
pub use sandbox::{
    ExecutionResult, ExecutionState, ResourceUsageSnapshot, SandboxConfig, SandboxError,
    SandboxExecutor, TerminationReason,
};
pub use taint::{DataFlowPath, TaintTracker};
pub use types::{CapabilityType, Location, Severity, ViolationKind};
pub use validator::{
    Decision, EnhancedValidator, PolicyError, PolicyFile, ValidationPolicy, ValidationResult,
    ValidatorOptions,
};
