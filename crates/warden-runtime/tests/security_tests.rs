//! Cross-module security properties
//!
//! Unit tests next to each module cover the mechanics; these exercise the
//! public API the way an embedding application would.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use warden_runtime::security::{
    AnalysisOptions, AnalysisRunner, AuditLogger, CapabilityError, CapabilityManager, CapabilityToken,
    CapabilityType, Decision, EnhancedValidator, MemoryAuditLogger, RiskLevel, SecurityAnalyzer,
    Severity, ValidationPolicy, ViolationKind,
};

// ============================================================================
// Capability tokens and contexts
// ============================================================================

proptest! {
    #[test]
    fn usage_never_exceeds_limit(max in 1u64..16, attempts in 0usize..40) {
        let validator = EnhancedValidator::default();
        let token = CapabilityToken::new(CapabilityType::FileRead, "/data/**", ["read"])
            .unwrap()
            .with_max_usage(max);

        let allowed = (0..attempts)
            .map(|i| validator.validate(CapabilityType::FileRead, &format!("/data/{}", i), "read", &token))
            .filter(|r| r.decision == Decision::Allowed)
            .count() as u64;

        let expected = max.min(attempts as u64);
        prop_assert_eq!(allowed, expected);
        prop_assert_eq!(token.usage_count(), expected);
    }

    #[test]
    fn refused_requests_do_not_consume(max in 1u64..8, probes in 1usize..10) {
        let validator = EnhancedValidator::default();
        let token = CapabilityToken::new(CapabilityType::FileRead, "/**", ["read"])
            .unwrap()
            .with_max_usage(max);

        for _ in 0..probes {
            let result = validator.validate(CapabilityType::FileRead, "/etc/shadow", "read", &token);
            prop_assert_eq!(result.decision, Decision::Denied);
        }
        prop_assert_eq!(token.usage_count(), 0);
    }
}

#[test]
fn test_sibling_scopes_do_not_share_tokens() {
    let manager = CapabilityManager::default();
    let _root = manager.enter_scope("root");
    manager
        .issue(CapabilityType::FileRead, "/shared/**", ["read"])
        .unwrap();

    {
        let _first = manager.enter_scope("first");
        manager
            .issue(CapabilityType::FileWrite, "/out/**", ["write"])
            .unwrap();
        assert!(manager.has_capability(CapabilityType::FileWrite, "/out/a", "write"));
        assert!(manager.has_capability(CapabilityType::FileRead, "/shared/a", "read"));
    }

    let _second = manager.enter_scope("second");
    assert!(!manager.has_capability(CapabilityType::FileWrite, "/out/a", "write"));
    assert!(manager.has_capability(CapabilityType::FileRead, "/shared/a", "read"));
}

#[test]
fn test_threads_start_without_context() {
    let manager = CapabilityManager::default();
    let _scope = manager.enter_scope("main");
    manager
        .issue(CapabilityType::FileRead, "/data/**", ["read"])
        .unwrap();

    let worker = manager.clone();
    let outcome = thread::spawn(move || {
        worker.require_capability(CapabilityType::FileRead, "/data/a", "read")
    })
    .join()
    .unwrap();

    assert!(matches!(outcome, Err(CapabilityError::NoActiveContext)));
    assert!(manager.has_capability(CapabilityType::FileRead, "/data/a", "read"));
}

// ============================================================================
// Validator
// ============================================================================

#[test]
fn test_sensitive_file_denied_at_high_or_above() {
    let manager = CapabilityManager::default();
    let _scope = manager.enter_scope("job");
    manager
        .issue(CapabilityType::FileRead, "/**", ["read"])
        .unwrap();

    for resource in ["/etc/shadow", "/root/.bashrc", "/home/dev/.ssh/id_rsa"] {
        let result = manager
            .authorize(CapabilityType::FileRead, resource, "read")
            .unwrap();
        assert_eq!(result.decision, Decision::Denied, "{}", resource);
        assert!(result.severity >= Severity::High, "{}", resource);
    }
}

#[test]
fn test_anonymizing_host_is_suspicious() {
    let manager = CapabilityManager::default();
    let _scope = manager.enter_scope("net");
    manager
        .issue(CapabilityType::NetworkConnect, "**", ["connect"])
        .unwrap();

    let result = manager
        .authorize(CapabilityType::NetworkConnect, "mirror.onion", "connect")
        .unwrap();
    assert_eq!(result.decision, Decision::Suspicious);

    let plain = manager
        .authorize(CapabilityType::NetworkConnect, "api.example.com", "connect")
        .unwrap();
    assert_eq!(plain.decision, Decision::Allowed);
}

#[test]
fn test_refusals_recorded_exactly_once() {
    let logger = Arc::new(MemoryAuditLogger::new());
    let validator = EnhancedValidator::default().with_audit_logger(logger.clone());
    validator
        .set_policy(ValidationPolicy::new(CapabilityType::FileWrite).deny("/srv/locked/**"))
        .unwrap();
    let token = CapabilityToken::new(CapabilityType::FileWrite, "/**", ["write"]).unwrap();

    validator.validate(CapabilityType::FileWrite, "/srv/locked/a", "write", &token);
    validator.validate(CapabilityType::FileWrite, "/srv/open/a", "write", &token);
    validator.validate(CapabilityType::FileWrite, "/srv/locked/b", "write", &token);

    let history = validator.get_violation_history();
    let resources: Vec<&str> = history.iter().map(|r| r.resource.as_str()).collect();
    assert_eq!(resources, vec!["/srv/locked/a", "/srv/locked/b"]);
    assert_eq!(logger.entries().len(), 2);
}

// ============================================================================
// Static analysis
// ============================================================================

#[test]
fn test_dynamic_eval_is_critical_with_high_confidence() {
    let report = SecurityAnalyzer::default().analyze("code = input()\neval(code)\n");
    assert_eq!(report.risk, RiskLevel::Critical);
    let eval = report
        .violations
        .iter()
        .find(|v| v.kind() == ViolationKind::DynamicExecution)
        .unwrap();
    assert_eq!(eval.severity(), Severity::Critical);
    assert!(eval.confidence() >= 0.9);
    assert!(report.is_required(CapabilityType::CodeEval));
}

#[test]
fn test_qualified_compile_is_not_dynamic_execution() {
    let report = SecurityAnalyzer::default().analyze("regex = somemodule.compile(pattern)\n");
    assert!(report
        .violations
        .iter()
        .all(|v| v.kind() != ViolationKind::DynamicExecution));
    assert!(report.pattern_matches.is_empty());
}

#[test]
fn test_taint_follows_variables_and_reassignment_clears_it() {
    let analyzer = SecurityAnalyzer::default();

    let tainted = analyzer.analyze("a = input()\nb = a\nos.system(b)\n");
    assert_eq!(tainted.data_flows.len(), 1);
    let hops: Vec<&str> = tainted.data_flows[0]
        .hops
        .iter()
        .map(|h| h.variable.as_str())
        .collect();
    assert_eq!(hops, vec!["a", "b"]);

    let cleared = analyzer.analyze("a = input()\na = \"ls\"\nos.system(a)\n");
    assert!(cleared.data_flows.is_empty());
}

#[test]
fn test_batch_isolates_syntax_errors() {
    let runner = AnalysisRunner::new(AnalysisOptions::default());
    let sources = vec![
        "x = 1 + 2\n".to_string(),
        "y = (3 +\n".to_string(),
        "z = \"ok\"\n".to_string(),
        "eval(input())\n".to_string(),
    ];

    let reports = runner.analyze_batch(&sources);
    assert_eq!(reports.len(), sources.len());

    let incomplete: Vec<usize> = reports
        .iter()
        .enumerate()
        .filter(|(_, r)| r.incomplete)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(incomplete, vec![1]);
    assert_eq!(reports[3].risk, RiskLevel::Critical);
    assert_eq!(reports, runner.analyze_sequential(&sources));
}

#[test]
fn test_batch_survives_deeply_nested_source() {
    let runner = AnalysisRunner::new(AnalysisOptions::default());
    let deep = format!("x = {}1{}\n", "(".repeat(5000), ")".repeat(5000));
    let sources = vec!["y = 1\n".to_string(), deep, "eval(input())\n".to_string()];

    let reports = runner.analyze_batch(&sources);
    assert_eq!(reports.len(), 3);
    assert!(!reports[0].incomplete);
    assert!(reports[1].incomplete);
    assert!(runner.gate(&reports[1]).is_err());
    assert_eq!(reports[2].risk, RiskLevel::Critical);
}

// ============================================================================
// Sandbox
// ============================================================================

#[cfg(unix)]
mod sandbox {
    use std::time::{Duration, Instant};
    use warden_runtime::security::{SandboxConfig, SandboxExecutor, TerminationReason};

    #[test]
    fn test_wall_clock_timeout_is_bounded() {
        let config = SandboxConfig::default().with_wall_clock_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let result = SandboxExecutor::new().run("sleep 30", &config).unwrap();
        let waited = started.elapsed();

        assert_eq!(result.termination_reason, TerminationReason::TimedOut);
        assert!(result.outcome.is_err());
        let bound = config.wall_clock_timeout + config.grace_period + config.poll_interval;
        assert!(
            waited < bound + Duration::from_millis(500),
            "took {:?}, bound {:?}",
            waited,
            bound
        );
    }

    #[test]
    fn test_successful_run_reports_completed() {
        let result = SandboxExecutor::new()
            .run("printf done", &SandboxConfig::default())
            .unwrap();
        assert!(result.succeeded());
        assert_eq!(result.stdout, "done");
        assert_eq!(result.termination_reason, TerminationReason::Completed);
    }
}
