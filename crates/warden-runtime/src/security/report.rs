//! Normalized findings and the merged security report

use crate::diagnostic::Diagnostic;
use crate::security::patterns::PatternMatch;
use crate::security::taint::DataFlowPath;
use crate::security::types::{CapabilityType, Location, Severity, ViolationKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Overall risk classification
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl From<Severity> for RiskLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => RiskLevel::Low,
            Severity::Medium => RiskLevel::Medium,
            Severity::High => RiskLevel::High,
            Severity::Critical => RiskLevel::Critical,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Which pass produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Analyzer {
    Pattern,
    Ast,
    Taint,
}

/// A normalized finding from any analyzer
///
/// Any violation at `High` or above either names the capabilities that would
/// make the operation legitimate or is marked unconditionally denied. The
/// constructor enforces this, including for deserialized values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ViolationFields")]
pub struct SecurityViolation {
    kind: ViolationKind,
    severity: Severity,
    location: Location,
    message: String,
    required_capabilities: Vec<CapabilityType>,
    unconditionally_denied: bool,
    analyzer: Analyzer,
    cwe: Option<String>,
    confidence: f64,
}

#[derive(Deserialize)]
struct ViolationFields {
    kind: ViolationKind,
    severity: Severity,
    location: Location,
    message: String,
    #[serde(default)]
    required_capabilities: Vec<CapabilityType>,
    #[serde(default)]
    unconditionally_denied: bool,
    analyzer: Analyzer,
    #[serde(default)]
    cwe: Option<String>,
    confidence: f64,
}

impl From<ViolationFields> for SecurityViolation {
    fn from(f: ViolationFields) -> Self {
        let mut violation = SecurityViolation::new(
            f.analyzer,
            f.kind,
            f.severity,
            f.location,
            f.message,
            f.required_capabilities,
        )
        .with_confidence(f.confidence);
        violation.cwe = f.cwe;
        if f.unconditionally_denied {
            violation.unconditionally_denied = true;
        }
        violation
    }
}

impl SecurityViolation {
    /// Create a violation
    ///
    /// A high-or-above violation without capabilities is marked
    /// unconditionally denied.
    pub fn new(
        analyzer: Analyzer,
        kind: ViolationKind,
        severity: Severity,
        location: Location,
        message: impl Into<String>,
        required_capabilities: Vec<CapabilityType>,
    ) -> Self {
        let mut required_capabilities = required_capabilities;
        required_capabilities.sort();
        required_capabilities.dedup();
        let unconditionally_denied =
            severity >= Severity::High && required_capabilities.is_empty();
        Self {
            kind,
            severity,
            location,
            message: message.into(),
            required_capabilities,
            unconditionally_denied,
            analyzer,
            cwe: None,
            confidence: 1.0,
        }
    }

    /// Mark as not legitimizable by any grant
    pub fn denied(mut self) -> Self {
        self.unconditionally_denied = true;
        self
    }

    pub fn with_cwe(mut self, cwe: impl Into<String>) -> Self {
        self.cwe = Some(cwe.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Normalize a pattern match into a violation
    pub fn from_pattern(m: &PatternMatch, required_capabilities: Vec<CapabilityType>) -> Self {
        Self::new(
            Analyzer::Pattern,
            m.kind,
            m.severity,
            m.location,
            format!("{}: `{}`", m.pattern_name, m.excerpt),
            required_capabilities,
        )
        .with_cwe(m.cwe.clone())
        .with_confidence(m.confidence)
    }

    pub fn kind(&self) -> ViolationKind {
        self.kind
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn required_capabilities(&self) -> &[CapabilityType] {
        &self.required_capabilities
    }

    pub fn is_unconditionally_denied(&self) -> bool {
        self.unconditionally_denied
    }

    pub fn analyzer(&self) -> Analyzer {
        self.analyzer
    }

    pub fn cwe(&self) -> Option<&str> {
        self.cwe.as_deref()
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

impl fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.location, self.severity, self.kind, self.message
        )?;
        if self.unconditionally_denied {
            write!(f, " (denied)")
        } else if !self.required_capabilities.is_empty() {
            let caps: Vec<&str> = self.required_capabilities.iter().map(|c| c.as_str()).collect();
            write!(f, " (requires {})", caps.join(", "))
        } else {
            Ok(())
        }
    }
}

/// Merged result of analyzing one source
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityReport {
    /// Ordered by location, then descending severity
    pub violations: Vec<SecurityViolation>,
    pub pattern_matches: Vec<PatternMatch>,
    pub data_flows: Vec<DataFlowPath>,
    pub risk: RiskLevel,
    /// Minimal capability set needed to execute the source
    pub required_capabilities: BTreeSet<CapabilityType>,
    /// Capabilities granted by `capability` declarations in the source
    pub declared_capabilities: BTreeSet<CapabilityType>,
    /// Analysis could not cover the whole source (syntax errors, analyzer failure)
    pub incomplete: bool,
    pub diagnostics: Vec<Diagnostic>,
    /// SHA-256 of the analyzed source, hex encoded
    pub source_hash: String,
}

impl SecurityReport {
    /// Degraded report for a source whose analysis failed outright
    pub fn degraded(source_hash: impl Into<String>, reason: impl Into<String>) -> Self {
        let diagnostic = Diagnostic::error_with_code(
            "WD2000",
            format!("analysis failed: {}", reason.into()),
            crate::span::Span::dummy(),
        );
        Self {
            incomplete: true,
            diagnostics: vec![diagnostic],
            source_hash: source_hash.into(),
            ..Self::default()
        }
    }

    pub fn is_required(&self, capability: CapabilityType) -> bool {
        self.required_capabilities.contains(&capability)
    }

    pub fn is_declared(&self, capability: CapabilityType) -> bool {
        self.declared_capabilities.contains(&capability)
    }

    /// Required capabilities the source does not declare
    pub fn undeclared_capabilities(&self) -> BTreeSet<CapabilityType> {
        self.required_capabilities
            .difference(&self.declared_capabilities)
            .copied()
            .collect()
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.violations.iter().map(SecurityViolation::severity).max()
    }

    /// Whether any violation reaches `threshold`
    pub fn should_block(&self, threshold: Severity) -> bool {
        self.violations.iter().any(|v| v.severity() >= threshold)
    }

    /// Violations at or above `threshold`
    pub fn blocking_violations(&self, threshold: Severity) -> Vec<&SecurityViolation> {
        self.violations
            .iter()
            .filter(|v| v.severity() >= threshold)
            .collect()
    }

    /// Recompute `risk` from violations and data flows
    pub(crate) fn recompute_risk(&mut self) {
        let from_violations = self
            .violations
            .iter()
            .map(|v| RiskLevel::from(v.severity()))
            .max()
            .unwrap_or_default();
        let from_flows = self
            .data_flows
            .iter()
            .map(|f| f.risk)
            .max()
            .unwrap_or_default();
        self.risk = from_violations.max(from_flows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_high_without_capability_is_denied() {
        let v = SecurityViolation::new(
            Analyzer::Ast,
            ViolationKind::ReflectionAbuse,
            Severity::Critical,
            Location::new(1, 1),
            "walks __subclasses__",
            Vec::new(),
        );
        assert!(v.is_unconditionally_denied());
    }

    #[test]
    fn test_medium_without_capability_is_not_denied() {
        let v = SecurityViolation::new(
            Analyzer::Pattern,
            ViolationKind::CredentialExposure,
            Severity::Medium,
            Location::new(1, 1),
            "password literal",
            Vec::new(),
        );
        assert!(!v.is_unconditionally_denied());
    }

    #[test]
    fn test_deserialization_enforces_invariant() {
        let json = r#"{
            "kind": "dynamic-execution",
            "severity": "critical",
            "location": {"line": 1, "column": 1},
            "message": "eval",
            "required_capabilities": [],
            "unconditionally_denied": false,
            "analyzer": "ast",
            "confidence": 0.95
        }"#;
        let v: SecurityViolation = serde_json::from_str(json).unwrap();
        assert!(v.is_unconditionally_denied());
    }

    #[test]
    fn test_undeclared_capabilities() {
        let mut report = SecurityReport::default();
        report.required_capabilities =
            [CapabilityType::FileRead, CapabilityType::NetworkConnect].into();
        report.declared_capabilities = [CapabilityType::FileRead].into();
        assert_eq!(
            report.undeclared_capabilities(),
            [CapabilityType::NetworkConnect].into()
        );
        assert!(report.is_required(CapabilityType::FileRead));
        assert!(report.is_declared(CapabilityType::FileRead));
        assert!(!report.is_declared(CapabilityType::NetworkConnect));
    }

    #[test]
    fn test_should_block() {
        let mut report = SecurityReport::default();
        report.violations.push(SecurityViolation::new(
            Analyzer::Ast,
            ViolationKind::DangerousImport,
            Severity::High,
            Location::new(2, 1),
            "import subprocess",
            vec![CapabilityType::ProcessSpawn],
        ));
        report.recompute_risk();
        assert_eq!(report.risk, RiskLevel::High);
        assert!(report.should_block(Severity::High));
        assert!(!report.should_block(Severity::Critical));
    }

    #[test]
    fn test_degraded_report_is_incomplete() {
        let report = SecurityReport::degraded("abc", "boom");
        assert!(report.incomplete);
        assert_eq!(report.diagnostics.len(), 1);
        assert!(report.diagnostics[0].message.contains("boom"));
    }
}
