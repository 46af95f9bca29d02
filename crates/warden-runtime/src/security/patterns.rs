//! Pattern-based threat detection
//!
//! A line-oriented regex pass over raw source text, independent of the
//! parser. Rules run either against code (string literal contents blanked)
//! or against text (string contents visible); comments are never scanned.
//!
//! Call rules for dynamic-execution primitives are name-aware: a qualified
//! call such as `re.compile(p)` or `obj.eval(x)` never matches the bare
//! `compile(` / `eval(` rule.

use crate::security::types::{Location, Severity, ViolationKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

/// Minimum confidence for a match to register as suspicious
pub const SUSPICIOUS_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Confidence for known-dangerous idioms (dynamic eval/exec/compile)
pub const KNOWN_DANGEROUS_CONFIDENCE: f64 = 0.95;

/// Confidence for shell invocation and unsafe deserialization
pub const HIGH_CONFIDENCE: f64 = 0.9;

/// Confidence for key material embedded in source
pub const KEY_MATERIAL_CONFIDENCE: f64 = 0.6;

/// Confidence for heuristic indicators (credential-looking strings, anonymizing hosts)
pub const HEURISTIC_CONFIDENCE: f64 = 0.5;

static BUILTIN: OnceLock<Arc<PatternRegistry>> = OnceLock::new();

/// Which view of a line a pattern is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchScope {
    /// String literal contents blanked
    Code,
    /// String literal contents visible
    Text,
}

/// A named detection rule
#[derive(Debug, Clone)]
pub struct SecurityPattern {
    pub id: String,
    pub name: String,
    pub regex: Regex,
    pub scope: MatchScope,
    /// Skip matches immediately preceded by `.` (qualified calls)
    pub exclude_qualified: bool,
    pub severity: Severity,
    pub cwe: String,
    pub confidence: f64,
    pub kind: ViolationKind,
}

impl SecurityPattern {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: &str,
        name: &str,
        pattern: &str,
        scope: MatchScope,
        severity: Severity,
        cwe: &str,
        confidence: f64,
        kind: ViolationKind,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            regex: Regex::new(pattern)?,
            scope,
            exclude_qualified: false,
            severity,
            cwe: cwe.to_string(),
            confidence,
            kind,
        })
    }

    /// Mark this rule as matching bare (unqualified) calls only
    pub fn unqualified_only(mut self) -> Self {
        self.exclude_qualified = true;
        self
    }
}

/// One detection instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub pattern_name: String,
    pub kind: ViolationKind,
    pub severity: Severity,
    pub cwe: String,
    pub location: Location,
    pub excerpt: String,
    pub confidence: f64,
}

/// Immutable set of detection rules
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    patterns: Vec<SecurityPattern>,
}

impl PatternRegistry {
    pub fn new(patterns: Vec<SecurityPattern>) -> Self {
        Self { patterns }
    }

    /// Handle to the built-in rule set, compiled on first use
    pub fn builtin() -> Arc<PatternRegistry> {
        Arc::clone(BUILTIN.get_or_init(|| Arc::new(Self::new(builtin_patterns()))))
    }

    pub fn patterns(&self) -> &[SecurityPattern] {
        &self.patterns
    }

    pub fn get(&self, id: &str) -> Option<&SecurityPattern> {
        self.patterns.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn builtin_patterns() -> Vec<SecurityPattern> {
    use MatchScope::{Code, Text};
    use Severity::*;
    use ViolationKind::*;

    let specs: Vec<(Result<SecurityPattern, regex::Error>, bool)> = vec![
        (
            SecurityPattern::new(
                "WD-EVAL",
                "dynamic eval",
                r"\beval\s*\(",
                Code,
                Critical,
                "CWE-95",
                KNOWN_DANGEROUS_CONFIDENCE,
                DynamicExecution,
            ),
            true,
        ),
        (
            SecurityPattern::new(
                "WD-EXEC",
                "dynamic exec",
                r"\bexec\s*\(",
                Code,
                Critical,
                "CWE-95",
                KNOWN_DANGEROUS_CONFIDENCE,
                DynamicExecution,
            ),
            true,
        ),
        (
            SecurityPattern::new(
                "WD-COMPILE",
                "dynamic compile",
                r"\bcompile\s*\(",
                Code,
                Critical,
                "CWE-95",
                KNOWN_DANGEROUS_CONFIDENCE,
                DynamicExecution,
            ),
            true,
        ),
        (
            SecurityPattern::new(
                "WD-DUNDER-IMPORT",
                "dynamic import",
                r"\b__import__\s*\(",
                Code,
                High,
                "CWE-470",
                HIGH_CONFIDENCE,
                DynamicExecution,
            ),
            true,
        ),
        (
            SecurityPattern::new(
                "WD-SHELL",
                "shell invocation",
                r"\bos\s*\.\s*(?:system|popen)\s*\(",
                Code,
                Critical,
                "CWE-78",
                HIGH_CONFIDENCE,
                ShellInjection,
            ),
            false,
        ),
        (
            SecurityPattern::new(
                "WD-SHELL-TRUE",
                "subprocess with shell=True",
                r"\bshell\s*=\s*True\b",
                Code,
                Critical,
                "CWE-78",
                HIGH_CONFIDENCE,
                ShellInjection,
            ),
            false,
        ),
        (
            SecurityPattern::new(
                "WD-DESERIALIZE",
                "unsafe deserialization",
                r"\b(?:pickle|cPickle|marshal|dill)\s*\.\s*loads?\s*\(|\byaml\s*\.\s*(?:unsafe_)?load\s*\(",
                Code,
                Critical,
                "CWE-502",
                HIGH_CONFIDENCE,
                UnsafeDeserialization,
            ),
            false,
        ),
        (
            SecurityPattern::new(
                "WD-PRIVATE-KEY",
                "private key material",
                r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |ENCRYPTED )?PRIVATE KEY-----",
                Text,
                High,
                "CWE-321",
                KEY_MATERIAL_CONFIDENCE,
                CredentialExposure,
            ),
            false,
        ),
        (
            SecurityPattern::new(
                "WD-AWS-KEY",
                "cloud access key id",
                r"\bAKIA[0-9A-Z]{16}\b",
                Text,
                High,
                "CWE-798",
                KEY_MATERIAL_CONFIDENCE,
                CredentialExposure,
            ),
            false,
        ),
        (
            SecurityPattern::new(
                "WD-CREDENTIAL",
                "credential-shaped string",
                r#"(?i)\b(?:password|passwd|pwd|secret|api[_-]?key|access[_-]?token|auth[_-]?token)\b\s*[:=]\s*["'][^"']{4,}["']"#,
                Text,
                Medium,
                "CWE-798",
                HEURISTIC_CONFIDENCE,
                CredentialExposure,
            ),
            false,
        ),
        (
            SecurityPattern::new(
                "WD-ONION",
                "anonymizing network host",
                r"(?i)\b[a-z2-7]{16,56}\.onion\b",
                Text,
                Medium,
                "CWE-200",
                HEURISTIC_CONFIDENCE,
                SuspiciousNetwork,
            ),
            false,
        ),
        (
            SecurityPattern::new(
                "WD-TRAVERSAL",
                "path traversal literal",
                r#"["'](?:[^"']*[/\\])?\.\.[/\\]"#,
                Text,
                Medium,
                "CWE-22",
                HEURISTIC_CONFIDENCE,
                PathTraversal,
            ),
            false,
        ),
    ];

    specs
        .into_iter()
        .filter_map(|(pattern, unqualified)| match pattern {
            Ok(p) if unqualified => Some(p.unqualified_only()),
            Ok(p) => Some(p),
            Err(e) => {
                log::error!("built-in security pattern failed to compile: {}", e);
                None
            }
        })
        .collect()
}

/// Scans source text against a pattern registry
#[derive(Debug, Clone)]
pub struct PatternDetector {
    registry: Arc<PatternRegistry>,
    confidence_floor: f64,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new(PatternRegistry::builtin())
    }
}

impl PatternDetector {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self {
            registry,
            confidence_floor: SUSPICIOUS_CONFIDENCE_THRESHOLD,
        }
    }

    /// Override the minimum confidence a match needs to be reported
    pub fn with_confidence_floor(mut self, floor: f64) -> Self {
        self.confidence_floor = floor;
        self
    }

    pub fn confidence_floor(&self) -> f64 {
        self.confidence_floor
    }

    /// All matches with confidence at or above the floor
    ///
    /// Ordered by (line, column, pattern id) with duplicates removed, so the
    /// output is stable for a given input.
    pub fn scan(&self, source: &str) -> Vec<PatternMatch> {
        let mut matches = Vec::new();

        for (index, line) in source.lines().enumerate() {
            let views = LineViews::new(line);
            for pattern in self.registry.patterns() {
                if pattern.confidence < self.confidence_floor {
                    continue;
                }
                let haystack = match pattern.scope {
                    MatchScope::Code => &views.code,
                    MatchScope::Text => &views.text,
                };
                for found in pattern.regex.find_iter(haystack) {
                    if pattern.exclude_qualified && is_qualified(haystack, found.start()) {
                        continue;
                    }
                    let column = haystack[..found.start()].chars().count();
                    let width = found.as_str().chars().count();
                    let excerpt: String = line.chars().skip(column).take(width).collect();
                    matches.push(PatternMatch {
                        pattern_id: pattern.id.clone(),
                        pattern_name: pattern.name.clone(),
                        kind: pattern.kind,
                        severity: pattern.severity,
                        cwe: pattern.cwe.clone(),
                        location: Location::new(index + 1, column + 1),
                        excerpt,
                        confidence: pattern.confidence,
                    });
                }
            }
        }

        matches.sort_by(|a, b| {
            (a.location, &a.pattern_id).cmp(&(b.location, &b.pattern_id))
        });
        matches.dedup_by(|a, b| a.location == b.location && a.pattern_id == b.pattern_id);
        matches
    }
}

/// True when the match at `start` is preceded (ignoring spaces) by `.`
fn is_qualified(haystack: &str, start: usize) -> bool {
    haystack[..start]
        .chars()
        .rev()
        .find(|c| !c.is_whitespace())
        .is_some_and(|c| c == '.')
}

/// Char-aligned views of one source line with the comment removed
struct LineViews {
    code: String,
    text: String,
}

impl LineViews {
    fn new(line: &str) -> Self {
        let chars: Vec<char> = line.chars().collect();
        let mut code = String::with_capacity(line.len());
        let mut text = String::with_capacity(line.len());
        let mut quote: Option<char> = None;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            match quote {
                Some(q) => {
                    if c == '\\' && i + 1 < chars.len() {
                        code.push_str("  ");
                        text.push(c);
                        text.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    if c == q {
                        quote = None;
                        code.push(c);
                    } else {
                        code.push(' ');
                    }
                    text.push(c);
                }
                None => {
                    if c == '#' || (c == '/' && chars.get(i + 1) == Some(&'/')) {
                        break;
                    }
                    if c == '"' || c == '\'' {
                        quote = Some(c);
                    }
                    code.push(c);
                    text.push(c);
                }
            }
            i += 1;
        }

        Self { code, text }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(source: &str) -> Vec<String> {
        PatternDetector::default()
            .scan(source)
            .into_iter()
            .map(|m| m.pattern_id)
            .collect()
    }

    #[test]
    fn test_builtin_patterns_all_compile() {
        assert_eq!(PatternRegistry::builtin().len(), 12);
    }

    #[test]
    fn test_eval_is_critical_and_confident() {
        let matches = PatternDetector::default().scan("eval(\"1+1\")");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].severity, Severity::Critical);
        assert!(matches[0].confidence >= 0.9);
        assert_eq!(matches[0].location, Location::new(1, 1));
        assert_eq!(matches[0].excerpt, "eval(");
    }

    #[test]
    fn test_qualified_compile_not_flagged() {
        assert!(ids("pattern = re.compile(p)").is_empty());
        assert!(ids("x = somemodule.compile(pattern)").is_empty());
        assert!(ids("obj.eval(x)").is_empty());
        assert_eq!(ids("code = compile(src, \"f\", \"exec\")"), vec!["WD-COMPILE"]);
    }

    #[test]
    fn test_comments_ignored() {
        assert!(ids("# eval(x)\nx = 1 // exec(y)").is_empty());
    }

    #[test]
    fn test_call_names_inside_strings_ignored() {
        assert!(ids("print(\"never call eval(x)\")").is_empty());
    }

    #[test]
    fn test_heuristics_are_suspicious_strength() {
        let matches = PatternDetector::default()
            .scan("url = \"http://abcdefghijklmnop.onion/x\"\npassword = \"hunter22\"");
        let kinds: Vec<_> = matches.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![ViolationKind::SuspiciousNetwork, ViolationKind::CredentialExposure]
        );
        assert!(matches
            .iter()
            .all(|m| m.confidence >= SUSPICIOUS_CONFIDENCE_THRESHOLD));
    }

    #[test]
    fn test_floor_drops_heuristics() {
        let detector = PatternDetector::default().with_confidence_floor(0.8);
        let matches = detector.scan("password = \"hunter22\"\neval(x)");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pattern_id, "WD-EVAL");
    }

    #[test]
    fn test_output_sorted_by_location() {
        let matches = PatternDetector::default().scan("x = 1\nos.system(c); eval(d)\nexec(e)");
        let locations: Vec<_> = matches.iter().map(|m| (m.location.line, m.location.column)).collect();
        assert_eq!(locations, vec![(2, 1), (2, 15), (3, 1)]);
    }

    #[test]
    fn test_traversal_literal() {
        assert_eq!(ids("open(\"../../etc/passwd\")"), vec!["WD-TRAVERSAL"]);
    }
}
