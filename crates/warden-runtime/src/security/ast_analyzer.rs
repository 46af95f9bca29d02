//! Structural security analysis over the syntax tree
//!
//! Complements the textual pattern pass: findings here come from the shape of
//! the tree (resolved call targets, attribute chains, argument construction)
//! rather than from source text, so the two passes can be tuned
//! independently.

use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::parser::ParseResult;
use crate::security::aliases::ImportAliases;
use crate::security::registry::{OperationRegistry, ReflectionRole};
use crate::security::report::{Analyzer, SecurityViolation};
use crate::security::types::{CapabilityType, Location, Severity, ViolationKind};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Confidence attached to injection-shape heuristics
const INJECTION_CONFIDENCE: f64 = 0.7;

/// Methods that take a query string as first argument
const QUERY_METHODS: &[&str] = &["execute", "executemany", "executescript", "raw"];

/// Calls that take a filesystem path as first argument
const PATH_CALLS: &[&str] = &[
    "open",
    "io.open",
    "os.open",
    "read_file",
    "write_file",
    "os.remove",
    "os.unlink",
    "os.listdir",
    "shutil.rmtree",
];

/// Result of analyzing one parse result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AstAnalysis {
    /// Ordered by location, then descending severity
    pub violations: Vec<SecurityViolation>,
    /// Capabilities needed by registry-known calls and flagged operations
    pub required_capabilities: BTreeSet<CapabilityType>,
    /// The source had syntax errors; violations cover only what parsed
    pub unparsable: bool,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct AstAnalyzer {
    registry: Arc<OperationRegistry>,
}

impl Default for AstAnalyzer {
    fn default() -> Self {
        Self::new(OperationRegistry::builtin())
    }
}

impl AstAnalyzer {
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self { registry }
    }

    /// Parse and analyze source text
    pub fn analyze_source(&self, source: &str) -> AstAnalysis {
        self.analyze(&crate::parser::parse_source(source))
    }

    /// Analyze an existing parse result; syntax errors mark the result unparsable
    pub fn analyze(&self, parsed: &ParseResult) -> AstAnalysis {
        let aliases = ImportAliases::collect(&parsed.program);
        let mut walk = Walk {
            registry: &self.registry,
            aliases: &aliases,
            violations: Vec::new(),
            required: BTreeSet::new(),
        };
        walk.block(&parsed.program.stmts);

        let mut violations = walk.violations;
        violations.sort_by(|a, b| {
            a.location()
                .cmp(&b.location())
                .then(b.severity().cmp(&a.severity()))
                .then(a.kind().cmp(&b.kind()))
        });
        violations.dedup_by(|a, b| a.location() == b.location() && a.kind() == b.kind());

        AstAnalysis {
            violations,
            required_capabilities: walk.required,
            unparsable: parsed.has_errors(),
            diagnostics: parsed.diagnostics.clone(),
        }
    }
}

struct Walk<'a> {
    registry: &'a OperationRegistry,
    aliases: &'a ImportAliases,
    violations: Vec<SecurityViolation>,
    required: BTreeSet<CapabilityType>,
}

impl Walk<'_> {
    fn block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            if let Stmt::Import(import) = stmt {
                self.import(import);
            }
            for expr in stmt.exprs() {
                self.expr(expr, false);
            }
            for block in stmt.child_blocks() {
                self.block(&block.stmts);
            }
        }
    }

    fn report(&mut self, violation: SecurityViolation) {
        // Import capabilities describe what a module can do, not what this source needs
        if violation.kind() != ViolationKind::DangerousImport {
            self.required
                .extend(violation.required_capabilities().iter().copied());
        }
        self.violations.push(violation);
    }

    fn import(&mut self, import: &ImportStmt) {
        for name in &import.names {
            let module = match &import.from {
                Some(base) => format!("{}.{}", base, name.path),
                None => name.path.clone(),
            };
            let Some(risk) = self.registry.module_risk(&module) else {
                continue;
            };
            let mut violation = SecurityViolation::new(
                Analyzer::Ast,
                ViolationKind::DangerousImport,
                risk.severity,
                Location::from(name.span),
                format!("import of `{}` grants uncontrolled system access", module),
                risk.capabilities.clone(),
            )
            .with_cwe("CWE-676");
            if risk.unconditionally_denied {
                violation = violation.denied();
            }
            self.report(violation);
        }
    }

    /// `in_chain` is set while descending the object side of an
    /// attribute/subscript/call chain, so a chain is judged once at its outermost node
    fn expr(&mut self, expr: &Expr, in_chain: bool) {
        match expr {
            Expr::Attribute(attr) => {
                if !in_chain {
                    self.reflection_chain(expr);
                }
                self.expr(&attr.object, true);
            }
            Expr::Subscript(sub) => {
                if !in_chain {
                    self.reflection_chain(expr);
                }
                self.namespace_subscript(sub);
                self.expr(&sub.object, true);
                self.expr(&sub.index, false);
            }
            Expr::Call(call) => {
                if !in_chain {
                    self.reflection_chain(expr);
                }
                self.call(call);
                self.expr(&call.callee, true);
                // The object of getattr(obj, "...") is part of the same chain
                let getattr = call.callee_name().as_deref() == Some("getattr");
                for (i, arg) in call.args.iter().enumerate() {
                    self.expr(arg, getattr && i == 0);
                }
                for keyword in &call.keywords {
                    self.expr(&keyword.value, false);
                }
            }
            Expr::Group(inner, _) => self.expr(inner, in_chain),
            other => {
                for child in other.children() {
                    self.expr(child, false);
                }
            }
        }
    }

    fn call(&mut self, call: &CallExpr) {
        let resolved = self.aliases.resolve(&call.callee).map(|name| {
            name.strip_prefix("builtins.")
                .map(str::to_string)
                .unwrap_or(name)
        });
        let location = Location::from(call.span);

        if let Some(name) = resolved.as_deref() {
            self.required
                .extend(self.registry.required_capabilities(name).iter().copied());

            if self.registry.is_dynamic_execution(name) {
                self.report(
                    SecurityViolation::new(
                        Analyzer::Ast,
                        ViolationKind::DynamicExecution,
                        Severity::Critical,
                        location,
                        format!("call to dynamic-execution primitive `{}`", name),
                        vec![CapabilityType::CodeEval],
                    )
                    .with_cwe("CWE-95"),
                );
            }

            if name == "open" || name == "io.open" {
                let mode = call
                    .keyword("mode")
                    .or_else(|| call.args.get(1))
                    .and_then(Expr::as_str_literal);
                if mode.is_some_and(|m| m.contains(['w', 'a', 'x', '+'])) {
                    self.required.insert(CapabilityType::FileWrite);
                }
            }
        }

        if call.keyword("shell").is_some_and(is_true) {
            self.report(
                SecurityViolation::new(
                    Analyzer::Ast,
                    ViolationKind::ShellInjection,
                    Severity::High,
                    location,
                    "subprocess invoked with `shell=True`",
                    vec![CapabilityType::ProcessSpawn],
                )
                .with_cwe("CWE-78"),
            );
        }

        let Some(first) = call.args.first() else {
            return;
        };

        let is_query = matches!(call.callee.as_ref(), Expr::Attribute(attr)
            if QUERY_METHODS.contains(&attr.attr.name.as_str()));
        if is_query && is_injection_shaped(first) {
            self.report(
                SecurityViolation::new(
                    Analyzer::Ast,
                    ViolationKind::InjectionShapedString,
                    Severity::Medium,
                    location,
                    "query built from string concatenation or formatting",
                    Vec::new(),
                )
                .with_cwe("CWE-89")
                .with_confidence(INJECTION_CONFIDENCE),
            );
        }

        let Some(name) = resolved.as_deref().filter(|n| PATH_CALLS.contains(n)) else {
            return;
        };
        let mut caps = self.registry.required_capabilities(name).to_vec();
        if caps.is_empty() {
            caps.push(CapabilityType::FileRead);
        }

        if is_injection_shaped(first) {
            self.report(
                SecurityViolation::new(
                    Analyzer::Ast,
                    ViolationKind::InjectionShapedString,
                    Severity::Medium,
                    location,
                    format!("path passed to `{}` built from string concatenation", name),
                    caps.clone(),
                )
                .with_cwe("CWE-22")
                .with_confidence(INJECTION_CONFIDENCE),
            );
        }
        if has_traversal_literal(first) {
            self.report(
                SecurityViolation::new(
                    Analyzer::Ast,
                    ViolationKind::PathTraversal,
                    Severity::High,
                    location,
                    format!("path passed to `{}` contains a parent-directory segment", name),
                    caps,
                )
                .with_cwe("CWE-22"),
            );
        }
    }

    /// Dunder hops along the object spine of `expr`, outermost first
    fn chain_hops(&self, expr: &Expr) -> Vec<(String, ReflectionRole)> {
        let mut hops = Vec::new();
        let mut current = expr;
        loop {
            match current {
                Expr::Attribute(attr) => {
                    if let Some(role) = self.registry.reflection_role(&attr.attr.name) {
                        hops.push((attr.attr.name.clone(), role));
                    }
                    current = &attr.object;
                }
                Expr::Subscript(sub) => current = &sub.object,
                Expr::Call(call) => {
                    // getattr(obj, "__globals__") is the same hop spelled as a call
                    if call.callee_name().as_deref() == Some("getattr") {
                        if let Some(attr) = call.args.get(1).and_then(Expr::as_str_literal) {
                            if let Some(role) = self.registry.reflection_role(attr) {
                                hops.push((attr.to_string(), role));
                            }
                        }
                        match call.args.first() {
                            Some(object) => current = object,
                            None => break,
                        }
                    } else {
                        current = &call.callee;
                    }
                }
                Expr::Group(inner, _) => current = inner,
                Expr::Name(id) => {
                    if let Some(role) = self.registry.reflection_role(&id.name) {
                        hops.push((id.name.clone(), role));
                    }
                    break;
                }
                _ => break,
            }
        }
        hops
    }

    fn reflection_chain(&mut self, expr: &Expr) {
        let hops = self.chain_hops(expr);
        if !hops.iter().any(|(_, role)| *role == ReflectionRole::Internal) {
            return;
        }
        let path: Vec<&str> = hops.iter().rev().map(|(name, _)| name.as_str()).collect();
        let location = Location::from(expr.span());
        let violation = if hops.len() >= 2 {
            SecurityViolation::new(
                Analyzer::Ast,
                ViolationKind::ReflectionAbuse,
                Severity::Critical,
                location,
                format!("reflective chain `{}` walks interpreter internals", path.join(" -> ")),
                vec![CapabilityType::Reflection],
            )
            .denied()
        } else {
            SecurityViolation::new(
                Analyzer::Ast,
                ViolationKind::ReflectionAbuse,
                Severity::High,
                location,
                format!("access to interpreter internal `{}`", path.join("")),
                vec![CapabilityType::Reflection],
            )
        };
        self.report(violation.with_cwe("CWE-470"));
    }

    /// `__builtins__["eval"]`, `globals()["x"]`, `vars(obj)[k]`
    fn namespace_subscript(&mut self, sub: &SubscriptExpr) {
        let namespace = match sub.object.as_ref() {
            Expr::Call(call) => call.callee_name(),
            other => other.dotted_name(),
        };
        let Some(namespace) = namespace.filter(|n| self.registry.is_reflective_namespace(n)) else {
            return;
        };
        let location = Location::from(sub.span);
        let key = sub.index.as_str_literal();
        let violation = match key.filter(|k| self.registry.is_dynamic_execution(k)) {
            Some(key) => SecurityViolation::new(
                Analyzer::Ast,
                ViolationKind::ReflectionAbuse,
                Severity::Critical,
                location,
                format!("`{}` fetched from reflective namespace `{}`", key, namespace),
                vec![CapabilityType::CodeEval, CapabilityType::Reflection],
            )
            .denied(),
            None => SecurityViolation::new(
                Analyzer::Ast,
                ViolationKind::ReflectionAbuse,
                Severity::High,
                location,
                format!("subscript into reflective namespace `{}`", namespace),
                vec![CapabilityType::Reflection],
            ),
        };
        self.report(violation.with_cwe("CWE-470"));
    }
}

fn is_true(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(Literal::Bool(b), _) => *b,
        Expr::Name(id) => id.name == "True",
        _ => false,
    }
}

/// String concatenation, `%` formatting or an f-string mixing literals with values
fn is_injection_shaped(expr: &Expr) -> bool {
    match expr {
        Expr::Group(inner, _) => is_injection_shaped(inner),
        Expr::FString(parts, _) => parts.iter().any(|p| matches!(p, FStringPart::Expr(_))),
        Expr::Binary(b) if b.op == BinaryOp::Mod => {
            b.left.as_str_literal().is_some() && b.right.as_str_literal().is_none()
        }
        Expr::Binary(b) if b.op == BinaryOp::Add => {
            let mut has_literal = false;
            let mut has_value = false;
            expr.walk(&mut |e| match e {
                Expr::Literal(Literal::String(_), _) | Expr::FString(..) => has_literal = true,
                Expr::Name(_) | Expr::Call(_) | Expr::Attribute(_) | Expr::Subscript(_) => {
                    has_value = true
                }
                _ => {}
            });
            has_literal && has_value
        }
        _ => false,
    }
}

fn has_traversal_literal(expr: &Expr) -> bool {
    let mut found = false;
    expr.walk(&mut |e| {
        if let Expr::Literal(Literal::String(s), _) = e {
            if s.contains("../") || s.contains("..\\") || s == ".." {
                found = true;
            }
        }
    });
    found
}
