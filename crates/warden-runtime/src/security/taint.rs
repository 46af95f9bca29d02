//! Data-flow / taint tracking
//!
//! Follows values from untrusted sources (user input, command line,
//! environment, network and file reads) through assignments and expression
//! composition to dangerous sinks.
//!
//! This is a heuristic, flow-insensitive-per-branch analysis and not a sound
//! type system:
//! - both arms of an `if` are assumed reachable and their results are merged;
//!   dead branches are not pruned
//! - loop bodies are analysed twice to pick up loop-carried flows
//! - calls to unknown functions pass argument taint through
//! - a function body sees the enclosing scope, with its parameters shadowing
//!   outer names; it is analysed once where it is defined (parameters
//!   untainted) and again at each call with the arguments' taint bound to the
//!   parameters, within a fixed budget
//! - a call to a user-defined function carries whatever its `return`
//!   statements may yield, on top of the argument pass-through
//!
//! Reassigning a variable replaces its taint with the taint of the new value.
//! Since the new value's taint includes any variable it reads, `x = x + "a"`
//! keeps the old taint while `x = "safe"` clears it.

use crate::ast::*;
use crate::security::aliases::ImportAliases;
use crate::security::registry::{OperationRegistry, SinkKind, SourceKind};
use crate::security::report::{Analyzer, RiskLevel, SecurityViolation};
use crate::security::types::{Location, Severity, ViolationKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-hop decay of path confidence
const HOP_DECAY: f64 = 0.1;

/// Hops recorded per path; longer chains keep their first hops
const MAX_HOPS: usize = 32;

/// Function bodies re-analysed at call sites per program
const CALL_BUDGET: usize = 64;

/// Nested user-defined calls followed at once
const MAX_CALL_DEPTH: usize = 8;

/// Where untrusted data entered
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaintSource {
    pub kind: SourceKind,
    /// Qualified operation, e.g. `input` or `os.environ`
    pub name: String,
    pub location: Location,
}

/// A variable the tainted value passed through
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowHop {
    pub variable: String,
    pub location: Location,
}

/// The dangerous operation a path ends at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SinkSite {
    pub kind: SinkKind,
    pub name: String,
    pub location: Location,
}

/// Concrete chain from a source through variables to a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFlowPath {
    pub source: TaintSource,
    pub hops: Vec<FlowHop>,
    pub sink: SinkSite,
    /// A recognised sanitizer was applied somewhere on the path
    pub sanitized: bool,
    pub risk: RiskLevel,
}

impl DataFlowPath {
    /// Risk from sink danger, path length and sanitization
    pub fn assess(sink: SinkKind, hops: usize, sanitized: bool) -> RiskLevel {
        if sanitized {
            return RiskLevel::Low;
        }
        let score = sink.danger() / (1.0 + HOP_DECAY * hops as f64);
        if score >= 0.85 {
            RiskLevel::Critical
        } else if score >= 0.65 {
            RiskLevel::High
        } else if score >= 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Violation for an unsanitized path; sanitized paths yield `None`
    pub fn to_violation(&self) -> Option<SecurityViolation> {
        if self.sanitized {
            return None;
        }
        let severity = match self.risk {
            RiskLevel::Critical => Severity::Critical,
            RiskLevel::High => Severity::High,
            RiskLevel::Medium => Severity::Medium,
            RiskLevel::Low | RiskLevel::None => Severity::Low,
        };
        let via = if self.hops.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = self.hops.iter().map(|h| h.variable.as_str()).collect();
            format!(" via {}", names.join(" -> "))
        };
        let message = format!(
            "untrusted data from `{}` (line {}) reaches `{}`{}",
            self.source.name, self.source.location.line, self.sink.name, via
        );
        Some(SecurityViolation::new(
            Analyzer::Taint,
            ViolationKind::TaintedDataFlow,
            severity,
            self.sink.location,
            message,
            self.sink.kind.capability().into_iter().collect(),
        ))
    }
}

/// One taint label carried by a value
#[derive(Debug, Clone, PartialEq)]
struct Taint {
    source: TaintSource,
    hops: Vec<FlowHop>,
    sanitized: bool,
}

type TaintSet = Vec<Taint>;

/// Union that keeps one label per (source, sanitized), preferring the shorter path
fn union_into(target: &mut TaintSet, incoming: TaintSet) {
    for taint in incoming {
        match target
            .iter_mut()
            .find(|t| t.source == taint.source && t.sanitized == taint.sanitized)
        {
            Some(existing) if taint.hops.len() < existing.hops.len() => *existing = taint,
            Some(_) => {}
            None => target.push(taint),
        }
    }
}

type Scope = HashMap<String, TaintSet>;

fn merge_scopes(mut a: Scope, b: Scope) -> Scope {
    for (name, taints) in b {
        union_into(a.entry(name).or_default(), taints);
    }
    a
}

/// Taint tracker over a parsed program
#[derive(Debug, Clone)]
pub struct TaintTracker {
    registry: Arc<OperationRegistry>,
}

impl Default for TaintTracker {
    fn default() -> Self {
        Self::new(OperationRegistry::builtin())
    }
}

impl TaintTracker {
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self { registry }
    }

    /// Every source-to-sink path in the program, ordered by sink location
    pub fn analyze(&self, program: &Program) -> Vec<DataFlowPath> {
        let aliases = ImportAliases::collect(program);
        let mut walk = Walk {
            registry: &self.registry,
            aliases: &aliases,
            scope: Scope::new(),
            flows: Vec::new(),
            functions: HashMap::new(),
            returns: HashMap::new(),
            returned: None,
            active: Vec::new(),
            budget: CALL_BUDGET,
        };
        walk.block(&program.stmts);

        let mut flows = walk.flows;
        flows.sort_by_key(|f| (f.sink.location, f.source.location, f.sanitized, f.hops.len()));
        flows.dedup_by(|a, b| {
            a.sink == b.sink && a.source == b.source && a.sanitized == b.sanitized
        });
        flows
    }
}

struct Walk<'a> {
    registry: &'a OperationRegistry,
    aliases: &'a ImportAliases,
    scope: Scope,
    flows: Vec<DataFlowPath>,
    functions: HashMap<String, &'a FunctionDecl>,
    /// Return taint of each function as analysed where it was defined
    returns: HashMap<String, TaintSet>,
    /// Collects `return` taint while inside a function body
    returned: Option<TaintSet>,
    /// Functions currently being walked, innermost last
    active: Vec<String>,
    budget: usize,
}

impl<'a> Walk<'a> {
    fn block(&mut self, stmts: &'a [Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::Assign(assign) => self.assign(assign),
            Stmt::Expr(s) => {
                self.expr(&s.expr);
            }
            Stmt::Return(s) => {
                if let Some(value) = &s.value {
                    let taint = self.expr(value);
                    if let Some(returned) = &mut self.returned {
                        union_into(returned, taint);
                    }
                }
            }
            Stmt::If(s) => {
                self.expr(&s.condition);
                let before = self.scope.clone();
                self.block(&s.then_branch.stmts);
                let after_then = std::mem::replace(&mut self.scope, before);
                if let Some(else_branch) = &s.else_branch {
                    self.block(&else_branch.stmts);
                }
                let after_else = std::mem::take(&mut self.scope);
                self.scope = merge_scopes(after_then, after_else);
            }
            Stmt::While(s) => {
                for _ in 0..2 {
                    self.expr(&s.condition);
                    let before = self.scope.clone();
                    self.block(&s.body.stmts);
                    let after = std::mem::take(&mut self.scope);
                    self.scope = merge_scopes(before, after);
                }
            }
            Stmt::For(s) => {
                let iterable = self.expr(&s.iterable);
                for _ in 0..2 {
                    let before = self.scope.clone();
                    for target in &s.targets {
                        let taint = with_hop(iterable.clone(), &target.name, target.span.into());
                        self.scope.insert(target.name.clone(), taint);
                    }
                    self.block(&s.body.stmts);
                    let after = std::mem::take(&mut self.scope);
                    self.scope = merge_scopes(before, after);
                }
            }
            Stmt::Function(f) => {
                self.functions.insert(f.name.name.clone(), f);
                let returned = self.function_body(f, Vec::new()).unwrap_or_default();
                self.returns.insert(f.name.name.clone(), returned);
            }
            Stmt::Import(_) | Stmt::Capability(_) => {}
        }
    }

    /// Walk a function body with `args` bound to its parameters
    ///
    /// Returns the taint its `return` statements yield, or `None` when the
    /// call is recursive or the budget is spent.
    fn function_body(&mut self, f: &'a FunctionDecl, args: Vec<TaintSet>) -> Option<TaintSet> {
        let name = &f.name.name;
        if self.active.contains(name) || self.active.len() >= MAX_CALL_DEPTH || self.budget == 0 {
            return None;
        }
        self.budget -= 1;

        let mut scope = self.scope.clone();
        let mut args = args.into_iter();
        for param in &f.params {
            let taint = args.next().unwrap_or_default();
            scope.insert(param.name.clone(), with_hop(taint, &param.name, param.span.into()));
        }
        let outer = std::mem::replace(&mut self.scope, scope);
        let outer_returned = self.returned.replace(Vec::new());
        self.active.push(name.clone());

        self.block(&f.body.stmts);

        self.active.pop();
        let returned = std::mem::replace(&mut self.returned, outer_returned);
        self.scope = outer;
        returned
    }

    fn assign(&mut self, assign: &'a AssignStmt) {
        let value = self.expr(&assign.value);
        let location = Location::from(assign.span);

        match &assign.target {
            Expr::Name(id) => {
                let value = with_hop(value, &id.name, location);
                match assign.op {
                    AssignOp::Assign => {
                        self.scope.insert(id.name.clone(), value);
                    }
                    AssignOp::AddAssign | AssignOp::SubAssign => {
                        union_into(self.scope.entry(id.name.clone()).or_default(), value);
                    }
                }
            }
            // Partial update of a container or object: the base keeps its old taint
            target => {
                self.expr(target);
                if let Some(base) = base_name(target) {
                    let label = target.dotted_name().unwrap_or_else(|| base.to_string());
                    let value = with_hop(value, &label, location);
                    union_into(self.scope.entry(base.to_string()).or_default(), value);
                }
            }
        }
    }

    /// Taint of an expression; records sink hits as a side effect
    fn expr(&mut self, expr: &'a Expr) -> TaintSet {
        match expr {
            Expr::Name(id) => self.scope.get(&id.name).cloned().unwrap_or_default(),
            Expr::Literal(..) => Vec::new(),
            Expr::Attribute(attr) => {
                if let Some(kind) = self.source_for(expr, None) {
                    return vec![self.fresh(kind, expr)];
                }
                self.expr(&attr.object)
            }
            Expr::Subscript(sub) => {
                self.expr(&sub.index);
                self.expr(&sub.object)
            }
            Expr::Call(call) => self.call(call, expr),
            Expr::FString(..)
            | Expr::List(..)
            | Expr::Dict(..)
            | Expr::Unary(_)
            | Expr::Binary(_)
            | Expr::Group(..) => {
                let mut out = Vec::new();
                for child in expr.children() {
                    let taint = self.expr(child);
                    union_into(&mut out, taint);
                }
                out
            }
        }
    }

    fn call(&mut self, call: &'a CallExpr, expr: &'a Expr) -> TaintSet {
        let resolved = self.aliases.resolve(&call.callee);
        let method = match call.callee.as_ref() {
            Expr::Attribute(attr) => Some(attr.attr.name.as_str()),
            _ => None,
        };

        let receiver = match call.callee.as_ref() {
            Expr::Attribute(attr) => self.expr(&attr.object),
            _ => Vec::new(),
        };
        let positional: Vec<TaintSet> = call.args.iter().map(|arg| self.expr(arg)).collect();
        let mut args: TaintSet = Vec::new();
        for taint in positional.iter().cloned() {
            union_into(&mut args, taint);
        }
        for keyword in &call.keywords {
            let taint = self.expr(&keyword.value);
            union_into(&mut args, taint);
        }

        if let Some(sink) = self
            .registry
            .sink_kind(resolved.as_deref(), method)
        {
            let name = resolved.clone().unwrap_or_else(|| {
                method.map(|m| format!(".{}", m)).unwrap_or_default()
            });
            self.record_flows(&args, sink, name, Location::from(call.span));
        }

        if let Some(kind) = self.source_for(&call.callee, method) {
            return vec![self.fresh(kind, expr)];
        }

        let terminal = call.callee.terminal_name();
        if self.registry.is_sanitizer(resolved.as_deref(), terminal) {
            return args
                .into_iter()
                .map(|mut t| {
                    t.sanitized = true;
                    t
                })
                .collect();
        }

        // Unknown or user-defined call: assume arguments flow into the result
        let mut out = receiver;
        union_into(&mut out, args);

        if let Some(f) = self.user_function(&call.callee) {
            let returned = self
                .function_body(f, positional)
                .or_else(|| self.returns.get(&f.name.name).cloned())
                .unwrap_or_default();
            let label = format!("{}()", f.name.name);
            union_into(&mut out, with_hop(returned, &label, Location::from(call.span)));
        }
        out
    }

    fn user_function(&self, callee: &Expr) -> Option<&'a FunctionDecl> {
        match callee {
            Expr::Name(id) => self.functions.get(&id.name).copied(),
            _ => None,
        }
    }

    fn source_for(&self, callee: &Expr, method: Option<&str>) -> Option<SourceKind> {
        let resolved = self.aliases.resolve(callee);
        self.registry.source_kind(resolved.as_deref(), method)
    }

    fn fresh(&self, kind: SourceKind, expr: &Expr) -> Taint {
        let name = match expr {
            Expr::Call(call) => self.aliases.resolve(&call.callee),
            other => self.aliases.resolve(other),
        }
        .unwrap_or_else(|| "<expression>".to_string());
        Taint {
            source: TaintSource {
                kind,
                name,
                location: Location::from(expr.span()),
            },
            hops: Vec::new(),
            sanitized: false,
        }
    }

    fn record_flows(&mut self, taints: &TaintSet, sink: SinkKind, name: String, location: Location) {
        for taint in taints {
            self.flows.push(DataFlowPath {
                source: taint.source.clone(),
                hops: taint.hops.clone(),
                sink: SinkSite {
                    kind: sink,
                    name: name.clone(),
                    location,
                },
                sanitized: taint.sanitized,
                risk: DataFlowPath::assess(sink, taint.hops.len(), taint.sanitized),
            });
        }
    }
}

fn with_hop(taints: TaintSet, variable: &str, location: Location) -> TaintSet {
    taints
        .into_iter()
        .map(|mut t| {
            let repeated = t.hops.last().is_some_and(|h| h.variable == variable);
            if !repeated && t.hops.len() < MAX_HOPS {
                t.hops.push(FlowHop {
                    variable: variable.to_string(),
                    location,
                });
            }
            t
        })
        .collect()
}

/// Root variable of an attribute/subscript target (`a` in `a.b[0]`)
fn base_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Name(id) => Some(&id.name),
        Expr::Attribute(attr) => base_name(&attr.object),
        Expr::Subscript(sub) => base_name(&sub.object),
        Expr::Group(inner, _) => base_name(inner),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use pretty_assertions::assert_eq;

    fn flows(source: &str) -> Vec<DataFlowPath> {
        let result = parse_source(source);
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        TaintTracker::default().analyze(&result.program)
    }

    #[test]
    fn test_direct_flow() {
        let paths = flows("eval(input())");
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].source.kind, SourceKind::UserInput);
        assert!(paths[0].hops.is_empty());
        assert_eq!(paths[0].risk, RiskLevel::Critical);
    }

    #[test]
    fn test_propagation_through_variables() {
        let paths = flows("x = input()\ny = x\neval(y)");
        assert_eq!(paths.len(), 1);
        let hops: Vec<_> = paths[0].hops.iter().map(|h| h.variable.as_str()).collect();
        assert_eq!(hops, vec!["x", "y"]);
        assert_eq!(paths[0].sink.name, "eval");
    }

    #[test]
    fn test_reassignment_clears_taint() {
        assert!(flows("x = input()\nx = \"safe\"\neval(x)").is_empty());
    }

    #[test]
    fn test_self_referencing_reassignment_keeps_taint() {
        assert_eq!(flows("x = input()\nx = x + \"a\"\neval(x)").len(), 1);
    }

    #[test]
    fn test_augmented_assignment_unions() {
        assert_eq!(flows("x = \"ls \"\nx += input()\nos.system(x)").len(), 1);
    }

    #[test]
    fn test_unknown_function_is_pessimistic() {
        let paths = flows("cmd = transform(os.getenv(\"CMD\"))\nsubprocess.run(cmd)");
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].source.kind, SourceKind::Environment);
        assert_eq!(paths[0].sink.kind, SinkKind::ShellInvocation);
    }

    #[test]
    fn test_sanitizer_marks_path() {
        let paths = flows("import shlex\nx = shlex.quote(input())\nos.system(x)");
        assert_eq!(paths.len(), 1);
        assert!(paths[0].sanitized);
        assert_eq!(paths[0].risk, RiskLevel::Low);
        assert!(paths[0].to_violation().is_none());
    }

    #[test]
    fn test_branches_are_merged() {
        let source = "x = \"ok\"\nif flag {\n  x = input()\n} else {\n  x = \"fine\"\n}\neval(x)";
        assert_eq!(flows(source).len(), 1);
    }

    #[test]
    fn test_method_source_and_sink() {
        let source = "data = conn.recv(1024)\ncursor.execute(\"SELECT \" + data)";
        let paths = flows(source);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].source.kind, SourceKind::Network);
        assert_eq!(paths[0].sink.kind, SinkKind::SqlExecute);
    }

    #[test]
    fn test_aliased_sink() {
        let paths = flows("from subprocess import run as go\ngo(sys.argv)");
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].sink.name, "subprocess.run");
        assert_eq!(paths[0].source.kind, SourceKind::CommandLine);
    }

    #[test]
    fn test_parameters_shadow_outer_names() {
        let source = "x = input()\nfn f(x) {\n  eval(x)\n}";
        assert!(flows(source).is_empty());
    }

    #[test]
    fn test_function_body_sees_tainted_global() {
        let paths = flows("x = input()\nfn f() {\n  eval(x)\n}\nf()");
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].sink.name, "eval");
        assert_eq!(paths[0].source.kind, SourceKind::UserInput);
    }

    #[test]
    fn test_return_carries_source_taint() {
        let paths = flows("fn g() {\n  return input()\n}\neval(g())");
        assert_eq!(paths.len(), 1);
        let hops: Vec<_> = paths[0].hops.iter().map(|h| h.variable.as_str()).collect();
        assert_eq!(hops, vec!["g()"]);
    }

    #[test]
    fn test_arguments_reach_sink_inside_function() {
        let paths = flows("fn run(cmd) {\n  os.system(cmd)\n}\nrun(input())");
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].sink.kind, SinkKind::ShellInvocation);
        assert_eq!(paths[0].hops[0].variable, "cmd");
    }

    #[test]
    fn test_recursive_function_terminates() {
        let source = "fn loop(n) {\n  return loop(n)\n}\neval(loop(input()))";
        assert_eq!(flows(source).len(), 1);
    }

    #[test]
    fn test_loop_carried_flow() {
        let source = "y = \"\"\nfor line in sys.stdin.read() {\n  y = line\n}\nos.system(y)";
        assert_eq!(flows(source).len(), 1);
    }

    #[test]
    fn test_risk_decreases_with_hops() {
        assert_eq!(
            DataFlowPath::assess(SinkKind::DynamicExecution, 0, false),
            RiskLevel::Critical
        );
        assert_eq!(
            DataFlowPath::assess(SinkKind::DynamicExecution, 3, false),
            RiskLevel::High
        );
        assert_eq!(
            DataFlowPath::assess(SinkKind::FileWrite, 0, false),
            RiskLevel::Medium
        );
    }

    #[test]
    fn test_violation_carries_sink_capability() {
        let paths = flows("os.system(input())");
        let violation = paths[0].to_violation().unwrap();
        assert_eq!(violation.severity(), Severity::Critical);
        assert_eq!(
            violation.required_capabilities(),
            &[crate::security::types::CapabilityType::ProcessSpawn]
        );
    }
}
