//! Import alias resolution
//!
//! Maps local names introduced by imports back to the qualified names the
//! [`OperationRegistry`](crate::security::registry::OperationRegistry) knows,
//! so `import subprocess as sp; sp.run(...)` and
//! `from subprocess import run; run(...)` both resolve to `subprocess.run`.

use crate::ast::{Expr, Program, Stmt};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ImportAliases {
    bindings: HashMap<String, String>,
}

impl ImportAliases {
    /// Collect bindings from every import in the program, including nested ones
    pub fn collect(program: &Program) -> Self {
        fn visit(stmts: &[Stmt], bindings: &mut HashMap<String, String>) {
            for stmt in stmts {
                if let Stmt::Import(import) = stmt {
                    bindings.extend(import.bindings());
                }
                for block in stmt.child_blocks() {
                    visit(&block.stmts, bindings);
                }
            }
        }
        let mut bindings = HashMap::new();
        visit(&program.stmts, &mut bindings);
        Self { bindings }
    }

    /// Qualified name for a dotted name
    pub fn resolve_name(&self, dotted: &str) -> String {
        let (head, rest) = match dotted.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (dotted, None),
        };
        match (self.bindings.get(head), rest) {
            (Some(target), Some(rest)) => format!("{}.{}", target, rest),
            (Some(target), None) => target.clone(),
            (None, _) => dotted.to_string(),
        }
    }

    /// Qualified name for a name/attribute chain, `None` for anything else
    pub fn resolve(&self, expr: &Expr) -> Option<String> {
        expr.dotted_name().map(|d| self.resolve_name(&d))
    }
}
