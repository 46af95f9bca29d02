//! Abstract Syntax Tree (AST) definitions
//!
//! The tree is deliberately small: it covers the statements and expressions
//! the security analyzers reason about (imports, calls, attribute chains,
//! string construction, assignments and control flow).

use crate::span::Span;
use serde::{Deserialize, Serialize};

/// AST schema version
///
/// Increment when making breaking changes to the AST structure.
pub const AST_VERSION: u32 = 1;

/// Top-level program
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

impl Program {
    /// All capability declarations, including those nested in blocks
    pub fn capability_decls(&self) -> Vec<&CapabilityDecl> {
        fn collect<'a>(stmts: &'a [Stmt], out: &mut Vec<&'a CapabilityDecl>) {
            for stmt in stmts {
                if let Stmt::Capability(decl) = stmt {
                    out.push(decl);
                }
                for block in stmt.child_blocks() {
                    collect(&block.stmts, out);
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.stmts, &mut out);
        out
    }
}

/// Identifier with its source location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    pub name: String,
    pub span: Span,
}

/// Brace-delimited statement list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

/// Statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Import(ImportStmt),
    Assign(AssignStmt),
    Expr(ExprStmt),
    Function(FunctionDecl),
    If(IfStmt),
    While(WhileStmt),
    For(ForStmt),
    Return(ReturnStmt),
    Capability(CapabilityDecl),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Import(s) => s.span,
            Stmt::Assign(s) => s.span,
            Stmt::Expr(s) => s.span,
            Stmt::Function(s) => s.span,
            Stmt::If(s) => s.span,
            Stmt::While(s) => s.span,
            Stmt::For(s) => s.span,
            Stmt::Return(s) => s.span,
            Stmt::Capability(s) => s.span,
        }
    }

    /// Expressions owned directly by this statement (not by nested blocks)
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Stmt::Assign(s) => vec![&s.target, &s.value],
            Stmt::Expr(s) => vec![&s.expr],
            Stmt::If(s) => vec![&s.condition],
            Stmt::While(s) => vec![&s.condition],
            Stmt::For(s) => vec![&s.iterable],
            Stmt::Return(s) => s.value.iter().collect(),
            Stmt::Import(_) | Stmt::Function(_) | Stmt::Capability(_) => Vec::new(),
        }
    }

    /// Nested blocks in source order
    pub fn child_blocks(&self) -> Vec<&Block> {
        match self {
            Stmt::Function(s) => vec![&s.body],
            Stmt::If(s) => {
                let mut blocks = vec![&s.then_branch];
                if let Some(else_branch) = &s.else_branch {
                    blocks.push(else_branch);
                }
                blocks
            }
            Stmt::While(s) => vec![&s.body],
            Stmt::For(s) => vec![&s.body],
            _ => Vec::new(),
        }
    }
}

/// Import statement
///
/// `import a.b as c` has `from: None`; `from a import b as c` has
/// `from: Some("a")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportStmt {
    pub from: Option<String>,
    pub names: Vec<ImportName>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportName {
    /// Dotted path as written
    pub path: String,
    pub alias: Option<String>,
    pub span: Span,
}

impl ImportStmt {
    /// Fully qualified module paths touched by this import
    pub fn modules(&self) -> Vec<String> {
        match &self.from {
            Some(base) => {
                let mut modules = vec![base.clone()];
                modules.extend(self.names.iter().map(|n| format!("{}.{}", base, n.path)));
                modules
            }
            None => self.names.iter().map(|n| n.path.clone()).collect(),
        }
    }

    /// Local bindings introduced, as `(local name, qualified target)`
    pub fn bindings(&self) -> Vec<(String, String)> {
        self.names
            .iter()
            .map(|n| match (&self.from, &n.alias) {
                (Some(base), alias) => (
                    alias.clone().unwrap_or_else(|| n.path.clone()),
                    format!("{}.{}", base, n.path),
                ),
                (None, Some(alias)) => (alias.clone(), n.path.clone()),
                // `import a.b` binds `a`
                (None, None) => {
                    let head = n.path.split('.').next().unwrap_or(&n.path).to_string();
                    (head.clone(), head)
                }
            })
            .collect()
    }
}

/// Assignment operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
}

/// Assignment: `[let] target op value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignStmt {
    pub target: Expr,
    pub op: AssignOp,
    pub value: Expr,
    pub is_let: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprStmt {
    pub expr: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: Identifier,
    pub params: Vec<Identifier>,
    pub body: Block,
    pub span: Span,
}

/// `if` statement; `else if` is an else block holding a single nested `If`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfStmt {
    pub condition: Expr,
    pub then_branch: Block,
    pub else_branch: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileStmt {
    pub condition: Expr,
    pub body: Block,
    pub span: Span,
}

/// `for a, b in iterable { ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForStmt {
    pub targets: Vec<Identifier>,
    pub iterable: Expr,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub span: Span,
}

/// Capability declaration
///
/// ```text
/// capability Reports {
///     allow read "/data/reports/**"
///     allow write, append "/tmp/out/*"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDecl {
    pub name: Identifier,
    pub grants: Vec<CapabilityGrant>,
    pub span: Span,
}

/// One `allow <ops> "<pattern>"` line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityGrant {
    pub operations: Vec<String>,
    pub pattern: String,
    pub span: Span,
}

/// Expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Name(Identifier),
    Literal(Literal, Span),
    FString(Vec<FStringPart>, Span),
    List(Vec<Expr>, Span),
    Dict(Vec<(Expr, Expr)>, Span),
    Attribute(AttributeExpr),
    Subscript(SubscriptExpr),
    Call(CallExpr),
    Unary(UnaryExpr),
    Binary(BinaryExpr),
    Group(Box<Expr>, Span),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FStringPart {
    Text(String),
    Expr(Expr),
}

/// `object.attr`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeExpr {
    pub object: Box<Expr>,
    pub attr: Identifier,
    pub span: Span,
}

/// `object[index]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptExpr {
    pub object: Box<Expr>,
    pub index: Box<Expr>,
    pub span: Span,
}

/// `callee(args, name=value)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpr {
    pub callee: Box<Expr>,
    pub args: Vec<Expr>,
    pub keywords: Vec<KeywordArg>,
    pub span: Span,
}

impl CallExpr {
    /// Dotted callee name, e.g. `os.system` (see [`Expr::dotted_name`])
    pub fn callee_name(&self) -> Option<String> {
        self.callee.dotted_name()
    }

    pub fn keyword(&self, name: &str) -> Option<&Expr> {
        self.keywords
            .iter()
            .find(|k| k.name.name == name)
            .map(|k| &k.value)
    }

    /// Positional then keyword argument values
    pub fn all_args(&self) -> impl Iterator<Item = &Expr> {
        self.args.iter().chain(self.keywords.iter().map(|k| &k.value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordArg {
    pub name: Identifier,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub left: Box<Expr>,
    pub op: BinaryOp,
    pub right: Box<Expr>,
    pub span: Span,
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Name(id) => id.span,
            Expr::Literal(_, span)
            | Expr::FString(_, span)
            | Expr::List(_, span)
            | Expr::Dict(_, span)
            | Expr::Group(_, span) => *span,
            Expr::Attribute(e) => e.span,
            Expr::Subscript(e) => e.span,
            Expr::Call(e) => e.span,
            Expr::Unary(e) => e.span,
            Expr::Binary(e) => e.span,
        }
    }

    /// Dotted name for a plain name/attribute chain (`a.b.c`)
    ///
    /// Returns `None` when the chain contains a call, subscript or literal.
    pub fn dotted_name(&self) -> Option<String> {
        match self {
            Expr::Name(id) => Some(id.name.clone()),
            Expr::Attribute(attr) => attr
                .object
                .dotted_name()
                .map(|base| format!("{}.{}", base, attr.attr.name)),
            Expr::Group(inner, _) => inner.dotted_name(),
            _ => None,
        }
    }

    /// The last attribute (or the name) of a callee, e.g. `compile` for `re.compile`
    pub fn terminal_name(&self) -> Option<&str> {
        match self {
            Expr::Name(id) => Some(&id.name),
            Expr::Attribute(attr) => Some(&attr.attr.name),
            Expr::Group(inner, _) => inner.terminal_name(),
            _ => None,
        }
    }

    pub fn as_str_literal(&self) -> Option<&str> {
        match self {
            Expr::Literal(Literal::String(s), _) => Some(s),
            _ => None,
        }
    }

    /// Direct sub-expressions in source order
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Name(_) | Expr::Literal(..) => Vec::new(),
            Expr::FString(parts, _) => parts
                .iter()
                .filter_map(|p| match p {
                    FStringPart::Expr(e) => Some(e),
                    FStringPart::Text(_) => None,
                })
                .collect(),
            Expr::List(items, _) => items.iter().collect(),
            Expr::Dict(entries, _) => entries.iter().flat_map(|(k, v)| [k, v]).collect(),
            Expr::Attribute(e) => vec![&e.object],
            Expr::Subscript(e) => vec![&e.object, &e.index],
            Expr::Call(e) => {
                let mut out: Vec<&Expr> = vec![&e.callee];
                out.extend(e.all_args());
                out
            }
            Expr::Unary(e) => vec![&e.operand],
            Expr::Binary(e) => vec![&e.left, &e.right],
            Expr::Group(inner, _) => vec![inner],
        }
    }

    /// Pre-order traversal over this expression and all nested expressions
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Every variable name read by this expression
    pub fn referenced_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Name(id) = e {
                names.push(id.name.as_str());
            }
        });
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Expr {
        Expr::Name(Identifier {
            name: n.to_string(),
            span: Span::dummy(),
        })
    }

    fn attr(object: Expr, a: &str) -> Expr {
        Expr::Attribute(AttributeExpr {
            object: Box::new(object),
            attr: Identifier {
                name: a.to_string(),
                span: Span::dummy(),
            },
            span: Span::dummy(),
        })
    }

    #[test]
    fn test_dotted_name() {
        let e = attr(attr(name("os"), "path"), "join");
        assert_eq!(e.dotted_name().as_deref(), Some("os.path.join"));
        assert_eq!(e.terminal_name(), Some("join"));
    }

    #[test]
    fn test_import_bindings() {
        let stmt = ImportStmt {
            from: None,
            names: vec![ImportName {
                path: "os.path".to_string(),
                alias: None,
                span: Span::dummy(),
            }],
            span: Span::dummy(),
        };
        assert_eq!(stmt.modules(), vec!["os.path".to_string()]);
        assert_eq!(stmt.bindings(), vec![("os".to_string(), "os".to_string())]);

        let stmt = ImportStmt {
            from: Some("subprocess".to_string()),
            names: vec![ImportName {
                path: "run".to_string(),
                alias: Some("r".to_string()),
                span: Span::dummy(),
            }],
            span: Span::dummy(),
        };
        assert_eq!(
            stmt.bindings(),
            vec![("r".to_string(), "subprocess.run".to_string())]
        );
    }
}
