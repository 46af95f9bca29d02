//! Warden Runtime - security core for untrusted scripts
//!
//! This library provides:
//! - A small script front end (lexing and parsing to an AST)
//! - Static security analysis (patterns, AST structure, taint flow)
//! - Capability tokens, scoped contexts and a policy-driven validator
//! - A supervised process sandbox with resource ceilings

/// Warden runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Public API modules
pub mod ast;
pub mod diagnostic;
pub mod lexer;
pub mod parser;
pub mod security;
pub mod span;
pub mod token;

// Re-export commonly used types
pub use diagnostic::{Diagnostic, DiagnosticLevel, DIAG_VERSION};
pub use lexer::Lexer;
pub use parser::{parse_source, ParseResult, Parser};
pub use security::{
    AnalysisOptions, AnalysisRunner, CapabilityManager, CapabilityType, EnhancedValidator,
    SandboxConfig, SandboxExecutor, SecurePipeline, SecurityReport, Severity,
};
pub use span::Span;
pub use token::{Token, TokenKind};
