//! Parsing (tokens to AST)
//!
//! The parser converts a stream of tokens into an Abstract Syntax Tree (AST).
//! Uses Pratt parsing for expressions and recursive descent for statements.
//! Errors never escape as `Err`: they are recorded as diagnostics and the
//! parser resynchronises at the next statement boundary.
//!
//! Nesting is capped at [`MAX_NESTING`]. Every bracket, unary operator, block
//! and chained infix operator counts one level, which also bounds the height
//! of the tree handed to the analyzers. Deeper input is a syntax error
//! (WD1003) rather than a stack overflow.

mod expr;
mod stmt;

use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

/// Deepest nesting the parser accepts
pub const MAX_NESTING: usize = 100;

/// Parser state for building AST from tokens
pub struct Parser {
    pub(super) tokens: Vec<Token>,
    pub(super) current: usize,
    pub(super) diagnostics: Vec<Diagnostic>,
    pub(super) depth: usize,
    nesting_reported: bool,
}

/// Operator precedence levels for Pratt parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum Precedence {
    Lowest,
    Or,         // or ||
    And,        // and &&
    Not,        // not
    Equality,   // == !=
    Comparison, // < <= > >= in
    Term,       // + -
    Factor,     // * / %
    Unary,      // ! -
    Call,       // () [] .
}

/// Result of parsing one source text
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    /// Every statement that parsed; partial when diagnostics contain errors
    pub program: Program,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Lex and parse a source text
pub fn parse_source(source: &str) -> ParseResult {
    let mut lexer = Lexer::new(source);
    let (tokens, mut diagnostics) = lexer.tokenize();
    let mut parser = Parser::new(tokens);
    let (program, parse_diagnostics) = parser.parse();
    diagnostics.extend(parse_diagnostics);
    ParseResult {
        program,
        diagnostics,
    }
}

impl Parser {
    /// Create a new parser for the given tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            diagnostics: Vec::new(),
            depth: 0,
            nesting_reported: false,
        }
    }

    /// Parse tokens into an AST
    pub fn parse(&mut self) -> (Program, Vec<Diagnostic>) {
        let mut stmts = Vec::new();

        loop {
            self.skip_terminators();
            if self.is_at_end() {
                break;
            }
            if self.check(TokenKind::RightBrace) {
                self.error("Unexpected '}'");
                self.advance();
                continue;
            }
            match self.parse_statement() {
                Ok(stmt) => stmts.push(stmt),
                Err(_) => self.synchronize(),
            }
        }

        (Program { stmts }, std::mem::take(&mut self.diagnostics))
    }

    // === Token navigation ===

    /// Advance to next token and return the consumed one
    pub(super) fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current - 1]
    }

    /// Peek at current token
    pub(super) fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    /// Peek `offset` tokens ahead, clamped to EOF
    pub(super) fn peek_at(&self, offset: usize) -> &Token {
        let index = (self.current + offset).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    /// Most recently consumed token
    pub(super) fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    /// Check if current token matches kind
    pub(super) fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    /// Match and consume token if it matches
    pub(super) fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume token of expected kind or record an error
    pub(super) fn consume(&mut self, kind: TokenKind, message: &str) -> Result<&Token, ()> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            self.error(message);
            Err(())
        }
    }

    /// Consume an identifier, naming what was expected on failure
    pub(super) fn consume_identifier(&mut self, context: &str) -> Result<&Token, ()> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance())
        } else {
            let found = self.peek().lexeme.clone();
            self.error(&format!("Expected {}, found '{}'", context, found));
            Err(())
        }
    }

    /// Check if at end of token stream
    pub(super) fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    /// Skip statement separators (newlines and semicolons)
    pub(super) fn skip_terminators(&mut self) {
        while self.check(TokenKind::Newline) || self.check(TokenKind::Semicolon) {
            self.advance();
        }
    }

    /// Skip newlines inside brace-delimited literals
    pub(super) fn skip_newlines(&mut self) {
        while self.check(TokenKind::Newline) {
            self.advance();
        }
    }

    // === Error handling ===

    /// Record a syntax error at the current token
    ///
    /// Lexer error tokens already carry a diagnostic, so none is added twice.
    pub(super) fn error(&mut self, message: &str) {
        let token = self.peek();
        if token.kind == TokenKind::Error {
            return;
        }
        let span = token.span;
        self.diagnostics.push(
            Diagnostic::error_with_code("WD1000", message, span)
                .with_label("syntax error")
                .with_help("check your syntax for typos or missing tokens"),
        );
    }

    /// Count one level of nesting; callers restore `depth` when they return
    pub(super) fn descend(&mut self) -> Result<(), ()> {
        self.depth += 1;
        if self.depth <= MAX_NESTING {
            return Ok(());
        }
        if !self.nesting_reported {
            self.nesting_reported = true;
            let span = self.peek().span;
            self.diagnostics.push(
                Diagnostic::error_with_code(
                    "WD1003",
                    format!("Nesting deeper than {} levels", MAX_NESTING),
                    span,
                )
                .with_label("nested too deeply")
                .with_help("split the expression into smaller assignments"),
            );
        }
        Err(())
    }

    /// Skip tokens until the start of the next statement
    pub(super) fn synchronize(&mut self) {
        self.advance();

        while !self.is_at_end() {
            if matches!(
                self.previous().kind,
                TokenKind::Newline | TokenKind::Semicolon
            ) {
                return;
            }

            match self.peek().kind {
                TokenKind::Fn
                | TokenKind::Let
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return
                | TokenKind::Import
                | TokenKind::From
                | TokenKind::RightBrace => return,
                _ => {
                    self.advance();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_empty() {
        let result = parse_source("");
        assert!(result.program.stmts.is_empty());
        assert!(!result.has_errors());
    }

    #[test]
    fn test_parse_statements_separated_by_newline_and_semicolon() {
        let result = parse_source("x = 1; y = 2\nz = 3\n");
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert_eq!(result.program.stmts.len(), 3);
    }

    #[test]
    fn test_recovery_preserves_valid_code_after_error() {
        let result = parse_source("x = \ny = 2\nprint(y)");
        assert!(result.has_errors());
        assert!(result
            .program
            .stmts
            .iter()
            .any(|s| matches!(s, Stmt::Expr(_))));
    }

    #[test]
    fn test_recovery_no_infinite_loop_on_eof() {
        let result = parse_source("fn broken(");
        assert!(result.has_errors());
    }

    #[test]
    fn test_stray_closing_brace() {
        let result = parse_source("}\nx = 1");
        assert!(result.has_errors());
        assert_eq!(result.program.stmts.len(), 1);
    }

    #[test]
    fn test_lexer_error_reported_once() {
        let result = parse_source("x = $");
        let errors: Vec<_> = result.diagnostics.iter().filter(|d| d.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "WD1001");
    }

    #[test]
    fn test_deep_parentheses_are_a_syntax_error() {
        let depth = 5000;
        let source = format!("x = {}1{}\ny = 2\n", "(".repeat(depth), ")".repeat(depth));
        let result = parse_source(&source);
        let nesting: Vec<_> = result
            .diagnostics
            .iter()
            .filter(|d| d.code == "WD1003")
            .collect();
        assert_eq!(nesting.len(), 1);
        assert!(result.program.stmts.iter().any(|s| matches!(s, Stmt::Assign(_))));
    }

    #[test]
    fn test_long_operator_chain_is_bounded() {
        let source = format!("x = 1{}\n", " + 1".repeat(20_000));
        let result = parse_source(&source);
        assert!(result.diagnostics.iter().any(|d| d.code == "WD1003"));
    }

    #[test]
    fn test_deep_blocks_are_bounded() {
        let depth = 3000;
        let source = format!("{}x = 1{}", "if a {\n".repeat(depth), "\n}".repeat(depth));
        let result = parse_source(&source);
        assert!(result.diagnostics.iter().any(|d| d.code == "WD1003"));
    }

    #[test]
    fn test_moderate_nesting_still_parses() {
        let source = format!("x = {}1{}\n", "(".repeat(30), ")".repeat(30));
        let result = parse_source(&source);
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }
}
