//! Lexical analysis (tokenization)
//!
//! The lexer converts script source into a stream of tokens with accurate span
//! information. Line breaks are significant (they terminate statements) except
//! inside parentheses and brackets.

use crate::diagnostic::Diagnostic;
use crate::span::Span;
use crate::token::{Token, TokenKind};

mod literals;

/// Lexer state for tokenizing source code
pub struct Lexer {
    /// Original source code
    pub(super) source: String,
    /// Characters of source code
    pub(super) chars: Vec<char>,
    /// Current position in chars
    pub(super) current: usize,
    /// Current line number (1-indexed)
    pub(super) line: u32,
    /// Current column number (1-indexed)
    pub(super) column: u32,
    /// Start position of current token
    pub(super) start_pos: usize,
    /// Start line of current token
    pub(super) start_line: u32,
    /// Start column of current token
    pub(super) start_column: u32,
    /// Collected diagnostics
    pub(super) diagnostics: Vec<Diagnostic>,
    /// Open `(` / `[` count; newlines are insignificant while non-zero
    nesting: usize,
}

impl Lexer {
    /// Create a new lexer for the given source code
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let chars: Vec<char> = source.chars().collect();
        Self {
            source,
            chars,
            current: 0,
            line: 1,
            column: 1,
            start_pos: 0,
            start_line: 1,
            start_column: 1,
            diagnostics: Vec::new(),
            nesting: 0,
        }
    }

    /// Tokenize the source code, returning tokens and any diagnostics
    ///
    /// Consecutive line breaks collapse into one `Newline` token, and no
    /// `Newline` is emitted before the first real token.
    pub fn tokenize(&mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens: Vec<Token> = Vec::new();

        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            let redundant_newline = token.kind == TokenKind::Newline
                && tokens
                    .last()
                    .map_or(true, |prev| prev.kind == TokenKind::Newline);
            if !redundant_newline {
                tokens.push(token);
            }
            if is_eof {
                break;
            }
        }

        (tokens, std::mem::take(&mut self.diagnostics))
    }

    /// Scan the next token
    fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        self.start_pos = self.current;
        self.start_line = self.line;
        self.start_column = self.column;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof, "");
        }

        let c = self.advance();

        match c {
            '\n' => {
                self.line += 1;
                self.column = 1;
                self.make_token(TokenKind::Newline, "\\n")
            }
            '(' => {
                self.nesting += 1;
                self.make_token(TokenKind::LeftParen, "(")
            }
            ')' => {
                self.nesting = self.nesting.saturating_sub(1);
                self.make_token(TokenKind::RightParen, ")")
            }
            '[' => {
                self.nesting += 1;
                self.make_token(TokenKind::LeftBracket, "[")
            }
            ']' => {
                self.nesting = self.nesting.saturating_sub(1);
                self.make_token(TokenKind::RightBracket, "]")
            }
            '{' => self.make_token(TokenKind::LeftBrace, "{"),
            '}' => self.make_token(TokenKind::RightBrace, "}"),
            ';' => self.make_token(TokenKind::Semicolon, ";"),
            ',' => self.make_token(TokenKind::Comma, ","),
            ':' => self.make_token(TokenKind::Colon, ":"),
            '.' => self.make_token(TokenKind::Dot, "."),
            '*' => self.make_token(TokenKind::Star, "*"),
            '/' => self.make_token(TokenKind::Slash, "/"),
            '%' => self.make_token(TokenKind::Percent, "%"),

            '+' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::PlusEqual, "+=")
                } else {
                    self.make_token(TokenKind::Plus, "+")
                }
            }
            '-' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::MinusEqual, "-=")
                } else {
                    self.make_token(TokenKind::Minus, "-")
                }
            }
            '=' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::EqualEqual, "==")
                } else {
                    self.make_token(TokenKind::Equal, "=")
                }
            }
            '!' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::BangEqual, "!=")
                } else {
                    self.make_token(TokenKind::Not, "!")
                }
            }
            '<' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::LessEqual, "<=")
                } else {
                    self.make_token(TokenKind::Less, "<")
                }
            }
            '>' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::GreaterEqual, ">=")
                } else {
                    self.make_token(TokenKind::Greater, ">")
                }
            }
            '&' if self.match_char('&') => self.make_token(TokenKind::And, "&&"),
            '|' if self.match_char('|') => self.make_token(TokenKind::Or, "||"),

            '"' | '\'' => self.string(c, true),

            c if c.is_ascii_digit() => self.number(),

            c if c.is_alphabetic() || c == '_' => self.identifier(),

            _ => self.error_token(&format!("Unexpected character '{}'", c)),
        }
    }

    /// Skip insignificant whitespace and comments
    ///
    /// Line breaks are left in place unless inside `(` or `[`.
    fn skip_whitespace_and_comments(&mut self) {
        loop {
            if self.is_at_end() {
                return;
            }

            match self.peek() {
                ' ' | '\r' | '\t' => {
                    self.advance();
                }
                '\n' if self.nesting > 0 => {
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                }
                '#' => self.skip_line_comment(),
                '/' if self.peek_next() == Some('/') => self.skip_line_comment(),
                // Line continuation
                '\\' if self.peek_next() == Some('\n') => {
                    self.advance();
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                }
                _ => return,
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while !self.is_at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    // === Character navigation ===

    /// Advance to next character and return it
    pub(super) fn advance(&mut self) -> char {
        let c = self.chars[self.current];
        self.current += 1;
        self.column += 1;
        c
    }

    /// Peek at current character without advancing
    pub(super) fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.chars[self.current]
        }
    }

    /// Peek at next character (current + 1)
    pub(super) fn peek_next(&self) -> Option<char> {
        self.chars.get(self.current + 1).copied()
    }

    /// Check if current character matches expected, and advance if so
    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.chars[self.current] != expected {
            false
        } else {
            self.advance();
            true
        }
    }

    /// Check if we've reached the end of source
    pub(super) fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    // === Token creation ===

    pub(super) fn current_span(&self) -> Span {
        Span::new(
            self.start_pos,
            self.current,
            self.start_line,
            self.start_column,
        )
    }

    /// Create a token with the given kind and lexeme
    pub(super) fn make_token(&self, kind: TokenKind, lexeme: &str) -> Token {
        Token::new(kind, lexeme, self.current_span())
    }

    /// Create an error token and record a diagnostic with a specific code
    pub(super) fn error_token_with_code(&mut self, code: &str, message: &str) -> Token {
        let mut span = self.current_span();
        span.end = span.end.max(span.start + 1);

        let snippet = self.get_line_snippet(self.start_line);
        self.diagnostics.push(
            Diagnostic::error_with_code(code, message, span)
                .with_snippet(snippet)
                .with_label("lexer error"),
        );

        Token::new(TokenKind::Error, message, span)
    }

    /// Create an error token for invalid/unexpected characters (WD1001)
    pub(super) fn error_token(&mut self, message: &str) -> Token {
        self.error_token_with_code("WD1001", message)
    }

    /// Create an error token for unterminated strings (WD1002)
    pub(super) fn error_unterminated_string(&mut self) -> Token {
        self.error_token_with_code("WD1002", "Unterminated string literal")
    }

    /// Get the source line for a given line number
    fn get_line_snippet(&self, line: u32) -> String {
        self.source
            .lines()
            .nth(line.saturating_sub(1) as usize)
            .unwrap_or("")
            .to_string()
    }
}
