//! Expression parsing (Pratt parsing)

use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::lexer::Lexer;
use crate::parser::{Parser, Precedence};
use crate::span::Span;
use crate::token::{Token, TokenKind};

impl Parser {
    /// Parse an expression
    pub(super) fn parse_expression(&mut self) -> Result<Expr, ()> {
        self.parse_precedence(Precedence::Lowest)
    }

    /// Parse expression with given precedence
    pub(super) fn parse_precedence(&mut self, precedence: Precedence) -> Result<Expr, ()> {
        let outer = self.depth;
        let result = self.parse_operands(precedence);
        self.depth = outer;
        result
    }

    fn parse_operands(&mut self, precedence: Precedence) -> Result<Expr, ()> {
        self.descend()?;
        let mut left = self.parse_prefix()?;

        while precedence < self.current_precedence() {
            // Each operator wraps the tree built so far
            self.descend()?;
            left = self.parse_infix(left)?;
        }

        Ok(left)
    }

    /// Parse prefix expression
    fn parse_prefix(&mut self) -> Result<Expr, ()> {
        match self.peek().kind {
            TokenKind::Number => self.parse_number(),
            TokenKind::String => {
                let token = self.advance();
                Ok(Expr::Literal(
                    Literal::String(token.lexeme.clone()),
                    token.span,
                ))
            }
            TokenKind::FString => self.parse_fstring(),
            TokenKind::True | TokenKind::False => {
                let token = self.advance();
                Ok(Expr::Literal(
                    Literal::Bool(token.kind == TokenKind::True),
                    token.span,
                ))
            }
            TokenKind::Null => Ok(Expr::Literal(Literal::Null, self.advance().span)),
            TokenKind::Identifier => {
                let token = self.advance();
                Ok(Expr::Name(Identifier {
                    name: token.lexeme.clone(),
                    span: token.span,
                }))
            }
            TokenKind::LeftParen => self.parse_group(),
            TokenKind::LeftBracket => self.parse_list(),
            TokenKind::LeftBrace => self.parse_dict(),
            TokenKind::Minus | TokenKind::Not => self.parse_unary(),
            _ => {
                self.error("Expected expression");
                Err(())
            }
        }
    }

    /// Parse infix expression
    fn parse_infix(&mut self, left: Expr) -> Result<Expr, ()> {
        match self.peek().kind {
            TokenKind::LeftParen => self.parse_call(left),
            TokenKind::LeftBracket => self.parse_subscript(left),
            TokenKind::Dot => self.parse_attribute(left),
            _ => self.parse_binary(left),
        }
    }

    /// Get current token precedence
    pub(super) fn current_precedence(&self) -> Precedence {
        Self::token_precedence(self.peek())
    }

    /// Get precedence for a token
    pub(super) fn token_precedence(token: &Token) -> Precedence {
        match token.kind {
            TokenKind::Or => Precedence::Or,
            TokenKind::And => Precedence::And,
            TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equality,
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::In => Precedence::Comparison,
            TokenKind::Plus | TokenKind::Minus => Precedence::Term,
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Factor,
            TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::Dot => Precedence::Call,
            _ => Precedence::Lowest,
        }
    }

    fn parse_number(&mut self) -> Result<Expr, ()> {
        let token = self.advance();
        let span = token.span;
        let value: f64 = token.lexeme.replace('_', "").parse().unwrap_or(0.0);
        Ok(Expr::Literal(Literal::Number(value), span))
    }

    /// `(expr)` or a tuple `(a, b)`, which is represented as a list
    fn parse_group(&mut self) -> Result<Expr, ()> {
        let start = self.advance().span;
        if self.check(TokenKind::RightParen) {
            let end = self.advance().span;
            return Ok(Expr::List(Vec::new(), start.merge(end)));
        }

        let first = self.parse_expression()?;
        if self.check(TokenKind::Comma) {
            let mut items = vec![first];
            while self.match_token(TokenKind::Comma) {
                if self.check(TokenKind::RightParen) {
                    break;
                }
                items.push(self.parse_expression()?);
            }
            let end = self
                .consume(TokenKind::RightParen, "Expected ')' after tuple")?
                .span;
            return Ok(Expr::List(items, start.merge(end)));
        }

        let end = self
            .consume(TokenKind::RightParen, "Expected ')' after expression")?
            .span;
        Ok(Expr::Group(Box::new(first), start.merge(end)))
    }

    fn parse_list(&mut self) -> Result<Expr, ()> {
        let start = self.advance().span;
        let mut items = Vec::new();
        while !self.check(TokenKind::RightBracket) && !self.is_at_end() {
            items.push(self.parse_expression()?);
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        let end = self
            .consume(TokenKind::RightBracket, "Expected ']' after list elements")?
            .span;
        Ok(Expr::List(items, start.merge(end)))
    }

    /// `{key: value, ...}`; line breaks inside are insignificant
    fn parse_dict(&mut self) -> Result<Expr, ()> {
        let start = self.advance().span;
        let mut entries = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(TokenKind::RightBrace) || self.is_at_end() {
                break;
            }
            let key = self.parse_expression()?;
            self.skip_newlines();
            self.consume(TokenKind::Colon, "Expected ':' after dictionary key")?;
            self.skip_newlines();
            let value = self.parse_expression()?;
            entries.push((key, value));
            self.skip_newlines();
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.skip_newlines();
        let end = self
            .consume(TokenKind::RightBrace, "Expected '}' after dictionary entries")?
            .span;
        Ok(Expr::Dict(entries, start.merge(end)))
    }

    fn parse_unary(&mut self) -> Result<Expr, ()> {
        let op_token = self.advance();
        let start = op_token.span;
        // `not` binds looser than comparisons, `-`/`!` tighter than everything but calls
        let (op, precedence) = match (op_token.kind, op_token.lexeme.as_str()) {
            (TokenKind::Minus, _) => (UnaryOp::Negate, Precedence::Unary),
            (_, "!") => (UnaryOp::Not, Precedence::Unary),
            _ => (UnaryOp::Not, Precedence::Not),
        };
        let operand = self.parse_precedence(precedence)?;
        Ok(Expr::Unary(UnaryExpr {
            op,
            span: start.merge(operand.span()),
            operand: Box::new(operand),
        }))
    }

    fn parse_binary(&mut self, left: Expr) -> Result<Expr, ()> {
        let op_token = self.advance();
        let precedence = Self::token_precedence(op_token);
        let op = match op_token.kind {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            TokenKind::EqualEqual => BinaryOp::Eq,
            TokenKind::BangEqual => BinaryOp::Ne,
            TokenKind::Less => BinaryOp::Lt,
            TokenKind::LessEqual => BinaryOp::Le,
            TokenKind::Greater => BinaryOp::Gt,
            TokenKind::GreaterEqual => BinaryOp::Ge,
            TokenKind::And => BinaryOp::And,
            TokenKind::Or => BinaryOp::Or,
            TokenKind::In => BinaryOp::In,
            _ => {
                self.error("Expected binary operator");
                return Err(());
            }
        };

        let right = self.parse_precedence(precedence)?;
        Ok(Expr::Binary(BinaryExpr {
            span: left.span().merge(right.span()),
            left: Box::new(left),
            op,
            right: Box::new(right),
        }))
    }

    /// `callee(arg, name=value, ...)`
    fn parse_call(&mut self, callee: Expr) -> Result<Expr, ()> {
        self.advance(); // (
        let mut args = Vec::new();
        let mut keywords = Vec::new();

        while !self.check(TokenKind::RightParen) && !self.is_at_end() {
            if self.check(TokenKind::Identifier) && self.peek_at(1).kind == TokenKind::Equal {
                let name_token = self.advance();
                let name = Identifier {
                    name: name_token.lexeme.clone(),
                    span: name_token.span,
                };
                self.advance(); // =
                let value = self.parse_expression()?;
                keywords.push(KeywordArg { name, value });
            } else {
                if !keywords.is_empty() {
                    self.error("Positional argument follows keyword argument");
                    return Err(());
                }
                args.push(self.parse_expression()?);
            }
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }

        let end = self
            .consume(TokenKind::RightParen, "Expected ')' after arguments")?
            .span;
        Ok(Expr::Call(CallExpr {
            span: callee.span().merge(end),
            callee: Box::new(callee),
            args,
            keywords,
        }))
    }

    fn parse_subscript(&mut self, object: Expr) -> Result<Expr, ()> {
        self.advance(); // [
        let index = self.parse_expression()?;
        let end = self
            .consume(TokenKind::RightBracket, "Expected ']' after index")?
            .span;
        Ok(Expr::Subscript(SubscriptExpr {
            span: object.span().merge(end),
            object: Box::new(object),
            index: Box::new(index),
        }))
    }

    fn parse_attribute(&mut self, object: Expr) -> Result<Expr, ()> {
        self.advance(); // .
        let attr_token = self.consume_identifier("an attribute name after '.'")?;
        let attr = Identifier {
            name: attr_token.lexeme.clone(),
            span: attr_token.span,
        };
        Ok(Expr::Attribute(AttributeExpr {
            span: object.span().merge(attr.span),
            object: Box::new(object),
            attr,
        }))
    }

    /// Split an f-string template into text and embedded expressions
    ///
    /// Each `{expr}` is lexed and parsed on its own; nested nodes take the
    /// f-string's span. `{{` and `}}` are literal braces. Format specs
    /// (`{x:>8}`) and conversions (`{x!r}`) are dropped.
    fn parse_fstring(&mut self) -> Result<Expr, ()> {
        let token = self.advance().clone();
        let span = token.span;
        let chars: Vec<char> = token.lexeme.chars().collect();

        let mut parts = Vec::new();
        let mut text = String::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    text.push('{');
                    i += 2;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    text.push('}');
                    i += 2;
                }
                '{' => {
                    let Some(close) = find_closing_brace(&chars, i + 1) else {
                        self.diagnostics.push(
                            Diagnostic::error_with_code(
                                "WD1000",
                                "Unclosed '{' in format string",
                                span,
                            )
                            .with_label("syntax error"),
                        );
                        return Err(());
                    };
                    if !text.is_empty() {
                        parts.push(FStringPart::Text(std::mem::take(&mut text)));
                    }
                    let inner: String = strip_format_spec(&chars[i + 1..close]).iter().collect();
                    parts.push(FStringPart::Expr(self.parse_embedded(&inner, span)?));
                    i = close + 1;
                }
                c => {
                    text.push(c);
                    i += 1;
                }
            }
        }
        if !text.is_empty() {
            parts.push(FStringPart::Text(text));
        }

        Ok(Expr::FString(parts, span))
    }

    fn parse_embedded(&mut self, source: &str, span: Span) -> Result<Expr, ()> {
        let (mut tokens, lex_diagnostics) = Lexer::new(source).tokenize();
        for token in &mut tokens {
            token.span = span;
        }
        let mut nested = Parser::new(tokens);
        nested.depth = self.depth;
        let parsed = nested.parse_expression();
        let trailing = !nested.is_at_end();

        self.diagnostics.extend(
            lex_diagnostics
                .into_iter()
                .chain(nested.diagnostics)
                .map(|mut d| {
                    d.line = span.line as usize;
                    d.column = span.column as usize;
                    d
                }),
        );

        match parsed {
            Ok(expr) if !trailing => Ok(expr),
            Ok(_) => {
                self.diagnostics.push(
                    Diagnostic::error_with_code(
                        "WD1000",
                        "Unexpected tokens in format string expression",
                        span,
                    )
                    .with_label("syntax error"),
                );
                Err(())
            }
            Err(()) => Err(()),
        }
    }
}

/// Index of the `}` matching an opening brace whose contents start at `from`
fn find_closing_brace(chars: &[char], from: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (offset, &c) in chars[from..].iter().enumerate() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '{' | '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, '}') if depth == 0 => return Some(from + offset),
            (None, '}') => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Drop a trailing `:spec` or `!conv` at bracket depth zero
fn strip_format_spec(chars: &[char]) -> &[char] {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, &c) in chars.iter().enumerate() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth = depth.saturating_sub(1),
            (None, ':') if depth == 0 => return &chars[..i],
            (None, '!') if depth == 0 && chars.get(i + 1) != Some(&'=') => return &chars[..i],
            _ => {}
        }
    }
    chars
}
