//! Statement parsing

use crate::ast::*;
use crate::parser::Parser;
use crate::span::Span;
use crate::token::TokenKind;

impl Parser {
    /// Parse a statement
    pub(super) fn parse_statement(&mut self) -> Result<Stmt, ()> {
        let stmt = match self.peek().kind {
            TokenKind::Import | TokenKind::From => Stmt::Import(self.parse_import()?),
            TokenKind::Fn => return Ok(Stmt::Function(self.parse_function()?)),
            TokenKind::If => return Ok(Stmt::If(self.parse_if()?)),
            TokenKind::While => return Ok(Stmt::While(self.parse_while()?)),
            TokenKind::For => return Ok(Stmt::For(self.parse_for()?)),
            TokenKind::Return => Stmt::Return(self.parse_return()?),
            TokenKind::Let => {
                let let_span = self.advance().span;
                self.parse_assignment_or_expr(Some(let_span))?
            }
            TokenKind::Identifier if self.at_capability_decl() => {
                return Ok(Stmt::Capability(self.parse_capability()?));
            }
            _ => self.parse_assignment_or_expr(None)?,
        };

        self.end_statement()?;
        Ok(stmt)
    }

    /// Require a statement terminator without consuming a closing brace
    fn end_statement(&mut self) -> Result<(), ()> {
        match self.peek().kind {
            TokenKind::Newline | TokenKind::Semicolon => {
                self.advance();
                Ok(())
            }
            TokenKind::RightBrace | TokenKind::Eof => Ok(()),
            _ => {
                self.error("Expected newline or ';' after statement");
                Err(())
            }
        }
    }

    /// Parse a brace-delimited block
    pub(super) fn parse_block(&mut self) -> Result<Block, ()> {
        let outer = self.depth;
        let result = self.parse_block_body();
        self.depth = outer;
        result
    }

    fn parse_block_body(&mut self) -> Result<Block, ()> {
        self.descend()?;
        let start = self
            .consume(TokenKind::LeftBrace, "Expected '{' to start block")?
            .span;

        let mut stmts = Vec::new();
        loop {
            self.skip_terminators();
            if self.check(TokenKind::RightBrace) || self.is_at_end() {
                break;
            }
            match self.parse_statement() {
                Ok(stmt) => stmts.push(stmt),
                Err(_) => self.synchronize(),
            }
        }

        let end = self
            .consume(TokenKind::RightBrace, "Expected '}' after block")?
            .span;
        Ok(Block {
            stmts,
            span: start.merge(end),
        })
    }

    /// `import a.b [as c], ...` or `from a.b import c [as d], ...`
    fn parse_import(&mut self) -> Result<ImportStmt, ()> {
        let start = self.peek().span;

        let from = if self.match_token(TokenKind::From) {
            let module = self.parse_dotted_path("a module name")?;
            self.consume(TokenKind::Import, "Expected 'import' after module name")?;
            Some(module)
        } else {
            self.consume(TokenKind::Import, "Expected 'import'")?;
            None
        };

        let mut names = Vec::new();
        loop {
            let name_start = self.peek().span;
            let path = if from.is_some() && self.check(TokenKind::Star) {
                self.advance();
                "*".to_string()
            } else {
                self.parse_dotted_path("an imported name")?
            };
            let alias = if self.match_token(TokenKind::As) {
                Some(self.consume_identifier("an alias")?.lexeme.clone())
            } else {
                None
            };
            names.push(ImportName {
                path,
                alias,
                span: name_start.merge(self.previous().span),
            });

            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }

        Ok(ImportStmt {
            from,
            names,
            span: start.merge(self.previous().span),
        })
    }

    fn parse_dotted_path(&mut self, context: &str) -> Result<String, ()> {
        let mut path = self.consume_identifier(context)?.lexeme.clone();
        while self.match_token(TokenKind::Dot) {
            path.push('.');
            path.push_str(&self.consume_identifier(context)?.lexeme);
        }
        Ok(path)
    }

    /// `fn name(a, b) { ... }`
    fn parse_function(&mut self) -> Result<FunctionDecl, ()> {
        let start = self.consume(TokenKind::Fn, "Expected 'fn'")?.span;
        let name_token = self.consume_identifier("a function name")?;
        let name = Identifier {
            name: name_token.lexeme.clone(),
            span: name_token.span,
        };

        self.consume(TokenKind::LeftParen, "Expected '(' after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                let param = self.consume_identifier("a parameter name")?;
                params.push(Identifier {
                    name: param.lexeme.clone(),
                    span: param.span,
                });
                if !self.match_token(TokenKind::Comma) || self.check(TokenKind::RightParen) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after parameters")?;

        let body = self.parse_block()?;
        Ok(FunctionDecl {
            name,
            params,
            span: start.merge(body.span),
            body,
        })
    }

    /// `if cond { ... } [else if ... | else { ... }]`
    fn parse_if(&mut self) -> Result<IfStmt, ()> {
        let start = self.consume(TokenKind::If, "Expected 'if'")?.span;
        let condition = self.parse_expression()?;
        let then_branch = self.parse_block()?;

        // Allow `}\nelse {`
        if self.check(TokenKind::Newline) && self.peek_at(1).kind == TokenKind::Else {
            self.advance();
        }

        let else_branch = if self.match_token(TokenKind::Else) {
            if self.check(TokenKind::If) {
                let nested = self.parse_if()?;
                let span = nested.span;
                Some(Block {
                    stmts: vec![Stmt::If(nested)],
                    span,
                })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };

        let end = else_branch
            .as_ref()
            .map_or(then_branch.span, |block| block.span);
        Ok(IfStmt {
            condition,
            then_branch,
            else_branch,
            span: start.merge(end),
        })
    }

    fn parse_while(&mut self) -> Result<WhileStmt, ()> {
        let start = self.consume(TokenKind::While, "Expected 'while'")?.span;
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(WhileStmt {
            condition,
            span: start.merge(body.span),
            body,
        })
    }

    /// `for a[, b] in iterable { ... }`
    fn parse_for(&mut self) -> Result<ForStmt, ()> {
        let start = self.consume(TokenKind::For, "Expected 'for'")?.span;

        let mut targets = Vec::new();
        loop {
            let target = self.consume_identifier("a loop variable")?;
            targets.push(Identifier {
                name: target.lexeme.clone(),
                span: target.span,
            });
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }

        self.consume(TokenKind::In, "Expected 'in' after loop variable")?;
        let iterable = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(ForStmt {
            targets,
            iterable,
            span: start.merge(body.span),
            body,
        })
    }

    fn parse_return(&mut self) -> Result<ReturnStmt, ()> {
        let start = self.consume(TokenKind::Return, "Expected 'return'")?.span;
        if self.peek().kind.is_terminator() {
            return Ok(ReturnStmt {
                value: None,
                span: start,
            });
        }
        let value = self.parse_expression()?;
        Ok(ReturnStmt {
            span: start.merge(value.span()),
            value: Some(value),
        })
    }

    /// Expression statement, or assignment when followed by `=`, `+=` or `-=`
    fn parse_assignment_or_expr(&mut self, let_span: Option<Span>) -> Result<Stmt, ()> {
        let target = self.parse_expression()?;

        let op = match self.peek().kind {
            TokenKind::Equal => Some(AssignOp::Assign),
            TokenKind::PlusEqual => Some(AssignOp::AddAssign),
            TokenKind::MinusEqual => Some(AssignOp::SubAssign),
            _ => None,
        };

        let Some(op) = op else {
            if let_span.is_some() {
                self.error("Expected '=' after 'let' binding");
                return Err(());
            }
            let span = target.span();
            return Ok(Stmt::Expr(ExprStmt { expr: target, span }));
        };

        if !matches!(
            target,
            Expr::Name(_) | Expr::Attribute(_) | Expr::Subscript(_)
        ) {
            self.error("Invalid assignment target");
            return Err(());
        }

        self.advance(); // assignment operator
        let value = self.parse_expression()?;
        let start = let_span.unwrap_or_else(|| target.span());
        Ok(Stmt::Assign(AssignStmt {
            span: start.merge(value.span()),
            target,
            op,
            value,
            is_let: let_span.is_some(),
        }))
    }

    /// `capability` and `allow` are contextual: a declaration starts with
    /// `capability <Name> {`
    fn at_capability_decl(&self) -> bool {
        self.peek().lexeme == "capability"
            && self.peek_at(1).kind == TokenKind::Identifier
            && self.peek_at(2).kind == TokenKind::LeftBrace
    }

    fn parse_capability(&mut self) -> Result<CapabilityDecl, ()> {
        let start = self.advance().span; // `capability`
        let name_token = self.consume_identifier("a capability name")?;
        let name = Identifier {
            name: name_token.lexeme.clone(),
            span: name_token.span,
        };
        self.consume(TokenKind::LeftBrace, "Expected '{' after capability name")?;

        let mut grants = Vec::new();
        loop {
            self.skip_terminators();
            if self.check(TokenKind::RightBrace) || self.is_at_end() {
                break;
            }
            grants.push(self.parse_grant()?);
        }

        let end = self
            .consume(TokenKind::RightBrace, "Expected '}' after capability grants")?
            .span;
        Ok(CapabilityDecl {
            name,
            grants,
            span: start.merge(end),
        })
    }

    /// `allow op[, op...] "pattern"`
    fn parse_grant(&mut self) -> Result<CapabilityGrant, ()> {
        if self.peek().lexeme != "allow" {
            self.error("Expected 'allow' in capability declaration");
            return Err(());
        }
        let start = self.advance().span;

        let mut operations = Vec::new();
        loop {
            operations.push(self.consume_identifier("an operation name")?.lexeme.clone());
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }

        let pattern_token =
            self.consume(TokenKind::String, "Expected a quoted resource pattern")?;
        let pattern = pattern_token.lexeme.clone();
        let end = pattern_token.span;

        Ok(CapabilityGrant {
            operations,
            pattern,
            span: start.merge(end),
        })
    }
}
