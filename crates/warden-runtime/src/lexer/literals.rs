//! Literal parsing for the lexer

use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

impl Lexer {
    /// Scan a string literal delimited by `quote`
    ///
    /// With `escapes` off (raw strings) backslashes are kept verbatim.
    /// Unknown escapes are kept as written rather than rejected.
    pub(super) fn string(&mut self, quote: char, escapes: bool) -> Token {
        self.string_body(quote, escapes, TokenKind::String)
    }

    /// Scan a format string; the token lexeme is the template with `{}` intact
    pub(super) fn fstring(&mut self, quote: char) -> Token {
        self.string_body(quote, true, TokenKind::FString)
    }

    fn string_body(&mut self, quote: char, escapes: bool, kind: TokenKind) -> Token {
        let mut value = String::new();

        while !self.is_at_end() && self.peek() != quote {
            if self.peek() == '\n' {
                return self.error_unterminated_string();
            }

            if self.peek() == '\\' {
                self.advance(); // consume backslash
                if self.is_at_end() {
                    return self.error_unterminated_string();
                }
                let escape_char = self.advance();
                if !escapes {
                    value.push('\\');
                    value.push(escape_char);
                    continue;
                }
                match escape_char {
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    't' => value.push('\t'),
                    '0' => value.push('\0'),
                    '\\' | '"' | '\'' => value.push(escape_char),
                    other => {
                        value.push('\\');
                        value.push(other);
                    }
                }
            } else {
                value.push(self.advance());
            }
        }

        if self.is_at_end() {
            return self.error_unterminated_string();
        }

        self.advance(); // closing quote
        self.make_token(kind, &value)
    }

    /// Scan a number literal (integer, float, or scientific notation)
    pub(super) fn number(&mut self) -> Token {
        let start = self.current - 1;

        while self.peek().is_ascii_digit() || self.peek() == '_' {
            self.advance();
        }

        if self.peek() == '.' && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance(); // consume .
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        if self.peek() == 'e' || self.peek() == 'E' {
            self.advance();
            if self.peek() == '+' || self.peek() == '-' {
                self.advance();
            }
            if !self.peek().is_ascii_digit() {
                return self.error_token("Invalid number: exponent requires digits");
            }
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let lexeme: String = self.chars[start..self.current].iter().collect();
        self.make_token(TokenKind::Number, &lexeme)
    }

    /// Scan an identifier, keyword, or prefixed string (`f"..."`, `r"..."`, `b"..."`)
    pub(super) fn identifier(&mut self) -> Token {
        let start = self.current - 1;

        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }

        let lexeme: String = self.chars[start..self.current].iter().collect();

        let next = self.peek();
        if next == '"' || next == '\'' {
            match lexeme.as_str() {
                "f" | "F" => {
                    self.advance();
                    return self.fstring(next);
                }
                "r" | "R" => {
                    self.advance();
                    return self.string(next, false);
                }
                "b" | "B" => {
                    self.advance();
                    return self.string(next, true);
                }
                _ => {}
            }
        }

        let kind = TokenKind::keyword(&lexeme).unwrap_or(TokenKind::Identifier);
        self.make_token(kind, &lexeme)
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::Lexer;
    use crate::token::TokenKind;

    fn single(source: &str) -> (TokenKind, String) {
        let mut lexer = Lexer::new(source);
        let (tokens, _) = lexer.tokenize();
        (tokens[0].kind, tokens[0].lexeme.clone())
    }

    #[test]
    fn test_both_quote_styles() {
        assert_eq!(single("\"a'b\""), (TokenKind::String, "a'b".to_string()));
        assert_eq!(single("'a\"b'"), (TokenKind::String, "a\"b".to_string()));
    }

    #[test]
    fn test_escapes() {
        assert_eq!(single(r#""a\nb""#).1, "a\nb");
        assert_eq!(single(r#"r"\d+""#), (TokenKind::String, r"\d+".to_string()));
        assert_eq!(single(r#""\d""#).1, r"\d");
    }

    #[test]
    fn test_fstring_keeps_template() {
        assert_eq!(
            single("f\"rm -rf {path}\""),
            (TokenKind::FString, "rm -rf {path}".to_string())
        );
    }

    #[test]
    fn test_prefix_letter_alone_is_identifier() {
        assert_eq!(single("f"), (TokenKind::Identifier, "f".to_string()));
    }

    #[test]
    fn test_unterminated_string() {
        let mut lexer = Lexer::new("x = \"abc");
        let (_, diagnostics) = lexer.tokenize();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, "WD1002");
    }

    #[test]
    fn test_numbers() {
        assert_eq!(single("3.14"), (TokenKind::Number, "3.14".to_string()));
        assert_eq!(single("1e9"), (TokenKind::Number, "1e9".to_string()));
        assert_eq!(single("1_000"), (TokenKind::Number, "1_000".to_string()));
    }
}
