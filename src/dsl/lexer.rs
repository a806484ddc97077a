use std::fmt;

use super::ast::Span;
use super::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    Str(String),
    /// Backtick-delimited rich text, markup kept verbatim.
    Text(String),

    // Identifiers & keywords. `true`/`false` stay identifiers; the parser
    // gives them meaning.
    Ident(String),
    Schema,
    Repeat,
    If,
    Else,
    ForEach,
    In,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Eq,
    Arrow, // ->

    // Operators
    Plus,
    Minus,
    Star,
    Slash,

    Eof,
}

impl Token {
    /// Short description used in "expected X, found Y" messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number `{n}`"),
            Token::Str(_) => "string literal".to_string(),
            Token::Text(_) => "text literal".to_string(),
            Token::Ident(name) => format!("identifier `{name}`"),
            Token::Eof => "end of input".to_string(),
            other => format!("`{other}`"),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::Number(n) => return write!(f, "{n}"),
            Token::Str(s) => return write!(f, "{s:?}"),
            Token::Text(t) => return write!(f, "`{t}`"),
            Token::Ident(name) => return f.write_str(name),
            Token::Schema => "schema",
            Token::Repeat => "repeat",
            Token::If => "if",
            Token::Else => "else",
            Token::ForEach => "foreach",
            Token::In => "in",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Comma => ",",
            Token::Eq => "=",
            Token::Arrow => "->",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Eof => "<eof>",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenize one source unit. The result always ends with [`Token::Eof`].
pub fn tokenize(source_id: &str, source: &str) -> Result<Vec<SpannedToken>, CompileError> {
    lex(source).map_err(|e| e.in_source(source_id))
}

pub fn lex(source: &str) -> Result<Vec<SpannedToken>, CompileError> {
    let mut lexer = Lexer::new(source);
    lexer.tokenize()
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<SpannedToken>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn tokenize(&mut self) -> Result<Vec<SpannedToken>, CompileError> {
        while self.pos < self.bytes.len() {
            self.skip_whitespace_and_comments();
            if self.pos >= self.bytes.len() {
                break;
            }

            let start = self.pos;
            let ch = self.bytes[self.pos];

            match ch {
                b'(' => self.single(Token::LParen),
                b')' => self.single(Token::RParen),
                b'{' => self.single(Token::LBrace),
                b'}' => self.single(Token::RBrace),
                b',' => self.single(Token::Comma),
                b'=' => self.single(Token::Eq),
                b'+' => self.single(Token::Plus),
                b'*' => self.single(Token::Star),
                b'/' => self.single(Token::Slash),
                b'-' => {
                    self.pos += 1;
                    if self.peek() == Some(b'>') {
                        self.pos += 1;
                        self.push(Token::Arrow, start, self.pos);
                    } else {
                        self.push(Token::Minus, start, self.pos);
                    }
                }
                b'"' | b'\'' => {
                    self.pos += 1;
                    self.lex_string(start, ch)?;
                }
                b'`' => {
                    self.pos += 1;
                    self.lex_text(start)?;
                }
                b'0'..=b'9' => self.lex_number(start)?,
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_ident(start),
                _ => {
                    let bad = self.source[start..].chars().next().unwrap_or('?');
                    return Err(CompileError::lex(
                        format!("unexpected character `{bad}`"),
                        Span::new(start, start + bad.len_utf8()),
                    ));
                }
            }
        }

        self.tokens.push(SpannedToken {
            token: Token::Eof,
            span: Span::new(self.pos, self.pos),
        });
        Ok(std::mem::take(&mut self.tokens))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn push(&mut self, token: Token, start: usize, end: usize) {
        self.tokens.push(SpannedToken {
            token,
            span: Span::new(start, end),
        });
    }

    fn single(&mut self, token: Token) {
        let start = self.pos;
        self.pos += 1;
        self.push(token, start, self.pos);
    }

    fn skip_whitespace_and_comments(&mut self) {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                b'/' if self.bytes.get(self.pos + 1) == Some(&b'/') => {
                    while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_string(&mut self, start: usize, quote: u8) -> Result<(), CompileError> {
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    return Err(CompileError::lex(
                        "unterminated string literal",
                        Span::new(start, self.pos),
                    ));
                }
                Some(b) if b == quote => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    let escaped = match self.bytes.get(self.pos + 1) {
                        Some(b'n') => '\n',
                        Some(b't') => '\t',
                        Some(b'\\') => '\\',
                        Some(b'"') => '"',
                        Some(b'\'') => '\'',
                        _ => {
                            return Err(CompileError::lex(
                                "invalid escape sequence",
                                Span::new(self.pos, (self.pos + 2).min(self.bytes.len())),
                            ));
                        }
                    };
                    value.push(escaped);
                    self.pos += 2;
                }
                Some(_) => {
                    let ch = self.source[self.pos..].chars().next().unwrap_or('\u{fffd}');
                    value.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
        self.push(Token::Str(value), start, self.pos);
        Ok(())
    }

    fn lex_text(&mut self, start: usize) -> Result<(), CompileError> {
        let body_start = self.pos;
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b'`' {
            self.pos += 1;
        }
        if self.pos >= self.bytes.len() {
            return Err(CompileError::lex(
                "unterminated text literal",
                Span::new(start, self.pos),
            ));
        }
        let body = self.source[body_start..self.pos].to_string();
        self.pos += 1;
        self.push(Token::Text(body), start, self.pos);
        Ok(())
    }

    fn lex_number(&mut self, start: usize) -> Result<(), CompileError> {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if self.pos < self.bytes.len()
            && self.bytes[self.pos] == b'.'
            && self.bytes.get(self.pos + 1).is_some_and(u8::is_ascii_digit)
        {
            self.pos += 1; // skip '.'
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
        }
        let text = &self.source[start..self.pos];
        match text.parse::<f64>() {
            Ok(v) => {
                self.push(Token::Number(v), start, self.pos);
                Ok(())
            }
            Err(_) => Err(CompileError::lex(
                format!("invalid number: {text}"),
                Span::new(start, self.pos),
            )),
        }
    }

    fn lex_ident(&mut self, start: usize) {
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_alphanumeric() || self.bytes[self.pos] == b'_')
        {
            self.pos += 1;
        }
        let word = &self.source[start..self.pos];
        let token = match word {
            "schema" => Token::Schema,
            "repeat" => Token::Repeat,
            "if" => Token::If,
            "else" => Token::Else,
            "foreach" => Token::ForEach,
            "in" => Token::In,
            _ => Token::Ident(word.to_string()),
        };
        self.push(token, start, self.pos);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;

    fn tok(s: &str) -> Vec<Token> {
        lex(s).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn simple_tokens() {
        let tokens = tok("1 + 2.5");
        assert_eq!(
            tokens,
            vec![Token::Number(1.0), Token::Plus, Token::Number(2.5), Token::Eof]
        );
    }

    #[test]
    fn keywords_and_booleans() {
        let tokens = tok("schema repeat if else foreach in true");
        assert_eq!(
            tokens,
            vec![
                Token::Schema,
                Token::Repeat,
                Token::If,
                Token::Else,
                Token::ForEach,
                Token::In,
                Token::Ident("true".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn arrow_versus_minus() {
        assert_eq!(
            tok("a->b - c"),
            vec![
                Token::Ident("a".into()),
                Token::Arrow,
                Token::Ident("b".into()),
                Token::Minus,
                Token::Ident("c".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn both_quote_styles_and_escapes() {
        assert_eq!(
            tok(r#"'it\'s' "say \"hi\"""#),
            vec![
                Token::Str("it's".into()),
                Token::Str("say \"hi\"".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn text_literal_keeps_markup() {
        assert_eq!(
            tok("`<#ff0000>hot</>`"),
            vec![Token::Text("<#ff0000>hot</>".into()), Token::Eof]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(tok("x // note\ny"), vec![
            Token::Ident("x".into()),
            Token::Ident("y".into()),
            Token::Eof,
        ]);
    }

    #[test]
    fn eof_span_sits_at_end() {
        let tokens = lex("ab  ").unwrap();
        assert_eq!(tokens.last().unwrap().span, Span::new(4, 4));
    }

    #[test]
    fn unterminated_string_is_lex_error() {
        let err = lex("x = \"oops").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lex);
        assert_eq!(err.span.start, 4);
    }

    #[test]
    fn unexpected_character_is_lex_error() {
        let err = tokenize("demo:bad", "a $ b").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lex);
        assert_eq!(err.span, Span::new(2, 3));
        assert_eq!(err.source_id.as_deref(), Some("demo:bad"));
    }
}
