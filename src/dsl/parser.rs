//! Recursive-descent parser. Stops at the first error.
//!
//! Precedence, loosest first:
//!
//! ```text
//! value      := storage
//! storage    := arrow ( '=' value )*        only when the left side is a bare name
//! arrow      := term ( '->' ident tuple )*
//! term       := factor ( ('+' | '*') factor )*
//! factor     := invocation ( ('-' | '/') invocation )*
//! invocation := primary tuple?              only when primary is a bare name
//! ```
//!
//! `+` and `*` share one level, as do `-` and `/`; each level is
//! left-associative in source order, and the `-`/`/` level binds tighter.

use super::ast::*;
use super::error::CompileError;
use super::lexer::{SpannedToken, Token};
use super::types::Type;

pub fn parse(tokens: Vec<SpannedToken>) -> Result<Schema, CompileError> {
    let mut parser = Parser::new(tokens);
    parser.parse_schema()
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse_schema(&mut self) -> Result<Schema, CompileError> {
        let start = self.expect(&Token::Schema)?;
        let declared_name = match self.peek() {
            Token::Ident(_) => Some(self.expect_ident()?.0),
            _ => None,
        };

        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        while !matches!(self.peek(), Token::RParen) {
            let (name, name_span) = self.expect_ident()?;
            let (ty, ty_span) = self.parse_type()?;
            params.push(Param {
                name,
                ty,
                span: name_span.merge(ty_span),
            });
            if !matches!(self.peek(), Token::RParen) {
                self.expect(&Token::Comma)?;
            }
        }
        self.expect(&Token::RParen)?;

        let return_type = if matches!(self.peek(), Token::Arrow) {
            self.advance();
            self.parse_type()?.0
        } else {
            Type::Void
        };

        let body = self.parse_block()?;
        let span = start.merge(body.span);
        self.expect(&Token::Eof)?;

        Ok(Schema {
            declared_name,
            params,
            return_type,
            body,
            span,
        })
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |t| &t.token)
    }

    /// Span of the current token; past the end this is the span of the
    /// final (end-of-input) token.
    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(Span::new(0, 0), |t| t.span)
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn error_expected(&self, expected: &str) -> CompileError {
        CompileError::parse(
            format!("expected {expected}, found {}", self.peek().describe()),
            self.span(),
        )
    }

    fn expect(&mut self, expected: &Token) -> Result<Span, CompileError> {
        if self.peek() == expected {
            let sp = self.span();
            self.advance();
            Ok(sp)
        } else {
            Err(self.error_expected(&expected.describe()))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), CompileError> {
        if let Token::Ident(name) = self.peek().clone() {
            let sp = self.span();
            self.advance();
            Ok((name, sp))
        } else {
            Err(self.error_expected("identifier"))
        }
    }

    fn parse_type(&mut self) -> Result<(Type, Span), CompileError> {
        let (name, span) = self
            .expect_ident()
            .map_err(|_| self.error_expected("type name"))?;
        match Type::parse(&name) {
            Some(ty) => Ok((ty, span)),
            None => Err(CompileError::type_name(
                format!("unknown type `{name}`"),
                span,
            )),
        }
    }

    // ── Statements ─────────────────────────────────────────────────

    fn parse_block(&mut self) -> Result<Expr, CompileError> {
        let start = self.expect(&Token::LBrace)?;
        let mut statements = Vec::new();
        while !matches!(self.peek(), Token::RBrace) {
            statements.push(self.parse_statement()?);
        }
        let end = self.expect(&Token::RBrace)?;
        Ok(Expr::new(ExprKind::Block(statements), start.merge(end)))
    }

    fn parse_statement(&mut self) -> Result<Expr, CompileError> {
        match self.peek() {
            Token::Repeat => {
                let start = self.span();
                self.advance();
                let count = self.parse_value()?;
                let body = self.parse_block()?;
                let span = start.merge(body.span);
                Ok(Expr::new(
                    ExprKind::Repeat {
                        count: Box::new(count),
                        body: Box::new(body),
                    },
                    span,
                ))
            }
            Token::If => {
                let start = self.span();
                self.advance();
                let condition = self.parse_value()?;
                let then_block = self.parse_block()?;
                let mut span = start.merge(then_block.span);
                let else_block = if matches!(self.peek(), Token::Else) {
                    self.advance();
                    let block = self.parse_block()?;
                    span = span.merge(block.span);
                    Some(Box::new(block))
                } else {
                    None
                };
                Ok(Expr::new(
                    ExprKind::If {
                        condition: Box::new(condition),
                        then_block: Box::new(then_block),
                        else_block,
                    },
                    span,
                ))
            }
            Token::ForEach => {
                let start = self.span();
                self.advance();
                let (variable, _) = self.expect_ident()?;
                self.expect(&Token::In)?;
                let sequence = self.parse_value()?;
                let body = self.parse_block()?;
                let span = start.merge(body.span);
                Ok(Expr::new(
                    ExprKind::ForEach {
                        variable,
                        sequence: Box::new(sequence),
                        body: Box::new(body),
                    },
                    span,
                ))
            }
            _ => self.parse_value(),
        }
    }

    // ── Expressions ────────────────────────────────────────────────

    fn parse_value(&mut self) -> Result<Expr, CompileError> {
        self.parse_storage()
    }

    fn parse_storage(&mut self) -> Result<Expr, CompileError> {
        let mut base = self.parse_arrow()?;
        while matches!(self.peek(), Token::Eq) {
            let ExprKind::Read(name) = &base.kind else {
                break;
            };
            let name = name.clone();
            self.advance();
            let value = self.parse_value()?;
            let span = base.span.merge(value.span);
            base = Expr::new(
                ExprKind::Write {
                    name,
                    value: Box::new(value),
                },
                span,
            );
        }
        Ok(base)
    }

    /// `receiver->name(args)` is sugar for `name(receiver, args)`.
    fn parse_arrow(&mut self) -> Result<Expr, CompileError> {
        let mut base = self.parse_term()?;
        while matches!(self.peek(), Token::Arrow) {
            self.advance();
            let (name, _) = self.expect_ident()?;
            let (mut args, tuple_span) = self.parse_tuple()?;
            let span = base.span.merge(tuple_span);
            args.insert(0, base);
            base = Expr::new(ExprKind::Call(LateCall::new(name, args)), span);
        }
        Ok(base)
    }

    fn parse_term(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Star => BinOp::Mul,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_invocation()?;
        loop {
            let op = match self.peek() {
                Token::Minus => BinOp::Sub,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_invocation()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_invocation(&mut self) -> Result<Expr, CompileError> {
        let base = self.parse_primary()?;
        if !matches!(self.peek(), Token::LParen) {
            return Ok(base);
        }
        let ExprKind::Read(name) = &base.kind else {
            return Ok(base);
        };
        let name = name.clone();
        let (args, tuple_span) = self.parse_tuple()?;
        Ok(Expr::new(
            ExprKind::Call(LateCall::new(name, args)),
            base.span.merge(tuple_span),
        ))
    }

    fn parse_tuple(&mut self) -> Result<(Vec<Expr>, Span), CompileError> {
        let start = self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        while !matches!(self.peek(), Token::RParen) {
            args.push(self.parse_value()?);
            if !matches!(self.peek(), Token::RParen) {
                self.expect(&Token::Comma)?;
            }
        }
        let end = self.expect(&Token::RParen)?;
        Ok((args, start.merge(end)))
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let span = self.span();
        let kind = match self.peek().clone() {
            Token::Number(n) => ExprKind::Number(n),
            Token::Str(s) => ExprKind::Str(s),
            Token::Text(t) => ExprKind::Text(t),
            Token::Ident(name) => match name.as_str() {
                "true" => ExprKind::Bool(true),
                "false" => ExprKind::Bool(false),
                _ => ExprKind::Read(name),
            },
            _ => return Err(self.error_expected("number, string, text or identifier")),
        };
        self.advance();
        Ok(Expr::new(kind, span))
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    let span = left.span.merge(right.span);
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;
    use crate::dsl::lexer::lex;

    fn parse_str(s: &str) -> Schema {
        parse(lex(s).unwrap()).unwrap()
    }

    fn parse_err(s: &str) -> CompileError {
        parse(lex(s).unwrap()).unwrap_err()
    }

    /// The single statement of `schema() { <body> }`.
    fn stmt(body: &str) -> Expr {
        let schema = parse_str(&format!("schema() {{ {body} }}"));
        match schema.body.kind {
            ExprKind::Block(mut stmts) => {
                assert_eq!(stmts.len(), 1);
                stmts.remove(0)
            }
            other => panic!("body is not a block: {other:?}"),
        }
    }

    /// Compact s-expression rendering for shape assertions.
    fn show(e: &Expr) -> String {
        match &e.kind {
            ExprKind::Number(n) => format!("{n}"),
            ExprKind::Read(name) => name.clone(),
            ExprKind::Str(s) => format!("{s:?}"),
            ExprKind::Bool(b) => format!("{b}"),
            ExprKind::Binary { op, left, right } => {
                format!("({} {} {})", op.symbol(), show(left), show(right))
            }
            ExprKind::Write { name, value } => format!("(= {name} {})", show(value)),
            ExprKind::Call(call) => {
                let args: Vec<String> = call.args.iter().map(show).collect();
                format!("{}[{}]", call.name, args.join(" "))
            }
            other => format!("{other:?}"),
        }
    }

    #[test]
    fn header_with_name_params_and_return() {
        let schema = parse_str("schema add3(a number, b number, c number) -> number { a }");
        assert_eq!(schema.declared_name.as_deref(), Some("add3"));
        assert_eq!(schema.params.len(), 3);
        assert_eq!(schema.params[2].name, "c");
        assert_eq!(schema.return_type, Type::Number);
    }

    #[test]
    fn anonymous_schema_defaults_to_void() {
        let schema = parse_str("schema(x any) { x }");
        assert_eq!(schema.declared_name, None);
        assert_eq!(schema.return_type, Type::Void);
        assert_eq!(schema.params[0].ty, Type::Any);
    }

    #[test]
    fn plus_and_star_share_a_level() {
        // (1 + 2) * 3, not 1 + (2 * 3)
        assert_eq!(show(&stmt("1 + 2 * 3")), "(* (+ 1 2) 3)");
    }

    #[test]
    fn minus_and_slash_bind_tighter() {
        assert_eq!(show(&stmt("a * b - c")), "(* a (- b c))");
        assert_eq!(show(&stmt("8 / 2 - 1")), "(- (/ 8 2) 1)");
        assert_eq!(show(&stmt("10 - 2 / 5")), "(/ (- 10 2) 5)");
    }

    #[test]
    fn arrow_prepends_receiver() {
        assert_eq!(show(&stmt("xs->append(1 + 2)")), "append[xs (+ 1 2)]");
        assert_eq!(show(&stmt("a->f()->g(b)")), "g[f[a] b]");
    }

    #[test]
    fn arrow_receiver_is_whole_term() {
        assert_eq!(show(&stmt("a + b->len()")), "len[(+ a b)]");
    }

    #[test]
    fn assignment_is_right_associative() {
        assert_eq!(show(&stmt("x = y = 3")), "(= x (= y 3))");
    }

    #[test]
    fn assignment_needs_a_bare_name() {
        // `f() = 1` leaves `=` unconsumed, which the block then rejects.
        let err = parse_err("schema() { f() = 1 }");
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn invocation_only_on_names() {
        // A number followed by a tuple is not a call; the `(` is left over.
        let err = parse_err("schema() { 3(1) }");
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn control_flow_statements() {
        let schema = parse_str(
            "schema(xs list) { repeat 3 { x = 1 } if true { 1 } else { 2 } foreach v in xs { v } }",
        );
        let ExprKind::Block(stmts) = &schema.body.kind else {
            panic!("body is not a block");
        };
        assert!(matches!(stmts[0].kind, ExprKind::Repeat { .. }));
        assert!(matches!(stmts[1].kind, ExprKind::If { else_block: Some(_), .. }));
        assert!(matches!(&stmts[2].kind, ExprKind::ForEach { variable, .. } if variable == "v"));
    }

    #[test]
    fn unknown_type_is_type_name_error() {
        let err = parse_err("schema(x float) { x }");
        assert_eq!(err.kind, ErrorKind::TypeName);
        assert_eq!(err.span, Span::new(9, 14));
    }

    #[test]
    fn error_at_end_points_at_eof() {
        let src = "schema() { 1 +";
        let err = parse_err(src);
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.span, Span::new(src.len(), src.len()));
        assert!(err.message.contains("end of input"));
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let err = parse_err("schema() { 1 } 2");
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.span, Span::new(15, 16));
    }

    #[test]
    fn parenthesized_groups_are_not_expressions() {
        let err = parse_err("schema() { (1) }");
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.span, Span::new(11, 12));
    }
}
