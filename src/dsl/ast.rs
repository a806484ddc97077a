//! AST node types for event scripts.

use std::sync::{Arc, OnceLock};

use super::builtins::OperationDescriptor;
use super::types::Type;

/// Source span for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// One source unit: `schema [name] (params) [-> type] { body }`.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Name written after `schema`, if any. Corpus compilation names the
    /// schema after its resource instead.
    pub declared_name: Option<String>,
    pub params: Vec<Param>,
    pub return_type: Type,
    /// Always an [`ExprKind::Block`].
    pub body: Expr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Number(f64),
    Str(String),
    /// Rich-text literal, still in markup form.
    Text(String),
    Bool(bool),
    Read(String),
    Write {
        name: String,
        value: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    If {
        condition: Box<Expr>,
        then_block: Box<Expr>,
        else_block: Option<Box<Expr>>,
    },
    Repeat {
        count: Box<Expr>,
        body: Box<Expr>,
    },
    ForEach {
        variable: String,
        sequence: Box<Expr>,
        body: Box<Expr>,
    },
    Block(Vec<Expr>),
    /// Call bound to a registry operation.
    Operation {
        op: Arc<OperationDescriptor>,
        args: Vec<Expr>,
    },
    /// Call bound to another schema in the same module.
    UserCall {
        target: String,
        params: Vec<Type>,
        returns: Type,
        args: Vec<Expr>,
    },
    /// Call whose target is decided at compile time, once.
    Call(LateCall),
}

/// A call as written in source. Its binding is computed on first use and
/// cached; every later resolution returns the same node.
#[derive(Debug, Clone)]
pub struct LateCall {
    pub name: String,
    pub args: Vec<Expr>,
    resolved: OnceLock<Box<Expr>>,
}

impl LateCall {
    pub fn new(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self {
            name: name.into(),
            args,
            resolved: OnceLock::new(),
        }
    }

    pub fn cached(&self) -> Option<&Expr> {
        self.resolved.get().map(Box::as_ref)
    }

    /// Return the cached binding, or run `resolve` and cache its result.
    /// Failures are not cached.
    pub fn resolve_with<E>(
        &self,
        resolve: impl FnOnce(&Self) -> Result<Expr, E>,
    ) -> Result<&Expr, E> {
        if let Some(expr) = self.cached() {
            return Ok(expr);
        }
        let expr = resolve(self)?;
        Ok(self.resolved.get_or_init(|| Box::new(expr)))
    }
}
