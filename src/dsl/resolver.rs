//! Static typing and call binding.
//!
//! A call is bound the first time anything asks for its type or lowers it.
//! Lookup order: the operation registry by bare name, then by the
//! alternate name `<type of first argument>/<name>`, then user schemas by
//! the mangled form of each.

use indexmap::IndexMap;

use super::ast::{Expr, ExprKind, LateCall, Span};
use super::builtins::BuiltinRegistry;
use super::error::CompileError;
use super::types::Type;

/// Replace the separators that may appear in resource paths and alternate
/// names with `_`, producing a valid schema name.
pub fn mangle(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | ':' | '.') { '_' } else { c })
        .collect()
}

/// What callers need to know about a schema without compiling its body.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSignature {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub returns: Type,
}

#[derive(Debug, Clone)]
pub struct Local {
    pub ty: Type,
    pub slot: u16,
}

/// Locals of one schema body. Variables are function-wide: the first
/// write declares them and they stay visible to everything after it.
#[derive(Debug, Default)]
pub struct Scope {
    locals: IndexMap<String, Local>,
    next_slot: u16,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Local> {
        self.locals.get(name)
    }

    /// Declare `name`, or return the existing local. `None` when the slot
    /// space is exhausted.
    pub fn declare(&mut self, name: &str, ty: Type) -> Option<Local> {
        if let Some(local) = self.locals.get(name) {
            return Some(local.clone());
        }
        let slot = self.allocate()?;
        let local = Local { ty, slot };
        self.locals.insert(name.to_string(), local.clone());
        Some(local)
    }

    /// Anonymous slot for loop bookkeeping.
    pub fn temp(&mut self) -> Option<u16> {
        self.allocate()
    }

    pub fn slot_count(&self) -> u16 {
        self.next_slot
    }

    /// Variable name for each slot; loop temporaries have none.
    pub fn slot_names(&self) -> Vec<Option<String>> {
        let mut names = vec![None; usize::from(self.next_slot)];
        for (name, local) in &self.locals {
            if let Some(entry) = names.get_mut(usize::from(local.slot)) {
                *entry = Some(name.clone());
            }
        }
        names
    }

    fn allocate(&mut self) -> Option<u16> {
        let slot = self.next_slot;
        self.next_slot = self.next_slot.checked_add(1)?;
        Some(slot)
    }
}

/// Everything binding needs: the operation registry and the signatures
/// of every schema compiled together in this module.
#[derive(Clone, Copy)]
pub struct CompileContext<'a> {
    pub builtins: &'a BuiltinRegistry,
    pub schemas: &'a IndexMap<String, SchemaSignature>,
}

impl<'a> CompileContext<'a> {
    pub fn new(
        builtins: &'a BuiltinRegistry,
        schemas: &'a IndexMap<String, SchemaSignature>,
    ) -> Self {
        Self { builtins, schemas }
    }

    /// Static type of `expr` in `scope`. Calls are bound (and cached) as a
    /// side effect.
    pub fn type_of(&self, expr: &Expr, scope: &Scope) -> Result<Type, CompileError> {
        Ok(match &expr.kind {
            ExprKind::Number(_) | ExprKind::Binary { .. } => Type::Number,
            ExprKind::Str(_) => Type::String,
            ExprKind::Text(_) => Type::Text,
            ExprKind::Bool(_) => Type::Bool,
            ExprKind::Read(name) => scope
                .get(name)
                .map(|local| local.ty.clone())
                .ok_or_else(|| undefined(name, expr.span))?,
            ExprKind::Write { .. }
            | ExprKind::If { .. }
            | ExprKind::Repeat { .. }
            | ExprKind::ForEach { .. } => Type::Void,
            ExprKind::Block(statements) => match statements.last() {
                Some(last) => self.type_of(last, scope)?,
                None => Type::Void,
            },
            ExprKind::Operation { op, .. } => op.returns.clone(),
            ExprKind::UserCall { returns, .. } => returns.clone(),
            ExprKind::Call(call) => {
                let bound = self.resolve(call, expr.span, scope)?;
                self.type_of(bound, scope)?
            }
        })
    }

    /// Bind `call`, or return its cached binding.
    pub fn resolve<'e>(
        &self,
        call: &'e LateCall,
        span: Span,
        scope: &Scope,
    ) -> Result<&'e Expr, CompileError> {
        call.resolve_with(|call| self.bind(call, span, scope))
    }

    /// `<type of first argument>/<name>`, or the bare name for a call
    /// with no arguments.
    pub fn alternate_name(&self, call: &LateCall, scope: &Scope) -> Result<String, CompileError> {
        match call.args.first() {
            Some(first) => Ok(format!("{}/{}", self.type_of(first, scope)?, call.name)),
            None => Ok(call.name.clone()),
        }
    }

    fn bind(&self, call: &LateCall, span: Span, scope: &Scope) -> Result<Expr, CompileError> {
        let mut alternate = None;

        let op = match self.builtins.lookup(&call.name) {
            Some(op) => Some(op),
            None => {
                let alt = self.alternate_name(call, scope)?;
                let found = self.builtins.lookup(&alt);
                alternate = Some(alt);
                found
            }
        };
        if let Some(op) = op {
            self.check_args(
                &op.name,
                op.fields.iter().map(|f| (f.name.as_str(), &f.ty)),
                &call.args,
                span,
                scope,
            )?;
            tracing::trace!(call = %call.name, operation = %op.name, "bound call to operation");
            return Ok(Expr::new(
                ExprKind::Operation {
                    op: std::sync::Arc::clone(op),
                    args: call.args.clone(),
                },
                span,
            ));
        }

        let mangled = mangle(&call.name);
        let alternate = match alternate {
            Some(alt) => alt,
            None => self.alternate_name(call, scope)?,
        };
        let mangled_alt = mangle(&alternate);
        let schema = self
            .schemas
            .get(&mangled)
            .or_else(|| self.schemas.get(&mangled_alt));

        match schema {
            Some(sig) => {
                self.check_args(
                    &sig.name,
                    sig.params.iter().map(|(name, ty)| (name.as_str(), ty)),
                    &call.args,
                    span,
                    scope,
                )?;
                tracing::trace!(call = %call.name, schema = %sig.name, "bound call to schema");
                Ok(Expr::new(
                    ExprKind::UserCall {
                        target: sig.name.clone(),
                        params: sig.params.iter().map(|(_, ty)| ty.clone()).collect(),
                        returns: sig.returns.clone(),
                        args: call.args.clone(),
                    },
                    span,
                ))
            }
            None => Err(CompileError::unresolved(
                format!(
                    "cannot resolve call to `{}` (tried operations `{}`, `{alternate}` and schemas `{mangled}`, `{mangled_alt}`)",
                    call.name, call.name
                ),
                span,
            )),
        }
    }

    fn check_args<'f>(
        &self,
        target: &str,
        fields: impl ExactSizeIterator<Item = (&'f str, &'f Type)>,
        args: &[Expr],
        span: Span,
        scope: &Scope,
    ) -> Result<(), CompileError> {
        let expected = fields.len();
        if args.len() < expected {
            return Err(CompileError::arity(
                format!(
                    "too few arguments for `{target}`: expected {expected}, found {}",
                    args.len()
                ),
                span,
            ));
        }
        if args.len() > expected {
            return Err(CompileError::arity(
                format!(
                    "too many arguments for `{target}`: expected {expected}, found {}",
                    args.len()
                ),
                span,
            ));
        }
        for ((field, ty), arg) in fields.zip(args) {
            let actual = self.type_of(arg, scope)?;
            // Even an `any` field needs a value to bind.
            if actual.is_void() {
                return Err(CompileError::mismatch(
                    format!("argument for field `{field}` of `{target}` yields no value"),
                    arg.span,
                ));
            }
            if !ty.accepts(&actual) {
                return Err(CompileError::mismatch(
                    format!("field `{field}` of `{target}` expects {ty}, found {actual}"),
                    arg.span,
                ));
            }
        }
        Ok(())
    }
}

fn undefined(name: &str, span: Span) -> CompileError {
    CompileError::undefined(format!("undefined variable `{name}`"), span)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;

    fn num(n: f64) -> Expr {
        Expr::new(ExprKind::Number(n), Span::new(0, 1))
    }

    fn read(name: &str) -> Expr {
        Expr::new(ExprKind::Read(name.into()), Span::new(0, 1))
    }

    fn no_schemas() -> IndexMap<String, SchemaSignature> {
        IndexMap::new()
    }

    #[test]
    fn mangle_replaces_separators() {
        assert_eq!(mangle("demo:fx/burst.v2"), "demo_fx_burst_v2");
        assert_eq!(mangle("plain"), "plain");
    }

    #[test]
    fn resolution_is_memoized() {
        let builtins = BuiltinRegistry::standard();
        let schemas = no_schemas();
        let ctx = CompileContext::new(&builtins, &schemas);
        let call = LateCall::new("vec3", vec![num(1.0), num(2.0), num(3.0)]);
        let scope = Scope::new();

        let first = ctx.resolve(&call, Span::new(0, 4), &scope).unwrap();
        let second = ctx.resolve(&call, Span::new(0, 4), &scope).unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(matches!(first.kind, ExprKind::Operation { .. }));
    }

    #[test]
    fn alternate_name_uses_first_argument_type() {
        let builtins = BuiltinRegistry::standard();
        let schemas = no_schemas();
        let ctx = CompileContext::new(&builtins, &schemas);
        let mut scope = Scope::new();
        scope.declare("xs", Type::List).unwrap();

        let call = LateCall::new("append", vec![read("xs"), num(5.0)]);
        assert_eq!(ctx.alternate_name(&call, &scope).unwrap(), "list/append");
        let bound = ctx.resolve(&call, Span::default(), &scope).unwrap();
        match &bound.kind {
            ExprKind::Operation { op, .. } => assert_eq!(op.name, "list/append"),
            other => panic!("expected operation, got {other:?}"),
        }
    }

    #[test]
    fn arity_is_checked_both_ways() {
        let builtins = BuiltinRegistry::standard();
        let schemas = no_schemas();
        let ctx = CompileContext::new(&builtins, &schemas);
        let scope = Scope::new();

        let short = LateCall::new("vec3", vec![num(1.0)]);
        let err = ctx.resolve(&short, Span::default(), &scope).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Arity);
        assert!(err.message.contains("too few"));

        let long = LateCall::new("vec3", vec![num(1.0), num(1.0), num(1.0), num(1.0)]);
        let err = ctx.resolve(&long, Span::default(), &scope).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Arity);
        assert!(err.message.contains("too many"));
        assert!(long.cached().is_none());
    }

    #[test]
    fn field_types_are_checked() {
        let builtins = BuiltinRegistry::standard();
        let schemas = no_schemas();
        let ctx = CompileContext::new(&builtins, &schemas);
        let scope = Scope::new();
        let s = Expr::new(ExprKind::Str("no".into()), Span::new(5, 9));

        let call = LateCall::new("vec3", vec![num(1.0), s, num(1.0)]);
        let err = ctx.resolve(&call, Span::default(), &scope).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
        assert_eq!(err.span, Span::new(5, 9));
    }

    #[test]
    fn receiver_type_picks_the_operation() {
        let builtins = BuiltinRegistry::standard();
        let schemas = no_schemas();
        let ctx = CompileContext::new(&builtins, &schemas);
        let mut scope = Scope::new();
        scope.declare("v", Type::Vec3).unwrap();
        scope.declare("w", Type::Vec3).unwrap();
        scope.declare("t", Type::Text).unwrap();

        let on_vec = LateCall::new("add", vec![read("v"), read("w")]);
        let x = Expr::new(ExprKind::Str("x".into()), Span::default());
        let on_text = LateCall::new("add", vec![read("t"), x]);
        ctx.resolve(&on_vec, Span::default(), &scope).unwrap();
        ctx.resolve(&on_text, Span::default(), &scope).unwrap();

        let bound_name = |call: &LateCall| match &call.cached().unwrap().kind {
            ExprKind::Operation { op, .. } => op.name.clone(),
            other => panic!("expected operation, got {other:?}"),
        };
        assert_eq!(bound_name(&on_vec), "vec3/add");
        assert_eq!(bound_name(&on_text), "text/add");
        assert_eq!(ctx.type_of(on_vec.cached().unwrap(), &scope).unwrap(), Type::Vec3);
        assert_eq!(ctx.type_of(on_text.cached().unwrap(), &scope).unwrap(), Type::Text);
    }

    #[test]
    fn void_argument_is_refused_even_for_any_field() {
        let builtins = BuiltinRegistry::standard();
        let schemas = no_schemas();
        let ctx = CompileContext::new(&builtins, &schemas);
        let mut scope = Scope::new();
        scope.declare("xs", Type::List).unwrap();

        let inner = LateCall::new("append", vec![read("xs"), num(1.0)]);
        let inner = Expr::new(ExprKind::Call(inner), Span::new(4, 8));
        let outer = LateCall::new("append", vec![read("xs"), inner]);
        let err = ctx.resolve(&outer, Span::default(), &scope).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
        assert!(err.message.contains("yields no value"), "{}", err.message);
        assert_eq!(err.span, Span::new(4, 8));
    }

    #[test]
    fn any_arguments_are_accepted_statically() {
        let builtins = BuiltinRegistry::standard();
        let schemas = no_schemas();
        let ctx = CompileContext::new(&builtins, &schemas);
        let mut scope = Scope::new();
        scope.declare("thing", Type::Any).unwrap();

        let call = LateCall::new("vec3", vec![read("thing"), num(0.0), num(0.0)]);
        assert!(ctx.resolve(&call, Span::default(), &scope).is_ok());
    }

    #[test]
    fn user_schema_found_by_mangled_alternate_name() {
        let builtins = BuiltinRegistry::standard();
        let mut schemas = IndexMap::new();
        schemas.insert(
            "string_shout".to_string(),
            SchemaSignature {
                name: "string_shout".into(),
                params: vec![("s".into(), Type::String)],
                returns: Type::String,
            },
        );
        let ctx = CompileContext::new(&builtins, &schemas);
        let scope = Scope::new();
        let arg = Expr::new(ExprKind::Str("hey".into()), Span::default());

        let call = LateCall::new("shout", vec![arg]);
        let bound = ctx.resolve(&call, Span::default(), &scope).unwrap();
        assert!(matches!(&bound.kind, ExprKind::UserCall { target, .. } if target == "string_shout"));
        assert_eq!(ctx.type_of(bound, &scope).unwrap(), Type::String);
    }

    #[test]
    fn unresolvable_call_names_both_forms() {
        let builtins = BuiltinRegistry::standard();
        let schemas = no_schemas();
        let ctx = CompileContext::new(&builtins, &schemas);
        let scope = Scope::new();

        let call = LateCall::new("launch", vec![num(1.0)]);
        let err = ctx.resolve(&call, Span::new(3, 9), &scope).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedCall);
        assert!(err.message.contains("`launch`"));
        assert!(err.message.contains("number_launch"));
        assert_eq!(err.span, Span::new(3, 9));
    }

    #[test]
    fn reading_undeclared_variable_fails() {
        let builtins = BuiltinRegistry::standard();
        let schemas = no_schemas();
        let ctx = CompileContext::new(&builtins, &schemas);
        let err = ctx.type_of(&read("ghost"), &Scope::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedVariable);
    }
}
