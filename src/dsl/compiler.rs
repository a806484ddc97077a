//! Lowers parsed schemas to bytecode. All schemas of one reload are
//! compiled together into a single [`CompiledModule`]; if any of them fails
//! the whole module is rejected.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;

use super::ast::{BinOp, Expr, ExprKind, Schema, Span};
use super::builtins::{BuiltinRegistry, HostFn, NativeOp, OperationDescriptor, OperationKind};
use super::error::{CompileError, ErrorKind};
use super::resolver::{CompileContext, SchemaSignature, Scope};
use super::types::Type;
use super::vm::Limits;
use crate::source::ResourceId;
use crate::value::{RichText, Value, ValueKind};

/// Name under which the module initializer can be looked up.
pub const STATIC_INIT: &str = "$static_init";

/// Bytecode operations for the stack-based VM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    /// Push a value from the module's constant pool.
    PushConst(u16),
    /// Load a local variable onto the stack.
    LoadLocal(u16),
    /// Store top of stack into a local variable slot.
    StoreLocal(u16),
    /// Pop top of stack.
    Pop,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,

    // Comparison (loop bookkeeping only; scripts have no comparison syntax)
    Lt,
    Ge,

    /// Fail unless the top of stack has this kind. Emitted where a value of
    /// static type `any` flows into a typed slot.
    Expect(ValueKind),
    /// Pop a string (or text) and push it as text.
    ToText,

    // Control flow
    JumpIfFalse(u16),
    Jump(u16),

    Native(NativeOp),
    /// Pop `argc` arguments, call host function `index`, push its result
    /// if `returns`.
    InvokeHost { index: u16, argc: u8, returns: bool },
    /// Pop `argc` arguments, call function `function` of this module.
    Call { function: u16, argc: u8, returns: bool },

    Return,
    ReturnVoid,
}

/// Literal pooled at module level and materialized once by the module
/// initializer.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Number(f64),
    Str(String),
    Text(RichText),
}

impl Constant {
    fn to_value(&self) -> Value {
        match self {
            Constant::Number(n) => Value::Number(*n),
            Constant::Str(s) => Value::String(s.clone()),
            Constant::Text(t) => Value::Text(t.clone()),
        }
    }

    fn same(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

/// A compiled schema.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: String,
    pub resource: Option<ResourceId>,
    pub params: Vec<(String, Type)>,
    pub returns: Type,
    pub ops: Vec<Op>,
    /// Number of local variable slots needed, parameters included.
    pub local_count: u16,
    /// Variable name per slot, for runtime diagnostics.
    pub local_names: Vec<Option<String>>,
}

impl CompiledFunction {
    pub fn local_name(&self, slot: u16) -> &str {
        self.local_names
            .get(usize::from(slot))
            .and_then(Option::as_deref)
            .unwrap_or("<temporary>")
    }
}

/// Output of one compilation: every schema's bytecode plus the shared
/// constant pool and host-function table.
pub struct CompiledModule {
    pub functions: Vec<CompiledFunction>,
    pub constants: Vec<Constant>,
    pub(crate) host_fns: Vec<HostFn>,
    pub limits: Limits,
    by_name: HashMap<String, usize>,
    by_resource: HashMap<ResourceId, usize>,
    pool: OnceLock<Vec<Value>>,
}

impl fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledModule")
            .field("functions", &self.functions)
            .field("constants", &self.constants)
            .field("host_fns", &self.host_fns.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl CompiledModule {
    /// A module with no schemas.
    pub fn empty(limits: Limits) -> Self {
        Self {
            functions: Vec::new(),
            constants: Vec::new(),
            host_fns: Vec::new(),
            limits,
            by_name: HashMap::new(),
            by_resource: HashMap::new(),
            pool: OnceLock::new(),
        }
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn resource_index(&self, id: &ResourceId) -> Option<usize> {
        self.by_resource.get(id).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|f| f.name.as_str())
    }

    /// Materialize the constant pool. Idempotent; later calls are free.
    pub fn static_init(&self) {
        self.materialized();
    }

    pub(crate) fn materialized(&self) -> &[Value] {
        self.pool.get_or_init(|| {
            tracing::trace!(constants = self.constants.len(), "materializing constant pool");
            self.constants.iter().map(Constant::to_value).collect()
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.get().is_some()
    }
}

/// A schema ready for lowering, with the name it is registered under.
#[derive(Debug)]
pub struct SchemaUnit {
    pub name: String,
    pub resource: Option<ResourceId>,
    pub schema: Schema,
}

impl SchemaUnit {
    fn label(&self) -> String {
        match &self.resource {
            Some(id) => id.to_string(),
            None => self.name.clone(),
        }
    }
}

/// Compile every unit into one module.
pub fn compile(
    units: &[SchemaUnit],
    builtins: &BuiltinRegistry,
    limits: Limits,
) -> Result<CompiledModule, CompileError> {
    let mut signatures: IndexMap<String, SchemaSignature> = IndexMap::new();
    for unit in units {
        if signatures.contains_key(&unit.name) {
            return Err(CompileError::new(
                ErrorKind::DuplicateSchema,
                format!("schema `{}` is defined more than once", unit.name),
                unit.schema.span,
            )
            .in_source(&unit.label()));
        }
        signatures.insert(
            unit.name.clone(),
            SchemaSignature {
                name: unit.name.clone(),
                params: unit
                    .schema
                    .params
                    .iter()
                    .map(|p| (p.name.clone(), p.ty.clone()))
                    .collect(),
                returns: unit.schema.return_type.clone(),
            },
        );
    }
    if u16::try_from(signatures.len()).is_err() {
        return Err(CompileError::codegen(
            "too many schemas in one module (max 65535)",
            Span::default(),
        ));
    }

    let ctx = CompileContext::new(builtins, &signatures);
    let mut pools = Pools::default();
    let mut functions = Vec::with_capacity(units.len());
    for unit in units {
        let function = FunctionCompiler::new(ctx, &mut pools)
            .compile_schema(unit)
            .map_err(|e| e.in_source(&unit.label()))?;
        functions.push(function);
    }

    let mut by_name = HashMap::new();
    let mut by_resource = HashMap::new();
    for (i, f) in functions.iter().enumerate() {
        by_name.insert(f.name.clone(), i);
        if let Some(id) = &f.resource {
            by_resource.insert(id.clone(), i);
        }
    }

    Ok(CompiledModule {
        functions,
        constants: pools.constants,
        host_fns: pools.host_fns,
        limits,
        by_name,
        by_resource,
        pool: OnceLock::new(),
    })
}

/// Module-wide tables shared by every function being compiled.
#[derive(Default)]
struct Pools {
    constants: Vec<Constant>,
    host_fns: Vec<HostFn>,
    host_index: HashMap<String, u16>,
}

impl Pools {
    fn add_constant(&mut self, value: Constant, span: Span) -> Result<u16, CompileError> {
        if let Some(idx) = self.constants.iter().position(|c| c.same(&value)) {
            return u16::try_from(idx)
                .map_err(|_| CompileError::codegen("too many constants (max 65535)", span));
        }
        let idx = u16::try_from(self.constants.len())
            .map_err(|_| CompileError::codegen("too many constants (max 65535)", span))?;
        self.constants.push(value);
        Ok(idx)
    }

    fn host(&mut self, op: &OperationDescriptor, f: &HostFn, span: Span) -> Result<u16, CompileError> {
        if let Some(idx) = self.host_index.get(&op.name) {
            return Ok(*idx);
        }
        let idx = u16::try_from(self.host_fns.len())
            .map_err(|_| CompileError::codegen("too many host operations (max 65535)", span))?;
        self.host_fns.push(Arc::clone(f));
        self.host_index.insert(op.name.clone(), idx);
        Ok(idx)
    }
}

struct FunctionCompiler<'a, 'p> {
    ctx: CompileContext<'a>,
    pools: &'p mut Pools,
    scope: Scope,
    ops: Vec<Op>,
}

impl<'a, 'p> FunctionCompiler<'a, 'p> {
    fn new(ctx: CompileContext<'a>, pools: &'p mut Pools) -> Self {
        Self {
            ctx,
            pools,
            scope: Scope::new(),
            ops: Vec::new(),
        }
    }

    fn compile_schema(mut self, unit: &SchemaUnit) -> Result<CompiledFunction, CompileError> {
        let schema = &unit.schema;
        for param in &schema.params {
            if self.scope.get(&param.name).is_some() {
                return Err(CompileError::codegen(
                    format!("duplicate parameter `{}`", param.name),
                    param.span,
                ));
            }
            self.declare(&param.name, param.ty.clone(), param.span)?;
        }

        let ExprKind::Block(statements) = &schema.body.kind else {
            return Err(CompileError::codegen("schema body must be a block", schema.body.span));
        };
        let returns = &schema.return_type;

        if returns.is_void() {
            self.compile_block(statements, false)?;
            self.emit(Op::ReturnVoid);
        } else {
            let body_ty = self.compile_block(statements, true)?;
            let span = statements.last().map_or(schema.body.span, |s| s.span);
            self.lower_return(&unit.name, returns, &body_ty, span)?;
            self.emit(Op::Return);
        }

        Ok(CompiledFunction {
            name: unit.name.clone(),
            resource: unit.resource.clone(),
            params: schema
                .params
                .iter()
                .map(|p| (p.name.clone(), p.ty.clone()))
                .collect(),
            returns: returns.clone(),
            ops: self.ops,
            local_count: self.scope.slot_count(),
            local_names: self.scope.slot_names(),
        })
    }

    /// Reconcile the body's value with the declared return type. A string
    /// body returned as text is converted explicitly.
    fn lower_return(
        &mut self,
        name: &str,
        returns: &Type,
        body_ty: &Type,
        span: Span,
    ) -> Result<(), CompileError> {
        if body_ty.is_void() {
            return Err(CompileError::mismatch(
                format!("schema `{name}` must return {returns}, but its body yields nothing"),
                span,
            ));
        }
        if *returns == Type::Text && *body_ty == Type::String {
            self.emit(Op::ToText);
            return Ok(());
        }
        if !returns.accepts(body_ty) {
            return Err(CompileError::mismatch(
                format!("schema `{name}` must return {returns}, but its body yields {body_ty}"),
                span,
            ));
        }
        self.emit_check(returns, body_ty);
        Ok(())
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn emit(&mut self, op: Op) {
        self.ops.push(op);
    }

    fn emit_const(&mut self, value: Constant, span: Span) -> Result<(), CompileError> {
        let idx = self.pools.add_constant(value, span)?;
        self.emit(Op::PushConst(idx));
        Ok(())
    }

    /// Runtime check for values whose static type is `any` entering a slot
    /// that needs a specific kind.
    fn emit_check(&mut self, expected: &Type, actual: &Type) {
        if *actual == Type::Any {
            if let Some(kind) = expected.runtime_kind() {
                self.emit(Op::Expect(kind));
            }
        }
    }

    fn current_offset(&self) -> Result<u16, CompileError> {
        u16::try_from(self.ops.len())
            .map_err(|_| CompileError::codegen("bytecode too large (max 65535 ops)", Span::default()))
    }

    fn emit_jump(&mut self, op: Op) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    fn patch_jump(&mut self, idx: usize) -> Result<(), CompileError> {
        let target = self.current_offset()?;
        if let Some(Op::JumpIfFalse(dest) | Op::Jump(dest)) = self.ops.get_mut(idx) {
            *dest = target;
        }
        Ok(())
    }

    fn declare(&mut self, name: &str, ty: Type, span: Span) -> Result<u16, CompileError> {
        self.scope
            .declare(name, ty)
            .map(|local| local.slot)
            .ok_or_else(|| CompileError::codegen("too many local variables (max 65535)", span))
    }

    fn temp(&mut self, span: Span) -> Result<u16, CompileError> {
        self.scope
            .temp()
            .ok_or_else(|| CompileError::codegen("too many local variables (max 65535)", span))
    }

    fn expect_number(&mut self, ty: &Type, what: &str, span: Span) -> Result<(), CompileError> {
        if !Type::Number.accepts(ty) {
            return Err(CompileError::mismatch(
                format!("{what} must be number, found {ty}"),
                span,
            ));
        }
        self.emit_check(&Type::Number, ty);
        Ok(())
    }

    // ── Blocks & statements ────────────────────────────────────────

    /// Compile statements in order. Every value but the last is popped; the
    /// last is kept when `keep_last` and its type returned.
    fn compile_block(&mut self, statements: &[Expr], keep_last: bool) -> Result<Type, CompileError> {
        let mut last_ty = Type::Void;
        for (i, stmt) in statements.iter().enumerate() {
            let ty = self.compile_expr(stmt)?;
            let is_last = i + 1 == statements.len();
            if is_last && keep_last {
                last_ty = ty;
            } else if !ty.is_void() {
                self.emit(Op::Pop);
            }
        }
        Ok(last_ty)
    }

    /// Compile a nested block whose value is discarded.
    fn compile_body(&mut self, body: &Expr) -> Result<(), CompileError> {
        match &body.kind {
            ExprKind::Block(statements) => {
                self.compile_block(statements, false)?;
            }
            _ => {
                if !self.compile_expr(body)?.is_void() {
                    self.emit(Op::Pop);
                }
            }
        }
        Ok(())
    }

    // ── Expressions ────────────────────────────────────────────────

    /// Emit code for `expr`. Void expressions leave the stack unchanged;
    /// all others push exactly one value. Returns the static type.
    fn compile_expr(&mut self, expr: &Expr) -> Result<Type, CompileError> {
        match &expr.kind {
            ExprKind::Number(n) => {
                self.emit_const(Constant::Number(*n), expr.span)?;
                Ok(Type::Number)
            }
            ExprKind::Str(s) => {
                self.emit_const(Constant::Str(s.clone()), expr.span)?;
                Ok(Type::String)
            }
            ExprKind::Text(markup) => {
                let text = RichText::parse_markup(markup)
                    .map_err(|e| CompileError::lex(e.to_string(), expr.span))?;
                self.emit_const(Constant::Text(text), expr.span)?;
                Ok(Type::Text)
            }
            ExprKind::Bool(b) => {
                self.emit_const(Constant::Number(if *b { 1.0 } else { 0.0 }), expr.span)?;
                Ok(Type::Bool)
            }
            ExprKind::Read(name) => {
                let local = self.scope.get(name).cloned().ok_or_else(|| {
                    CompileError::undefined(format!("undefined variable `{name}`"), expr.span)
                })?;
                self.emit(Op::LoadLocal(local.slot));
                Ok(local.ty)
            }
            ExprKind::Write { name, value } => {
                let value_ty = self.compile_expr(value)?;
                if value_ty.is_void() {
                    return Err(CompileError::mismatch(
                        format!("cannot store a void value in `{name}`"),
                        value.span,
                    ));
                }
                if let Some(existing) = self.scope.get(name).cloned() {
                    if !existing.ty.accepts(&value_ty) {
                        return Err(CompileError::mismatch(
                            format!("`{name}` holds {}, cannot store {value_ty}", existing.ty),
                            value.span,
                        ));
                    }
                    self.emit_check(&existing.ty, &value_ty);
                }
                let slot = self.declare(name, value_ty, expr.span)?;
                self.emit(Op::StoreLocal(slot));
                Ok(Type::Void)
            }
            ExprKind::Binary { op, left, right } => {
                let left_ty = self.compile_expr(left)?;
                self.expect_number(&left_ty, &format!("left operand of `{}`", op.symbol()), left.span)?;
                let right_ty = self.compile_expr(right)?;
                self.expect_number(&right_ty, &format!("right operand of `{}`", op.symbol()), right.span)?;
                self.emit(match op {
                    BinOp::Add => Op::Add,
                    BinOp::Sub => Op::Sub,
                    BinOp::Mul => Op::Mul,
                    BinOp::Div => Op::Div,
                });
                Ok(Type::Number)
            }
            ExprKind::If {
                condition,
                then_block,
                else_block,
            } => {
                let cond_ty = self.compile_expr(condition)?;
                if !Type::Bool.accepts(&cond_ty) {
                    return Err(CompileError::mismatch(
                        format!("condition must be bool, found {cond_ty}"),
                        condition.span,
                    ));
                }
                self.emit_check(&Type::Bool, &cond_ty);
                let jump_if_false = self.emit_jump(Op::JumpIfFalse(0));
                self.compile_body(then_block)?;
                if let Some(else_block) = else_block {
                    let jump_end = self.emit_jump(Op::Jump(0));
                    self.patch_jump(jump_if_false)?;
                    self.compile_body(else_block)?;
                    self.patch_jump(jump_end)?;
                } else {
                    self.patch_jump(jump_if_false)?;
                }
                Ok(Type::Void)
            }
            ExprKind::Repeat { count, body } => {
                let count_ty = self.compile_expr(count)?;
                self.expect_number(&count_ty, "repeat count", count.span)?;
                let counter = self.temp(expr.span)?;
                let one = self.pools.add_constant(Constant::Number(1.0), expr.span)?;
                self.emit(Op::StoreLocal(counter));

                // while counter >= 1 { body; counter = counter - 1 }
                let loop_start = self.current_offset()?;
                self.emit(Op::LoadLocal(counter));
                self.emit(Op::PushConst(one));
                self.emit(Op::Ge);
                let exit = self.emit_jump(Op::JumpIfFalse(0));
                self.compile_body(body)?;
                self.emit(Op::LoadLocal(counter));
                self.emit(Op::PushConst(one));
                self.emit(Op::Sub);
                self.emit(Op::StoreLocal(counter));
                self.emit(Op::Jump(loop_start));
                self.patch_jump(exit)?;
                Ok(Type::Void)
            }
            ExprKind::ForEach {
                variable,
                sequence,
                body,
            } => {
                let seq_ty = self.compile_expr(sequence)?;
                if !Type::List.accepts(&seq_ty) {
                    return Err(CompileError::mismatch(
                        format!("foreach needs a list, found {seq_ty}"),
                        sequence.span,
                    ));
                }
                self.emit_check(&Type::List, &seq_ty);
                let seq = self.temp(expr.span)?;
                let index = self.temp(expr.span)?;
                let item = self.declare(variable, Type::Any, expr.span)?;
                let zero = self.pools.add_constant(Constant::Number(0.0), expr.span)?;
                let one = self.pools.add_constant(Constant::Number(1.0), expr.span)?;
                self.emit(Op::StoreLocal(seq));
                self.emit(Op::PushConst(zero));
                self.emit(Op::StoreLocal(index));

                // while index < size(seq) { item = seq[index]; body; index = index + 1 }
                let loop_start = self.current_offset()?;
                self.emit(Op::LoadLocal(index));
                self.emit(Op::LoadLocal(seq));
                self.emit(Op::Native(NativeOp::ListSize));
                self.emit(Op::Lt);
                let exit = self.emit_jump(Op::JumpIfFalse(0));
                self.emit(Op::LoadLocal(seq));
                self.emit(Op::LoadLocal(index));
                self.emit(Op::Native(NativeOp::ListGet));
                self.emit(Op::StoreLocal(item));
                self.compile_body(body)?;
                self.emit(Op::LoadLocal(index));
                self.emit(Op::PushConst(one));
                self.emit(Op::Add);
                self.emit(Op::StoreLocal(index));
                self.emit(Op::Jump(loop_start));
                self.patch_jump(exit)?;
                Ok(Type::Void)
            }
            ExprKind::Block(statements) => self.compile_block(statements, true),
            ExprKind::Operation { op, args } => {
                let fields: Vec<&Type> = op.fields.iter().map(|f| &f.ty).collect();
                self.compile_args(args, &fields, expr.span)?;
                let argc = argc(args.len(), expr.span)?;
                match &op.kind {
                    OperationKind::Native(native) => self.emit(Op::Native(*native)),
                    OperationKind::Host(f) => {
                        let index = self.pools.host(op, f, expr.span)?;
                        self.emit(Op::InvokeHost {
                            index,
                            argc,
                            returns: !op.returns.is_void(),
                        });
                    }
                }
                Ok(op.returns.clone())
            }
            ExprKind::UserCall {
                target,
                params,
                returns,
                args,
            } => {
                let fields: Vec<&Type> = params.iter().collect();
                self.compile_args(args, &fields, expr.span)?;
                let function = self
                    .ctx
                    .schemas
                    .get_index_of(target)
                    .and_then(|i| u16::try_from(i).ok())
                    .ok_or_else(|| {
                        CompileError::unresolved(format!("no schema named `{target}`"), expr.span)
                    })?;
                self.emit(Op::Call {
                    function,
                    argc: argc(args.len(), expr.span)?,
                    returns: !returns.is_void(),
                });
                Ok(returns.clone())
            }
            ExprKind::Call(call) => {
                let bound = self.ctx.resolve(call, expr.span, &self.scope)?;
                self.compile_expr(bound)
            }
        }
    }

    fn compile_args(&mut self, args: &[Expr], fields: &[&Type], span: Span) -> Result<(), CompileError> {
        if args.len() != fields.len() {
            return Err(CompileError::arity(
                format!("expected {} arguments, found {}", fields.len(), args.len()),
                span,
            ));
        }
        for (arg, expected) in args.iter().zip(fields) {
            let actual = self.compile_expr(arg)?;
            if actual.is_void() {
                return Err(CompileError::mismatch("argument yields no value", arg.span));
            }
            if !expected.accepts(&actual) {
                return Err(CompileError::mismatch(
                    format!("expected {expected}, found {actual}"),
                    arg.span,
                ));
            }
            self.emit_check(expected, &actual);
        }
        Ok(())
    }
}

fn argc(len: usize, span: Span) -> Result<u8, CompileError> {
    u8::try_from(len).map_err(|_| CompileError::codegen("too many arguments (max 255)", span))
}
