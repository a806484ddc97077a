use std::sync::Arc;

use uuid::Uuid;

use super::builtins::NativeOp;
use super::compiler::{CompiledModule, Op, STATIC_INIT};
use super::types::Type;
use crate::value::text::parse_hex_color;
use crate::value::{
    format_number, CycleError, DictRef, IndexError, ListRef, RichText, StoreError, StructRef,
    Value, Vec3,
};

/// Execution bounds applied to every call into a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Nested schema calls allowed before [`RuntimeError::CallDepth`].
    pub max_call_depth: usize,
    /// Operand stack slots per frame.
    pub max_stack: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_call_depth: 64,
            max_stack: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("expected {expected}, found {found}")]
    TypeCheck { expected: String, found: String },
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error("struct arity {0} must be a whole number from 0 to 65535")]
    StructArity(f64),
    #[error("`{variable}` is read in `{function}` before it is assigned")]
    Unassigned { function: String, variable: String },
    #[error("list index {index} is out of range for length {len}")]
    ListIndex { index: f64, len: usize },
    #[error("key {0} is not present in dict")]
    MissingKey(String),
    #[error("invalid color `{0}`, expected #rrggbb")]
    InvalidColor(String),
    #[error("operand stack exceeded {limit} slots")]
    StackOverflow { limit: usize },
    #[error("call depth exceeded {limit}")]
    CallDepth { limit: usize },
    #[error("`{function}` takes {expected} arguments, {found} given")]
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },
    #[error("{operation}: {message}")]
    Host { operation: String, message: String },
    /// Bytecode violated an invariant the compiler guarantees.
    #[error("malformed bytecode: {0}")]
    Malformed(&'static str),
}

impl From<StoreError> for RuntimeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Index(e) => RuntimeError::Index(e),
            StoreError::Cycle(e) => RuntimeError::Cycle(e),
        }
    }
}

impl RuntimeError {
    /// Error for host callbacks to return.
    pub fn host(operation: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeError::Host {
            operation: operation.into(),
            message: message.into(),
        }
    }

    fn type_check(expected: impl Into<String>, found: &Value) -> Self {
        RuntimeError::TypeCheck {
            expected: expected.into(),
            found: found.type_name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    StaticInit,
    Function(usize),
}

/// Handle to one entry point of a compiled module. Keeps the module alive,
/// so a handle obtained before a reload still runs the old code.
#[derive(Debug, Clone)]
pub struct Callable {
    module: Arc<CompiledModule>,
    entry: Entry,
}

impl Callable {
    pub fn name(&self) -> &str {
        match self.entry {
            Entry::StaticInit => STATIC_INIT,
            Entry::Function(i) => self
                .module
                .functions
                .get(i)
                .map_or(STATIC_INIT, |f| f.name.as_str()),
        }
    }

    pub fn module(&self) -> &Arc<CompiledModule> {
        &self.module
    }

    /// Declared parameters; empty for the initializer.
    pub fn params(&self) -> &[(String, Type)] {
        match self.entry {
            Entry::StaticInit => &[],
            Entry::Function(i) => self
                .module
                .functions
                .get(i)
                .map_or(&[][..], |f| f.params.as_slice()),
        }
    }

    /// Run with positional arguments. Returns `None` for void schemas.
    pub fn invoke(&self, args: &[Value]) -> Result<Option<Value>, RuntimeError> {
        match self.entry {
            Entry::StaticInit => {
                self.module.static_init();
                Ok(None)
            }
            Entry::Function(index) => {
                let function = self
                    .module
                    .functions
                    .get(index)
                    .ok_or(RuntimeError::Malformed("function index out of range"))?;
                if args.len() != function.params.len() {
                    return Err(RuntimeError::ArgumentCount {
                        function: function.name.clone(),
                        expected: function.params.len(),
                        found: args.len(),
                    });
                }
                for ((name, ty), arg) in function.params.iter().zip(args) {
                    if let Some(kind) = ty.runtime_kind() {
                        if arg.kind() != kind {
                            return Err(RuntimeError::TypeCheck {
                                expected: format!("{kind} for parameter `{name}`"),
                                found: arg.type_name().to_string(),
                            });
                        }
                    }
                }
                execute(&self.module, index, args.to_vec())
            }
        }
    }
}

impl CompiledModule {
    /// Entry point by schema name; `$static_init` names the initializer.
    pub fn function(self: &Arc<Self>, name: &str) -> Option<Callable> {
        let entry = if name == STATIC_INIT {
            Entry::StaticInit
        } else {
            Entry::Function(self.function_index(name)?)
        };
        Some(Callable {
            module: Arc::clone(self),
            entry,
        })
    }

    /// Entry point by the resource the schema was loaded from.
    pub fn function_by_resource(self: &Arc<Self>, id: &crate::source::ResourceId) -> Option<Callable> {
        let index = self.resource_index(id)?;
        Some(Callable {
            module: Arc::clone(self),
            entry: Entry::Function(index),
        })
    }
}

/// Run function `index` of `module` with already-checked arguments.
pub fn execute(
    module: &CompiledModule,
    index: usize,
    args: Vec<Value>,
) -> Result<Option<Value>, RuntimeError> {
    run(module, index, args, 0)
}

fn run(
    module: &CompiledModule,
    index: usize,
    args: Vec<Value>,
    depth: usize,
) -> Result<Option<Value>, RuntimeError> {
    let limits = module.limits;
    if depth >= limits.max_call_depth {
        return Err(RuntimeError::CallDepth {
            limit: limits.max_call_depth,
        });
    }
    let function = module
        .functions
        .get(index)
        .ok_or(RuntimeError::Malformed("function index out of range"))?;
    let constants = module.materialized();

    // `None` marks a slot nothing has been stored into yet.
    let mut locals: Vec<Option<Value>> = args.into_iter().map(Some).collect();
    locals.resize(usize::from(function.local_count), None);
    let mut frame = Frame {
        stack: Vec::with_capacity(16),
        limit: limits.max_stack,
    };
    let mut pc = 0usize;

    loop {
        let op = *function
            .ops
            .get(pc)
            .ok_or(RuntimeError::Malformed("fell off the end of a function"))?;
        pc += 1;

        match op {
            Op::PushConst(idx) => {
                let value = constants
                    .get(usize::from(idx))
                    .cloned()
                    .ok_or(RuntimeError::Malformed("constant index out of range"))?;
                frame.push(value)?;
            }
            Op::LoadLocal(slot) => {
                let value = locals
                    .get(usize::from(slot))
                    .ok_or(RuntimeError::Malformed("local slot out of range"))?
                    .clone()
                    .ok_or_else(|| RuntimeError::Unassigned {
                        function: function.name.clone(),
                        variable: function.local_name(slot).to_string(),
                    })?;
                frame.push(value)?;
            }
            Op::StoreLocal(slot) => {
                let value = frame.pop()?;
                let target = locals
                    .get_mut(usize::from(slot))
                    .ok_or(RuntimeError::Malformed("local slot out of range"))?;
                *target = Some(value);
            }
            Op::Pop => {
                frame.pop()?;
            }
            Op::Add => frame.number_binop(|a, b| a + b)?,
            Op::Sub => frame.number_binop(|a, b| a - b)?,
            Op::Mul => frame.number_binop(|a, b| a * b)?,
            Op::Div => frame.number_binop(|a, b| a / b)?,
            Op::Lt => frame.number_cmp(|a, b| a < b)?,
            Op::Ge => frame.number_cmp(|a, b| a >= b)?,
            Op::Expect(kind) => {
                let top = frame
                    .stack
                    .last()
                    .ok_or(RuntimeError::Malformed("stack underflow"))?;
                if top.kind() != kind {
                    return Err(RuntimeError::type_check(kind.name(), top));
                }
            }
            Op::ToText => {
                let value = frame.pop()?;
                let text = match value {
                    Value::String(s) => Value::Text(RichText::plain(s)),
                    Value::Text(t) => Value::Text(t),
                    other => return Err(RuntimeError::type_check("string", &other)),
                };
                frame.push(text)?;
            }
            Op::JumpIfFalse(target) => {
                if !truthy(&frame.pop()?)? {
                    pc = usize::from(target);
                }
            }
            Op::Jump(target) => pc = usize::from(target),
            Op::Native(native) => run_native(native, &mut frame)?,
            Op::InvokeHost {
                index,
                argc,
                returns,
            } => {
                let args = frame.pop_n(usize::from(argc))?;
                let callback = module
                    .host_fns
                    .get(usize::from(index))
                    .ok_or(RuntimeError::Malformed("host function index out of range"))?;
                let result = callback(&args)?;
                if returns {
                    frame.push(result)?;
                }
            }
            Op::Call {
                function: callee,
                argc,
                returns,
            } => {
                let args = frame.pop_n(usize::from(argc))?;
                let result = run(module, usize::from(callee), args, depth + 1)?;
                if returns {
                    let value =
                        result.ok_or(RuntimeError::Malformed("callee returned no value"))?;
                    frame.push(value)?;
                }
            }
            Op::Return => return frame.pop().map(Some),
            Op::ReturnVoid => return Ok(None),
        }
    }
}

// ── Frame ───────────────────────────────────────────────────────────

struct Frame {
    stack: Vec<Value>,
    limit: usize,
}

impl Frame {
    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.limit {
            return Err(RuntimeError::StackOverflow { limit: self.limit });
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or(RuntimeError::Malformed("stack underflow"))
    }

    /// Pop `n` values, returned in push order.
    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        let at = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or(RuntimeError::Malformed("stack underflow"))?;
        Ok(self.stack.split_off(at))
    }

    fn pop_number(&mut self) -> Result<f64, RuntimeError> {
        match self.pop()? {
            Value::Number(n) => Ok(n),
            other => Err(RuntimeError::type_check("number", &other)),
        }
    }

    fn pop_string(&mut self) -> Result<String, RuntimeError> {
        match self.pop()? {
            Value::String(s) => Ok(s),
            other => Err(RuntimeError::type_check("string", &other)),
        }
    }

    fn pop_list(&mut self) -> Result<ListRef, RuntimeError> {
        match self.pop()? {
            Value::List(l) => Ok(l),
            other => Err(RuntimeError::type_check("list", &other)),
        }
    }

    fn pop_dict(&mut self) -> Result<DictRef, RuntimeError> {
        match self.pop()? {
            Value::Dict(d) => Ok(d),
            other => Err(RuntimeError::type_check("dict", &other)),
        }
    }

    fn pop_struct(&mut self) -> Result<StructRef, RuntimeError> {
        match self.pop()? {
            Value::Struct(s) => Ok(s),
            other => Err(RuntimeError::type_check("struct", &other)),
        }
    }

    fn pop_vector(&mut self) -> Result<Vec3, RuntimeError> {
        match self.pop()? {
            Value::Vector(v) => Ok(v),
            other => Err(RuntimeError::type_check("vec3", &other)),
        }
    }

    fn pop_text(&mut self) -> Result<RichText, RuntimeError> {
        match self.pop()? {
            Value::Text(t) => Ok(t),
            other => Err(RuntimeError::type_check("text", &other)),
        }
    }

    fn number_binop(&mut self, op: impl FnOnce(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.pop_number()?;
        let a = self.pop_number()?;
        self.push(Value::Number(op(a, b)))
    }

    fn number_cmp(&mut self, op: impl FnOnce(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let b = self.pop_number()?;
        let a = self.pop_number()?;
        self.push(Value::bool(op(a, b)))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

#[allow(clippy::float_cmp)]
fn truthy(value: &Value) -> Result<bool, RuntimeError> {
    match value {
        Value::Number(n) => Ok(*n != 0.0),
        other => Err(RuntimeError::type_check("bool", other)),
    }
}

/// A number usable as a position: finite, integral, non-negative.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn to_index(n: f64) -> Option<usize> {
    if n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n <= usize::MAX as f64 {
        Some(n as usize)
    } else {
        None
    }
}

#[allow(clippy::cast_precision_loss)]
fn run_native(op: NativeOp, frame: &mut Frame) -> Result<(), RuntimeError> {
    match op {
        NativeOp::ListNew => frame.push(Value::List(ListRef::new())),
        NativeOp::ListAppend => {
            let value = frame.pop()?;
            frame.pop_list()?.push(value)?;
            Ok(())
        }
        NativeOp::ListGet => {
            let index = frame.pop_number()?;
            let list = frame.pop_list()?;
            let item = to_index(index)
                .and_then(|i| list.get(i))
                .ok_or(RuntimeError::ListIndex {
                    index,
                    len: list.len(),
                })?;
            frame.push(item)
        }
        NativeOp::ListSize => {
            let len = frame.pop_list()?.len();
            frame.push(Value::Number(len as f64))
        }
        NativeOp::DictNew => frame.push(Value::Dict(DictRef::new())),
        NativeOp::DictPut => {
            let value = frame.pop()?;
            let key = frame.pop()?;
            frame.pop_dict()?.insert(key, value)?;
            Ok(())
        }
        NativeOp::DictGet => {
            let key = frame.pop()?;
            let dict = frame.pop_dict()?;
            let value = dict
                .get(&key)
                .ok_or_else(|| RuntimeError::MissingKey(key.to_string()))?;
            frame.push(value)
        }
        NativeOp::DictHas => {
            let key = frame.pop()?;
            let present = frame.pop_dict()?.contains_key(&key);
            frame.push(Value::bool(present))
        }
        NativeOp::StructNew => {
            let n = frame.pop_number()?;
            let fields = to_index(n)
                .and_then(|arity| StructRef::filled(arity, &Value::Number(0.0)).ok())
                .ok_or(RuntimeError::StructArity(n))?;
            frame.push(Value::Struct(fields))
        }
        NativeOp::StructGet => {
            let n = frame.pop_number()?;
            let fields = frame.pop_struct()?;
            let index = to_index(n).ok_or(IndexError {
                index: usize::MAX,
                arity: fields.arity(),
            })?;
            frame.push(fields.get(index)?)
        }
        NativeOp::StructSet => {
            let value = frame.pop()?;
            let n = frame.pop_number()?;
            let fields = frame.pop_struct()?;
            let index = to_index(n).ok_or(IndexError {
                index: usize::MAX,
                arity: fields.arity(),
            })?;
            fields.set(index, value)?;
            Ok(())
        }
        NativeOp::Vec3New => {
            let z = frame.pop_number()?;
            let y = frame.pop_number()?;
            let x = frame.pop_number()?;
            frame.push(Value::Vector(Vec3::new(x, y, z)))
        }
        NativeOp::Vec3Add => {
            let rhs = frame.pop_vector()?;
            let lhs = frame.pop_vector()?;
            frame.push(Value::Vector(lhs.add(rhs)))
        }
        NativeOp::Vec3Multiply => {
            let rhs = frame.pop_vector()?;
            let lhs = frame.pop_vector()?;
            frame.push(Value::Vector(lhs.multiply(rhs)))
        }
        NativeOp::Vec3X => {
            let v = frame.pop_vector()?;
            frame.push(Value::Number(v.x))
        }
        NativeOp::Vec3Y => {
            let v = frame.pop_vector()?;
            frame.push(Value::Number(v.y))
        }
        NativeOp::Vec3Z => {
            let v = frame.pop_vector()?;
            frame.push(Value::Number(v.z))
        }
        NativeOp::TextNew => {
            let s = frame.pop_string()?;
            frame.push(Value::Text(RichText::plain(s)))
        }
        NativeOp::TextColor => {
            let hex = frame.pop_string()?;
            let text = frame.pop_text()?;
            let rgb = parse_hex_color(&hex).ok_or_else(|| RuntimeError::InvalidColor(hex.clone()))?;
            let colored = text
                .with_color(rgb)
                .map_err(|_| RuntimeError::InvalidColor(hex))?;
            frame.push(Value::Text(colored))
        }
        NativeOp::TextContents => {
            let text = frame.pop_text()?;
            frame.push(Value::String(text.contents()))
        }
        NativeOp::TextAdd => {
            let value = frame.pop()?;
            let mut text = frame.pop_text()?;
            match &value {
                Value::Text(other) => text.append(other),
                other => text.push(other.to_string(), None),
            }
            frame.push(Value::Text(text))
        }
        NativeOp::StringConcat => {
            let value = frame.pop()?;
            let mut s = frame.pop_string()?;
            s.push_str(&value.to_string());
            frame.push(Value::String(s))
        }
        NativeOp::StringLength => {
            let s = frame.pop_string()?;
            frame.push(Value::Number(s.chars().count() as f64))
        }
        NativeOp::NumberToString => {
            let n = frame.pop_number()?;
            frame.push(Value::String(format_number(n)))
        }
        NativeOp::UuidRandom => frame.push(Value::Uuid(Uuid::new_v4())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::builtins::BuiltinRegistry;
    use crate::dsl::compile_source;
    use crate::value::ValueKind;

    fn module(src: &str) -> Arc<CompiledModule> {
        Arc::new(compile_source(src, &BuiltinRegistry::standard(), Limits::default()).unwrap())
    }

    fn call(src: &str, name: &str, args: &[Value]) -> Result<Option<Value>, RuntimeError> {
        module(src).function(name).unwrap().invoke(args)
    }

    #[test]
    fn greet_returns_text() {
        let out = call(
            "schema greet(name string) -> text { name }",
            "greet",
            &[Value::string("world")],
        )
        .unwrap();
        assert_eq!(out, Some(Value::Text(RichText::plain("world"))));
    }

    #[test]
    fn add3_uses_shared_precedence_level() {
        // (a + b) * c
        let out = call(
            "schema add3(a number, b number, c number) -> number { a + b * c }",
            "add3",
            &[Value::Number(2.0), Value::Number(3.0), Value::Number(4.0)],
        )
        .unwrap();
        assert_eq!(out, Some(Value::Number(20.0)));
    }

    #[test]
    fn void_schema_returns_nothing() {
        let out = call("schema() { x = 1 }", "main", &[]).unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn repeat_runs_count_times() {
        let out = call(
            "schema() -> number { n = 0 repeat 4 { n = n + 2 } n }",
            "main",
            &[],
        )
        .unwrap();
        assert_eq!(out, Some(Value::Number(8.0)));
    }

    #[test]
    fn foreach_visits_each_element() {
        let src = "schema(xs list) -> number { total = 0 foreach v in xs { total = total + v } total }";
        let xs = Value::list([Value::Number(1.0), Value::Number(2.0), Value::Number(3.5)]);
        assert_eq!(call(src, "main", &[xs]).unwrap(), Some(Value::Number(6.5)));
    }

    #[test]
    fn if_else_picks_branch() {
        let src = "schema(flag bool) -> number { r = 0 if flag { r = 1 } else { r = 2 } r }";
        assert_eq!(
            call(src, "main", &[Value::bool(true)]).unwrap(),
            Some(Value::Number(1.0))
        );
        assert_eq!(
            call(src, "main", &[Value::bool(false)]).unwrap(),
            Some(Value::Number(2.0))
        );
    }

    #[test]
    fn list_operations_through_arrow_calls() {
        // `->` binds looser than `+`, so intermediate results go through locals
        let src = "schema() -> number { xs = new_list() xs->append(5) xs->append(7) a = xs->get(1) b = xs->size() a + b }";
        assert_eq!(call(src, "main", &[]).unwrap(), Some(Value::Number(9.0)));
    }

    #[test]
    fn lists_are_shared_with_the_host() {
        let src = "schema(xs list) { xs->append('added') }";
        let xs = ListRef::new();
        call(src, "main", &[Value::List(xs.clone())]).unwrap();
        assert_eq!(xs.snapshot(), vec![Value::string("added")]);
    }

    #[test]
    fn vec3_operations() {
        let src = "schema() -> vec3 { vec3(1, 2, 3)->multiply(vec3(2, 2, 2))->add(vec3(0, 0, 1)) }";
        assert_eq!(
            call(src, "main", &[]).unwrap(),
            Some(Value::Vector(Vec3::new(2.0, 4.0, 7.0)))
        );
    }

    #[test]
    fn text_operations() {
        let src = "schema() -> string { `hp: `->add(10)->color('#00ff00')->contents() }";
        assert_eq!(call(src, "main", &[]).unwrap(), Some(Value::string("hp: 10")));

        let bad = "schema() -> text { `x`->color('green') }";
        assert_eq!(
            call(bad, "main", &[]).unwrap_err(),
            RuntimeError::InvalidColor("green".into())
        );
    }

    #[test]
    fn struct_out_of_range_is_index_error() {
        let src = "schema() -> any { s = new_struct(2) struct_set(s, 1, 'b') struct_get(s, 2) }";
        assert_eq!(
            call(src, "main", &[]).unwrap_err(),
            RuntimeError::Index(IndexError { index: 2, arity: 2 })
        );
    }

    #[test]
    fn containers_cannot_be_stored_inside_themselves() {
        assert_eq!(
            call("schema() { xs = new_list() xs->append(xs) }", "main", &[]).unwrap_err(),
            RuntimeError::Cycle(CycleError { kind: ValueKind::List })
        );
        assert_eq!(
            call("schema() { d = new_dict() d->put(d, 1) }", "main", &[]).unwrap_err(),
            RuntimeError::Cycle(CycleError { kind: ValueKind::Dict })
        );
        assert_eq!(
            call("schema() { s = new_struct(1) struct_set(s, 0, s) }", "main", &[]).unwrap_err(),
            RuntimeError::Cycle(CycleError { kind: ValueKind::Struct })
        );
    }

    #[test]
    fn dict_lookup_by_itself_finds_nothing() {
        let src = "schema() -> bool { d = new_dict() d->put('k', 1) d->has(d) }";
        assert_eq!(call(src, "main", &[]).unwrap(), Some(Value::bool(false)));
    }

    #[test]
    fn new_struct_arity_is_bounded() {
        assert_eq!(
            call("schema() -> any { new_struct(1000000000000000000) }", "main", &[]).unwrap_err(),
            RuntimeError::StructArity(1e18)
        );
        assert_eq!(
            call("schema() -> any { new_struct(0 - 1) }", "main", &[]).unwrap_err(),
            RuntimeError::StructArity(-1.0)
        );
    }

    #[test]
    fn reading_an_unassigned_local_fails() {
        let src = "schema(c bool) -> string { if c { s = 'x' } s }";
        assert_eq!(
            call(src, "main", &[Value::bool(true)]).unwrap(),
            Some(Value::string("x"))
        );
        assert_eq!(
            call(src, "main", &[Value::bool(false)]).unwrap_err(),
            RuntimeError::Unassigned {
                function: "main".into(),
                variable: "s".into()
            }
        );
    }

    #[test]
    fn reassignment_from_any_is_checked() {
        let src = "schema(v any) -> number { x = 1 x = v x }";
        assert_eq!(
            call(src, "main", &[Value::Number(4.0)]).unwrap(),
            Some(Value::Number(4.0))
        );
        assert_eq!(
            call(src, "main", &[Value::string("s")]).unwrap_err(),
            RuntimeError::TypeCheck {
                expected: "number".into(),
                found: "string".into()
            }
        );
    }

    #[test]
    fn dict_get_and_missing_key() {
        let src = "schema(k any) -> any { d = new_dict() d->put('a', 1) d->get(k) }";
        assert_eq!(
            call(src, "main", &[Value::string("a")]).unwrap(),
            Some(Value::Number(1.0))
        );
        assert!(matches!(
            call(src, "main", &[Value::string("b")]),
            Err(RuntimeError::MissingKey(_))
        ));
    }

    #[test]
    fn any_values_are_checked_at_runtime() {
        let src = "schema(v any) -> number { v + 1 }";
        assert_eq!(
            call(src, "main", &[Value::Number(1.0)]).unwrap(),
            Some(Value::Number(2.0))
        );
        assert_eq!(
            call(src, "main", &[Value::string("x")]).unwrap_err(),
            RuntimeError::TypeCheck {
                expected: "number".into(),
                found: "string".into()
            }
        );
    }

    #[test]
    fn arguments_are_checked_at_entry() {
        let src = "schema f(n number) -> number { n }";
        assert!(matches!(
            call(src, "f", &[]),
            Err(RuntimeError::ArgumentCount { expected: 1, found: 0, .. })
        ));
        assert!(matches!(
            call(src, "f", &[Value::string("1")]),
            Err(RuntimeError::TypeCheck { .. })
        ));
    }

    #[test]
    fn unbounded_recursion_hits_call_depth() {
        let src = "schema loop(n number) -> number { loop(n + 1) }";
        assert_eq!(
            call(src, "loop", &[Value::Number(0.0)]).unwrap_err(),
            RuntimeError::CallDepth { limit: 64 }
        );
    }

    #[test]
    fn host_callbacks_receive_arguments_in_order() {
        let mut builtins = BuiltinRegistry::standard();
        builtins.register_host(
            "sub",
            &[("a", Type::Number), ("b", Type::Number)],
            Type::Number,
            |args| match args {
                [Value::Number(a), Value::Number(b)] => Ok(Value::Number(a - b)),
                _ => Err(RuntimeError::host("sub", "expected two numbers")),
            },
        );
        let module = Arc::new(
            compile_source(
                "schema() -> number { sub(10, 3) }",
                &builtins,
                Limits::default(),
            )
            .unwrap(),
        );
        let out = module.function("main").unwrap().invoke(&[]).unwrap();
        assert_eq!(out, Some(Value::Number(7.0)));
    }

    #[test]
    fn static_init_is_addressable_by_name() {
        let m = module("schema() -> string { 'hi' }");
        let init = m.function(STATIC_INIT).unwrap();
        assert_eq!(init.name(), STATIC_INIT);
        assert_eq!(init.invoke(&[]).unwrap(), None);
        assert!(m.is_initialized());
    }

    #[test]
    fn stack_limit_is_enforced() {
        let limits = Limits {
            max_call_depth: 64,
            max_stack: 2,
        };
        let m = Arc::new(
            compile_source(
                "schema() -> vec3 { vec3(1, 2, 3) }",
                &BuiltinRegistry::standard(),
                limits,
            )
            .unwrap(),
        );
        assert_eq!(
            m.function("main").unwrap().invoke(&[]).unwrap_err(),
            RuntimeError::StackOverflow { limit: 2 }
        );
    }

    #[test]
    fn uuid_random_yields_distinct_values() {
        let src = "schema() -> any { random_uuid() }";
        let a = call(src, "main", &[]).unwrap().unwrap();
        let b = call(src, "main", &[]).unwrap().unwrap();
        assert_eq!(a.kind(), ValueKind::Uuid);
        assert_ne!(a, b);
    }
}
