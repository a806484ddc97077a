//! Runtime values produced and consumed by compiled scripts.
//!
//! Lists, dicts and structs are shared handles: cloning a `Value` clones the
//! handle, and mutation through one handle is visible through every other.

pub mod codec;
pub mod text;

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use uuid::Uuid;

pub use text::{MarkupError, RichText, TextSegment};

/// Opaque host-supplied value. The codec refuses to encode these.
pub trait HostValue: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &str;

    fn describe(&self) -> String {
        format!("{self:?}")
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    String(String),
    List(ListRef),
    Dict(DictRef),
    Struct(StructRef),
    Vector(Vec3),
    Uuid(Uuid),
    Text(RichText),
    Extension(Arc<dyn HostValue>),
}

/// Discriminant of a [`Value`], used for runtime type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Number,
    String,
    List,
    Dict,
    Struct,
    Vector,
    Uuid,
    Text,
    Extension,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Dict => "dict",
            ValueKind::Struct => "struct",
            ValueKind::Vector => "vec3",
            ValueKind::Uuid => "uuid",
            ValueKind::Text => "text",
            ValueKind::Extension => "extension",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn bool(b: bool) -> Self {
        Value::Number(if b { 1.0 } else { 0.0 })
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(ListRef::from_vec(items.into_iter().collect()))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Dict(_) => ValueKind::Dict,
            Value::Struct(_) => ValueKind::Struct,
            Value::Vector(_) => ValueKind::Vector,
            Value::Uuid(_) => ValueKind::Uuid,
            Value::Text(_) => ValueKind::Text,
            Value::Extension(_) => ValueKind::Extension,
        }
    }

    /// Kind name, or the host's own type name for extensions.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Extension(ext) => ext.type_name(),
            other => other.kind().name(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&DictRef> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructRef> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Vec3> {
        match self {
            Value::Vector(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&RichText> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Identity of the shared container behind this value, if any.
    fn container_ptr(&self) -> Option<*const ()> {
        match self {
            Value::List(l) => Some(l.as_ptr()),
            Value::Dict(d) => Some(d.as_ptr()),
            Value::Struct(s) => Some(s.as_ptr()),
            _ => None,
        }
    }

    /// Whether the container `target` is reachable from this value, the
    /// value itself included. Walks with an explicit stack and never holds
    /// more than one container lock at a time.
    fn reaches(&self, target: *const ()) -> bool {
        let mut seen = HashSet::new();
        let mut pending = vec![self.clone()];
        while let Some(value) = pending.pop() {
            let Some(ptr) = value.container_ptr() else {
                continue;
            };
            if ptr == target {
                return true;
            }
            if !seen.insert(ptr) {
                continue;
            }
            match value {
                Value::List(l) => pending.extend(l.snapshot()),
                Value::Dict(d) => pending.extend(d.entries().into_iter().flat_map(|(k, v)| [k, v])),
                Value::Struct(s) => pending.extend(s.snapshot()),
                _ => {}
            }
        }
        false
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        Value::Vector(v)
    }
}

impl From<RichText> for Value {
    fn from(t: RichText) -> Self {
        Value::Text(t)
    }
}

// Equality is structural. Numbers compare by bit pattern so that `Value`
// can serve as a dict key (NaN == NaN, 0.0 != -0.0).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a.bits() == b.bits(),
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Extension(a), Value::Extension(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        match self {
            Value::Number(n) => n.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::List(l) => {
                for item in l.snapshot() {
                    item.hash(state);
                }
            }
            Value::Dict(d) => {
                // Order-independent, matching IndexMap equality.
                let mut acc: u64 = 0;
                for (k, v) in d.entries() {
                    let mut h = std::collections::hash_map::DefaultHasher::new();
                    k.hash(&mut h);
                    v.hash(&mut h);
                    acc ^= h.finish();
                }
                d.len().hash(state);
                acc.hash(state);
            }
            Value::Struct(s) => {
                for item in s.snapshot() {
                    item.hash(state);
                }
            }
            Value::Vector(v) => v.bits().hash(state),
            Value::Uuid(u) => u.hash(state),
            Value::Text(t) => t.hash(state),
            Value::Extension(e) => std::ptr::hash(Arc::as_ptr(e).cast::<()>(), state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::List(l) => {
                f.write_str("[")?;
                for (i, item) in l.snapshot().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Dict(d) => {
                f.write_str("{")?;
                for (i, (k, v)) in d.entries().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Struct(s) => {
                f.write_str("(")?;
                for (i, item) in s.snapshot().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Value::Vector(v) => write!(
                f,
                "<{}, {}, {}>",
                format_number(v.x),
                format_number(v.y),
                format_number(v.z)
            ),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Text(t) => f.write_str(&t.contents()),
            Value::Extension(e) => f.write_str(&e.describe()),
        }
    }
}

/// Integral numbers print without a fractional part.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ── Shared containers ───────────────────────────────────────────
//
// Containers stay tree-shaped: storing a value that already reaches the
// target container is refused with `CycleError`. Equality, hashing,
// display and the codec all rely on that. The check and the store are not
// one atomic step, so handles shared across threads need outside locking.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a {kind} cannot contain itself")]
pub struct CycleError {
    pub kind: ValueKind,
}

/// Shared, growable list handle.
#[derive(Debug, Clone, Default)]
pub struct ListRef(Arc<Mutex<Vec<Value>>>);

impl ListRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Arc::new(Mutex::new(items)))
    }

    pub fn push(&self, value: Value) -> Result<(), CycleError> {
        if value.reaches(self.as_ptr()) {
            return Err(CycleError {
                kind: ValueKind::List,
            });
        }
        self.0.lock().push(value);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.lock().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Copy of the current elements; the lock is released before returning.
    pub fn snapshot(&self) -> Vec<Value> {
        self.0.lock().clone()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast()
    }
}

impl PartialEq for ListRef {
    fn eq(&self, other: &Self) -> bool {
        // Same handle: avoid locking the same mutex twice.
        self.ptr_eq(other) || self.snapshot() == other.snapshot()
    }
}

/// Shared, insertion-ordered map handle.
#[derive(Debug, Clone, Default)]
pub struct DictRef(Arc<Mutex<IndexMap<Value, Value>>>);

impl DictRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Self(Arc::new(Mutex::new(entries.into_iter().collect())))
    }

    /// Insert or replace. Returns the previous value for `key`.
    pub fn insert(&self, key: Value, value: Value) -> Result<Option<Value>, CycleError> {
        // Hashing a key that reaches this dict would lock it a second time.
        if key.reaches(self.as_ptr()) || value.reaches(self.as_ptr()) {
            return Err(CycleError {
                kind: ValueKind::Dict,
            });
        }
        Ok(self.0.lock().insert(key, value))
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        // No stored key can reach the dict holding it.
        if key.reaches(self.as_ptr()) {
            return None;
        }
        self.0.lock().get(key).cloned()
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        !key.reaches(self.as_ptr()) && self.0.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.0
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast()
    }
}

impl PartialEq for DictRef {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let mine: IndexMap<Value, Value> = self.entries().into_iter().collect();
        let theirs: IndexMap<Value, Value> = other.entries().into_iter().collect();
        mine == theirs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("index {index} is out of range for struct of arity {arity}")]
pub struct IndexError {
    pub index: usize,
    pub arity: usize,
}

/// Largest arity [`StructRef::filled`] will allocate.
pub const MAX_STRUCT_ARITY: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("struct arity {requested} exceeds the maximum of 65535")]
pub struct ArityError {
    pub requested: usize,
}

/// Why a struct field could not be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// Shared fixed-arity positional tuple.
#[derive(Debug, Clone)]
pub struct StructRef(Arc<Mutex<Box<[Value]>>>);

impl StructRef {
    pub fn from_values(values: Vec<Value>) -> Self {
        Self(Arc::new(Mutex::new(values.into_boxed_slice())))
    }

    /// A struct of `arity` fields, each holding `fill`.
    pub fn filled(arity: usize, fill: &Value) -> Result<Self, ArityError> {
        let too_big = ArityError { requested: arity };
        if arity > MAX_STRUCT_ARITY {
            return Err(too_big);
        }
        let mut values = Vec::new();
        values.try_reserve_exact(arity).map_err(|_| too_big)?;
        values.resize(arity, fill.clone());
        Ok(Self::from_values(values))
    }

    pub fn arity(&self) -> usize {
        self.0.lock().len()
    }

    pub fn get(&self, index: usize) -> Result<Value, IndexError> {
        let fields = self.0.lock();
        fields.get(index).cloned().ok_or(IndexError {
            index,
            arity: fields.len(),
        })
    }

    pub fn set(&self, index: usize, value: Value) -> Result<(), StoreError> {
        if value.reaches(self.as_ptr()) {
            return Err(CycleError {
                kind: ValueKind::Struct,
            }
            .into());
        }
        let mut fields = self.0.lock();
        let arity = fields.len();
        match fields.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(IndexError { index, arity }.into()),
        }
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.0.lock().to_vec()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast()
    }
}

impl PartialEq for StructRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.snapshot() == other.snapshot()
    }
}

// ── Vec3 ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    /// Component-wise product.
    pub fn multiply(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x * other.x, self.y * other.y, self.z * other.z)
    }

    fn bits(self) -> [u64; 3] {
        [self.x.to_bits(), self.y.to_bits(), self.z.to_bits()]
    }
}
