use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::types::Type;
use super::vm::RuntimeError;
use crate::value::Value;

/// Host callback bound to a registered operation. Receives the evaluated
/// arguments in declaration order.
pub type HostFn = Arc<dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

/// Operations the VM executes directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOp {
    ListNew,
    ListAppend,
    ListGet,
    ListSize,
    DictNew,
    DictPut,
    DictGet,
    DictHas,
    StructNew,
    StructGet,
    StructSet,
    Vec3New,
    Vec3Add,
    Vec3Multiply,
    Vec3X,
    Vec3Y,
    Vec3Z,
    TextNew,
    TextColor,
    TextContents,
    TextAdd,
    StringConcat,
    StringLength,
    NumberToString,
    UuidRandom,
}

#[derive(Clone)]
pub enum OperationKind {
    Native(NativeOp),
    Host(HostFn),
}

impl fmt::Debug for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Native(op) => write!(f, "Native({op:?})"),
            OperationKind::Host(_) => f.write_str("Host(..)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

/// A callable operation: name, ordered typed fields, return type, and how
/// it executes.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub name: String,
    pub fields: Vec<Field>,
    pub returns: Type,
    pub kind: OperationKind,
    pub category: String,
    pub description: String,
}

impl OperationDescriptor {
    /// `list/append(list list, value any) -> void`
    pub fn signature(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("{} {}", f.name, f.ty))
            .collect();
        format!("{}({}) -> {}", self.name, fields.join(", "), self.returns)
    }
}

/// Declarative entry for the standard operation set. Types are written as
/// keywords and parsed when the registry is built.
struct StandardOp {
    name: &'static str,
    params: &'static [(&'static str, &'static str)],
    ret: &'static str,
    op: NativeOp,
    category: &'static str,
    description: &'static str,
}

static STANDARD: &[StandardOp] = &[
    // ── Lists ───────────────────────────────────────────────────
    StandardOp {
        name: "new_list", params: &[], ret: "list",
        op: NativeOp::ListNew, category: "list", description: "Empty list",
    },
    StandardOp {
        name: "list/append", params: &[("list", "list"), ("value", "any")], ret: "void",
        op: NativeOp::ListAppend, category: "list", description: "Append to the end",
    },
    StandardOp {
        name: "list/get", params: &[("list", "list"), ("index", "number")], ret: "any",
        op: NativeOp::ListGet, category: "list", description: "Element at index",
    },
    StandardOp {
        name: "list/size", params: &[("list", "list")], ret: "number",
        op: NativeOp::ListSize, category: "list", description: "Number of elements",
    },
    // ── Dicts ───────────────────────────────────────────────────
    StandardOp {
        name: "new_dict", params: &[], ret: "dict",
        op: NativeOp::DictNew, category: "dict", description: "Empty dict",
    },
    StandardOp {
        name: "dict/put", params: &[("dict", "dict"), ("key", "any"), ("value", "any")], ret: "void",
        op: NativeOp::DictPut, category: "dict", description: "Insert or replace an entry",
    },
    StandardOp {
        name: "dict/get", params: &[("dict", "dict"), ("key", "any")], ret: "any",
        op: NativeOp::DictGet, category: "dict", description: "Value for key; missing keys are an error",
    },
    StandardOp {
        name: "dict/has", params: &[("dict", "dict"), ("key", "any")], ret: "bool",
        op: NativeOp::DictHas, category: "dict", description: "Whether key is present",
    },
    // ── Structs ─────────────────────────────────────────────────
    StandardOp {
        name: "new_struct", params: &[("arity", "number")], ret: "any",
        op: NativeOp::StructNew, category: "struct", description: "Struct of arity fields, each 0",
    },
    StandardOp {
        name: "struct_get", params: &[("struct", "any"), ("index", "number")], ret: "any",
        op: NativeOp::StructGet, category: "struct", description: "Field at index",
    },
    StandardOp {
        name: "struct_set", params: &[("struct", "any"), ("index", "number"), ("value", "any")], ret: "void",
        op: NativeOp::StructSet, category: "struct", description: "Replace field at index",
    },
    // ── Vectors ─────────────────────────────────────────────────
    StandardOp {
        name: "vec3", params: &[("x", "number"), ("y", "number"), ("z", "number")], ret: "vec3",
        op: NativeOp::Vec3New, category: "vec3", description: "Construct a vector",
    },
    StandardOp {
        name: "vec3/add", params: &[("lhs", "vec3"), ("rhs", "vec3")], ret: "vec3",
        op: NativeOp::Vec3Add, category: "vec3", description: "Component-wise sum",
    },
    StandardOp {
        name: "vec3/multiply", params: &[("lhs", "vec3"), ("rhs", "vec3")], ret: "vec3",
        op: NativeOp::Vec3Multiply, category: "vec3", description: "Component-wise product",
    },
    StandardOp {
        name: "vec3/x", params: &[("v", "vec3")], ret: "number",
        op: NativeOp::Vec3X, category: "vec3", description: "X component",
    },
    StandardOp {
        name: "vec3/y", params: &[("v", "vec3")], ret: "number",
        op: NativeOp::Vec3Y, category: "vec3", description: "Y component",
    },
    StandardOp {
        name: "vec3/z", params: &[("v", "vec3")], ret: "number",
        op: NativeOp::Vec3Z, category: "vec3", description: "Z component",
    },
    // ── Text ────────────────────────────────────────────────────
    StandardOp {
        name: "text", params: &[("content", "string")], ret: "text",
        op: NativeOp::TextNew, category: "text", description: "Plain text from a string",
    },
    StandardOp {
        name: "text/color", params: &[("text", "text"), ("color", "string")], ret: "text",
        op: NativeOp::TextColor, category: "text", description: "Recolor with a #rrggbb hex string",
    },
    StandardOp {
        name: "text/contents", params: &[("text", "text")], ret: "string",
        op: NativeOp::TextContents, category: "text", description: "Content with styling stripped",
    },
    StandardOp {
        name: "text/add", params: &[("text", "text"), ("value", "any")], ret: "text",
        op: NativeOp::TextAdd, category: "text", description: "Append text, or any value's display form",
    },
    // ── Strings & numbers ───────────────────────────────────────
    StandardOp {
        name: "string/concat", params: &[("string", "string"), ("value", "any")], ret: "string",
        op: NativeOp::StringConcat, category: "string", description: "Append any value's display form",
    },
    StandardOp {
        name: "string/length", params: &[("string", "string")], ret: "number",
        op: NativeOp::StringLength, category: "string", description: "Length in characters",
    },
    StandardOp {
        name: "number/to_string", params: &[("number", "number")], ret: "string",
        op: NativeOp::NumberToString, category: "number", description: "Display form",
    },
    StandardOp {
        name: "random_uuid", params: &[], ret: "any",
        op: NativeOp::UuidRandom, category: "uuid", description: "Random v4 UUID",
    },
];

fn keyword_type(name: &str) -> Type {
    Type::parse(name).unwrap_or_else(|| Type::Unresolved(name.to_string()))
}

impl StandardOp {
    fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor {
            name: self.name.to_string(),
            fields: self
                .params
                .iter()
                .map(|(name, ty)| Field {
                    name: (*name).to_string(),
                    ty: keyword_type(ty),
                })
                .collect(),
            returns: keyword_type(self.ret),
            kind: OperationKind::Native(self.op),
            category: self.category.to_string(),
            description: self.description.to_string(),
        }
    }
}

/// Name-keyed table of operations visible to scripts. One name maps to
/// exactly one operation; registering an existing name replaces it.
#[derive(Debug, Clone, Default)]
pub struct BuiltinRegistry {
    ops: IndexMap<String, Arc<OperationDescriptor>>,
}

impl BuiltinRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry preloaded with the standard operation set.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for op in STANDARD {
            registry.register(op.descriptor());
        }
        registry
    }

    /// Add an operation, returning the one it replaced.
    pub fn register(&mut self, op: OperationDescriptor) -> Option<Arc<OperationDescriptor>> {
        let name = op.name.clone();
        let previous = self.ops.insert(name.clone(), Arc::new(op));
        if previous.is_some() {
            tracing::debug!(operation = %name, "replaced registered operation");
        }
        previous
    }

    /// Register a host callback under `name`.
    pub fn register_host<F>(
        &mut self,
        name: impl Into<String>,
        fields: &[(&str, Type)],
        returns: Type,
        callback: F,
    ) -> Option<Arc<OperationDescriptor>>
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.register(OperationDescriptor {
            name: name.into(),
            fields: fields
                .iter()
                .map(|(name, ty)| Field {
                    name: (*name).to_string(),
                    ty: ty.clone(),
                })
                .collect(),
            returns,
            kind: OperationKind::Host(Arc::new(callback)),
            category: "host".to_string(),
            description: String::new(),
        })
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<OperationDescriptor>> {
        self.ops.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<OperationDescriptor>> {
        self.ops.values()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn standard_names_are_unique() {
        let registry = BuiltinRegistry::standard();
        assert_eq!(registry.len(), STANDARD.len());
    }

    #[test]
    fn standard_types_are_all_keywords() {
        for op in BuiltinRegistry::standard().iter() {
            for field in &op.fields {
                assert!(!matches!(field.ty, Type::Unresolved(_)), "{}", op.name);
            }
            assert!(!matches!(op.returns, Type::Unresolved(_)), "{}", op.name);
        }
    }

    #[test]
    fn signature_rendering() {
        let registry = BuiltinRegistry::standard();
        let op = registry.lookup("list/append").unwrap();
        assert_eq!(op.signature(), "list/append(list list, value any) -> void");
    }

    #[test]
    fn host_registration_replaces_by_name() {
        let mut registry = BuiltinRegistry::standard();
        let before = registry.len();
        registry.register_host("log", &[("msg", Type::String)], Type::Void, |_| {
            Ok(Value::Number(0.0))
        });
        assert_eq!(registry.len(), before + 1);
        let replaced = registry.register_host("log", &[], Type::Void, |_| Ok(Value::Number(1.0)));
        assert!(replaced.is_some());
        assert_eq!(registry.len(), before + 1);
        assert!(registry.lookup("log").unwrap().fields.is_empty());
    }
}
