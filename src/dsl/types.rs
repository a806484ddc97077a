use std::fmt;

use crate::value::ValueKind;

/// Static type of an expression or declared parameter.
///
/// `Any` is a wildcard: it is compatible with every other type in both
/// directions, and values of static type `Any` are checked at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Any,
    Void,
    Number,
    Bool,
    String,
    Vec3,
    Text,
    List,
    Dict,
    Entity,
    /// A named type with no built-in meaning; compatible only with itself
    /// (and `Any`).
    Unresolved(String),
}

impl Type {
    /// Parse a type keyword as written in a schema header.
    pub fn parse(name: &str) -> Option<Type> {
        Some(match name {
            "any" => Type::Any,
            "void" => Type::Void,
            "number" => Type::Number,
            "bool" => Type::Bool,
            "string" => Type::String,
            "vec3" => Type::Vec3,
            "text" => Type::Text,
            "list" => Type::List,
            "dict" => Type::Dict,
            "entity" => Type::Entity,
            _ => return None,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Type::Any => "any",
            Type::Void => "void",
            Type::Number => "number",
            Type::Bool => "bool",
            Type::String => "string",
            Type::Vec3 => "vec3",
            Type::Text => "text",
            Type::List => "list",
            Type::Dict => "dict",
            Type::Entity => "entity",
            Type::Unresolved(name) => name,
        }
    }

    /// Compatibility check used for arguments, assignments and returns.
    /// Names match, or either side is `Any`.
    pub fn accepts(&self, other: &Type) -> bool {
        matches!(self, Type::Any) || matches!(other, Type::Any) || self.name() == other.name()
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Runtime representation a value of this type must have, if any.
    /// Booleans are numbers at runtime.
    pub fn runtime_kind(&self) -> Option<ValueKind> {
        match self {
            Type::Number | Type::Bool => Some(ValueKind::Number),
            Type::String => Some(ValueKind::String),
            Type::Vec3 => Some(ValueKind::Vector),
            Type::Text => Some(ValueKind::Text),
            Type::List => Some(ValueKind::List),
            Type::Dict => Some(ValueKind::Dict),
            Type::Any | Type::Void | Type::Entity | Type::Unresolved(_) => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_keyword() {
        for name in [
            "any", "void", "number", "bool", "string", "vec3", "text", "list", "dict", "entity",
        ] {
            let ty = Type::parse(name);
            assert_eq!(ty.as_ref().map(Type::name), Some(name));
        }
        assert_eq!(Type::parse("float"), None);
    }

    #[test]
    fn any_is_a_wildcard_both_ways() {
        assert!(Type::Any.accepts(&Type::Vec3));
        assert!(Type::Vec3.accepts(&Type::Any));
        assert!(Type::Any.accepts(&Type::Void));
        assert!(!Type::Number.accepts(&Type::String));
    }

    #[test]
    fn unresolved_types_match_by_name() {
        let a = Type::Unresolved("mob".into());
        assert!(a.accepts(&Type::Unresolved("mob".into())));
        assert!(!a.accepts(&Type::Unresolved("item".into())));
        assert!(!a.accepts(&Type::Entity));
    }
}
