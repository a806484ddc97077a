#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod ast;
pub mod error;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod lexer;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod parser;
pub mod types;
pub mod builtins;
pub mod resolver;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod compiler;
#[allow(
    clippy::indexing_slicing,
    clippy::wildcard_imports,
    clippy::cast_possible_truncation,
    clippy::single_match_else,
    clippy::needless_pass_by_value,
    clippy::module_name_repetitions,
)]
pub mod vm;

use ast::Schema;
use builtins::BuiltinRegistry;
use compiler::{CompiledModule, SchemaUnit};
use error::CompileError;
use vm::Limits;

use crate::source::SourceFile;

/// Name given to a standalone schema that does not declare one.
pub const DEFAULT_SCHEMA_NAME: &str = "main";

/// Tokenize and parse one source unit.
pub fn parse_unit(source_id: &str, text: &str) -> Result<Schema, CompileError> {
    let tokens = lexer::tokenize(source_id, text)?;
    parser::parse(tokens).map_err(|e| e.in_source(source_id))
}

/// Compile a single schema into a module of its own. The schema is
/// registered under its declared name, or [`DEFAULT_SCHEMA_NAME`].
///
/// source → lex → parse → resolve → lower → `CompiledModule`
pub fn compile_source(
    source: &str,
    builtins: &BuiltinRegistry,
    limits: Limits,
) -> Result<CompiledModule, CompileError> {
    let schema = parser::parse(lexer::lex(source)?)?;
    let name = schema
        .declared_name
        .clone()
        .unwrap_or_else(|| DEFAULT_SCHEMA_NAME.to_string());
    compiler::compile(
        &[SchemaUnit {
            name,
            resource: None,
            schema,
        }],
        builtins,
        limits,
    )
}

/// Compile a whole corpus into one module. Each schema is registered under
/// its resource's method name, whatever name the source itself declares.
/// Any failure rejects the corpus.
pub fn compile_corpus(
    files: &[SourceFile],
    builtins: &BuiltinRegistry,
    limits: Limits,
) -> Result<CompiledModule, CompileError> {
    let mut units = Vec::with_capacity(files.len());
    for file in files {
        let label = file.id.to_string();
        let schema = parse_unit(&label, &file.text)?;
        tracing::debug!(source = %label, params = schema.params.len(), "parsed schema");
        units.push(SchemaUnit {
            name: file.id.method_name(),
            resource: Some(file.id.clone()),
            schema,
        });
    }
    compiler::compile(&units, builtins, limits)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::source::ResourceId;
    use crate::value::Value;
    use error::ErrorKind;
    use std::sync::Arc;

    fn file(path: &str, text: &str) -> SourceFile {
        SourceFile {
            id: ResourceId::new("demo", path),
            text: text.to_string(),
        }
    }

    #[test]
    fn corpus_schemas_call_each_other_by_resource_name() {
        let files = [
            file("math/double", "schema(n number) -> number { n * 2 }"),
            file("main", "schema(n number) -> number { math_double(n) + 1 }"),
        ];
        let module =
            Arc::new(compile_corpus(&files, &BuiltinRegistry::standard(), Limits::default()).unwrap());
        let main = module
            .function_by_resource(&ResourceId::new("demo", "main"))
            .unwrap();
        assert_eq!(main.invoke(&[Value::Number(5.0)]).unwrap(), Some(Value::Number(11.0)));
        assert!(module.function("math_double").is_some());
    }

    #[test]
    fn one_bad_unit_rejects_the_corpus() {
        let files = [
            file("good", "schema() -> number { 1 }"),
            file("bad", "schema() -> number { nope() }"),
        ];
        let err = compile_corpus(&files, &BuiltinRegistry::standard(), Limits::default())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedCall);
        assert_eq!(err.source_id.as_deref(), Some("demo:bad"));
    }

    #[test]
    fn parse_errors_carry_the_resource() {
        let files = [file("broken", "schema( {")];
        let err = compile_corpus(&files, &BuiltinRegistry::standard(), Limits::default())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.source_id.as_deref(), Some("demo:broken"));
    }

    #[test]
    fn declared_name_is_used_for_standalone_source() {
        let module = Arc::new(
            compile_source(
                "schema hello() -> string { 'hi' }",
                &BuiltinRegistry::standard(),
                Limits::default(),
            )
            .unwrap(),
        );
        assert!(module.function("hello").is_some());
        assert!(module.function(DEFAULT_SCHEMA_NAME).is_none());
    }
}
