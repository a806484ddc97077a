//! Compiler core for an event-scripting language: lexer, parser, late-bound
//! call resolution, lowering to a bytecode module, the runtime value model
//! and its binary codec, and a reload manager that swaps modules atomically.

pub mod config;
pub mod dsl;
pub mod error;
pub mod manager;
pub mod source;
pub mod value;

pub use dsl::builtins::BuiltinRegistry;
pub use dsl::compiler::CompiledModule;
pub use dsl::vm::{Callable, Limits};
pub use error::{Error, Result};
pub use manager::ScriptManager;
pub use value::Value;
