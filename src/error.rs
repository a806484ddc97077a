use crate::config::ConfigError;
use crate::dsl::error::CompileError;
use crate::dsl::vm::RuntimeError;
use crate::manager::ReloadError;
use crate::source::SourceError;
use crate::value::codec::CodecError;

/// Any failure the crate can report, for callers that do not care which
/// layer it came from.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Reload(#[from] ReloadError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no schema named `{0}`")]
    UnknownSchema(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
