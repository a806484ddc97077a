use std::fs;
use std::io::Write;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dsl::vm::Limits;

const CONFIG_VERSION: u32 = 1;

/// Ceiling on `max_call_depth`. Each script call nests a native VM frame.
pub const MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config version {found} (expected at most {CONFIG_VERSION})")]
    Version { found: u32 },
}

// ── Script config ────────────────────────────────────────────────

/// Loader and runtime settings, stored as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ScriptConfig {
    pub version: u32,
    /// Directory under each namespace that holds script sources.
    pub source_root: String,
    /// Source file extension, without the dot.
    pub extension: String,
    /// Deepest schema-to-schema call chain before execution aborts.
    /// Values above [`MAX_CALL_DEPTH`] are clamped.
    pub max_call_depth: usize,
    /// Operand stack slots per call frame.
    pub max_stack: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            version: CONFIG_VERSION,
            source_root: "engine/dsl".to_string(),
            extension: "aka".to_string(),
            max_call_depth: limits.max_call_depth,
            max_stack: limits.max_stack,
        }
    }
}

impl ScriptConfig {
    #[must_use]
    pub fn limits(&self) -> Limits {
        Limits {
            max_call_depth: self.max_call_depth.min(MAX_CALL_DEPTH),
            max_stack: self.max_stack,
        }
    }
}

/// JSON schema of [`ScriptConfig`], for editor tooling.
pub fn config_schema() -> Result<String, ConfigError> {
    let schema = schemars::schema_for!(ScriptConfig);
    Ok(serde_json::to_string_pretty(&schema)?)
}

/// Load the config at `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<ScriptConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ScriptConfig::default());
    }
    let data = fs::read_to_string(path)?;
    let config: ScriptConfig = serde_json::from_str(&data)?;
    if config.version > CONFIG_VERSION {
        return Err(ConfigError::Version {
            found: config.version,
        });
    }
    Ok(config)
}

/// Save the config as pretty JSON, through a `.tmp` sibling and a rename.
pub fn save_config(path: &Path, config: &ScriptConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, path)?;
    Ok(())
}
