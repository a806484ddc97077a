//! Where script sources come from.
//!
//! A source is addressed by a [`ResourceId`] (`namespace:path`, path relative
//! to the namespace's source root with the extension stripped). Providers hand
//! back the whole corpus at once; the reload manager compiles it as one unit.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::ScriptConfig;
use crate::dsl::resolver::mangle;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid resource id `{0}` (expected namespace:path)")]
    InvalidId(String),
    #[error("source file {0} is not valid UTF-8 or has a non UTF-8 path")]
    Encoding(PathBuf),
}

// ── Resource ids ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub path: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            path: path.into(),
        }
    }

    /// Name the schema for this resource is registered under.
    pub fn method_name(&self) -> String {
        mangle(&self.path)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

impl FromStr for ResourceId {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((ns, path)) if !ns.is_empty() && !path.is_empty() => Ok(Self::new(ns, path)),
            _ => Err(SourceError::InvalidId(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: ResourceId,
    pub text: String,
}

/// Supplies the full set of script sources for one reload.
pub trait SourceProvider: Send + Sync {
    fn load(&self) -> Result<Vec<SourceFile>, SourceError>;
}

// ── In-memory ────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    files: BTreeMap<ResourceId, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ResourceId, text: impl Into<String>) -> Option<String> {
        self.files.insert(id, text.into())
    }

    #[must_use]
    pub fn with(mut self, id: ResourceId, text: impl Into<String>) -> Self {
        self.insert(id, text);
        self
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<String> {
        self.files.remove(id)
    }
}

impl SourceProvider for MemorySource {
    fn load(&self) -> Result<Vec<SourceFile>, SourceError> {
        Ok(self
            .files
            .iter()
            .map(|(id, text)| SourceFile {
                id: id.clone(),
                text: text.clone(),
            })
            .collect())
    }
}

// ── Directory tree ───────────────────────────────────────────────

/// Reads `<root>/<namespace>/<source_root>/**/*.<extension>`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    source_root: PathBuf,
    extension: String,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, config: &ScriptConfig) -> Self {
        Self {
            root: root.into(),
            source_root: PathBuf::from(&config.source_root),
            extension: config.extension.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collect(
        &self,
        namespace: &str,
        base: &Path,
        dir: &Path,
        out: &mut Vec<SourceFile>,
    ) -> Result<(), SourceError> {
        for path in sorted_entries(dir)? {
            if path.is_dir() {
                self.collect(namespace, base, &path, out)?;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            let relative = path
                .strip_prefix(base)
                .map_err(|_| SourceError::Encoding(path.clone()))?
                .with_extension("");
            let mut parts = Vec::new();
            for component in relative.components() {
                let part = component
                    .as_os_str()
                    .to_str()
                    .ok_or_else(|| SourceError::Encoding(path.clone()))?;
                parts.push(part);
            }
            let text = fs::read_to_string(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::InvalidData => SourceError::Encoding(path.clone()),
                _ => SourceError::Io {
                    path: path.clone(),
                    source: e,
                },
            })?;
            let id = ResourceId::new(namespace, parts.join("/"));
            tracing::trace!(%id, "found source");
            out.push(SourceFile { id, text });
        }
        Ok(())
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let io_err = |source| SourceError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        entries.push(entry.map_err(io_err)?.path());
    }
    entries.sort();
    Ok(entries)
}

impl SourceProvider for DirectorySource {
    fn load(&self) -> Result<Vec<SourceFile>, SourceError> {
        let mut out = Vec::new();
        for ns_dir in sorted_entries(&self.root)? {
            if !ns_dir.is_dir() {
                continue;
            }
            let Some(namespace) = ns_dir.file_name().and_then(|n| n.to_str()) else {
                return Err(SourceError::Encoding(ns_dir.clone()));
            };
            let base = ns_dir.join(&self.source_root);
            if !base.is_dir() {
                continue;
            }
            self.collect(namespace, &base, &base, &mut out)?;
        }
        tracing::debug!(root = %self.root.display(), files = out.len(), "loaded sources");
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_parse_and_display() {
        let id: ResourceId = "demo:events/on_spawn".parse().unwrap();
        assert_eq!(id.namespace, "demo");
        assert_eq!(id.path, "events/on_spawn");
        assert_eq!(id.to_string(), "demo:events/on_spawn");
        assert_eq!(id.method_name(), "events_on_spawn");

        assert!("no_namespace".parse::<ResourceId>().is_err());
        assert!(":path".parse::<ResourceId>().is_err());
    }

    #[test]
    fn test_memory_source_is_sorted() {
        let source = MemorySource::new()
            .with(ResourceId::new("b", "x"), "schema() { }")
            .with(ResourceId::new("a", "y"), "schema() { }");
        let files = source.load().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].id, ResourceId::new("a", "y"));
    }

    #[test]
    fn test_directory_source_walks_namespaces() {
        let dir = std::env::temp_dir().join("aka_script_test_sources");
        let _ = fs::remove_dir_all(&dir);
        let scripts = dir.join("demo/engine/dsl");
        fs::create_dir_all(scripts.join("events")).unwrap();
        fs::create_dir_all(dir.join("other")).unwrap();
        fs::write(scripts.join("main.aka"), "schema() { }").unwrap();
        fs::write(scripts.join("events/on_hit.aka"), "schema() { }").unwrap();
        fs::write(scripts.join("notes.txt"), "ignored").unwrap();

        let source = DirectorySource::new(&dir, &ScriptConfig::default());
        let files = source.load().unwrap();
        let ids: Vec<String> = files.iter().map(|f| f.id.to_string()).collect();
        assert_eq!(ids, vec!["demo:events/on_hit", "demo:main"]);
        assert_eq!(files[1].text, "schema() { }");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_directory_source_missing_root() {
        let dir = std::env::temp_dir().join("aka_script_test_sources_missing");
        let _ = fs::remove_dir_all(&dir);
        let source = DirectorySource::new(&dir, &ScriptConfig::default());
        assert!(matches!(source.load(), Err(SourceError::Io { .. })));
    }
}
