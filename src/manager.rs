//! Reload orchestration.
//!
//! The manager owns the live [`CompiledModule`]. A reload compiles the whole
//! corpus off the async runtime and swaps the new module in with one write;
//! a failed reload leaves the previous module installed. Reloads are
//! single-flight: the async path queues behind the one in progress, the
//! blocking path refuses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::config::ScriptConfig;
use crate::dsl::builtins::BuiltinRegistry;
use crate::dsl::compiler::CompiledModule;
use crate::dsl::error::CompileError;
use crate::dsl::vm::Callable;
use crate::dsl::compile_corpus;
use crate::source::{ResourceId, SourceError, SourceProvider};

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("failed to load sources: {0}")]
    Source(#[from] SourceError),
    #[error("compile failed: {0}")]
    Compile(#[from] CompileError),
    #[error("reload task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("another reload is already in progress")]
    InProgress,
}

/// Outcome of a successful reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadReport {
    pub generation: u64,
    pub schemas: usize,
}

pub struct ScriptManager {
    builtins: Arc<BuiltinRegistry>,
    config: ScriptConfig,
    current: RwLock<Arc<CompiledModule>>,
    generation: AtomicU64,
    reload_lock: tokio::sync::Mutex<()>,
}

impl ScriptManager {
    /// Start with an empty module at generation 0.
    pub fn new(builtins: BuiltinRegistry, config: ScriptConfig) -> Self {
        let empty = CompiledModule::empty(config.limits());
        Self {
            builtins: Arc::new(builtins),
            config,
            current: RwLock::new(Arc::new(empty)),
            generation: AtomicU64::new(0),
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn builtins(&self) -> &BuiltinRegistry {
        &self.builtins
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    /// The module currently installed.
    pub fn module(&self) -> Arc<CompiledModule> {
        Arc::clone(&self.current.read())
    }

    /// Number of successful reloads so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn function(&self, name: &str) -> Option<Callable> {
        self.module().function(name)
    }

    pub fn function_by_resource(&self, id: &ResourceId) -> Option<Callable> {
        self.module().function_by_resource(id)
    }

    /// Recompile everything `provider` yields and install it. Waits for any
    /// reload already running.
    pub async fn reload(
        &self,
        provider: Arc<dyn SourceProvider>,
    ) -> Result<ReloadReport, ReloadError> {
        let _guard = self.reload_lock.lock().await;
        let builtins = Arc::clone(&self.builtins);
        let config = self.config.clone();
        let built =
            tokio::task::spawn_blocking(move || build(provider.as_ref(), &builtins, &config))
                .await?;
        self.finish(built)
    }

    /// Synchronous reload for callers outside an async runtime. Fails with
    /// [`ReloadError::InProgress`] instead of waiting.
    pub fn reload_blocking(&self, provider: &dyn SourceProvider) -> Result<ReloadReport, ReloadError> {
        let _guard = self
            .reload_lock
            .try_lock()
            .map_err(|_| ReloadError::InProgress)?;
        let built = build(provider, &self.builtins, &self.config);
        self.finish(built)
    }

    fn finish(&self, built: Result<CompiledModule, ReloadError>) -> Result<ReloadReport, ReloadError> {
        match built {
            Ok(module) => Ok(self.install(module)),
            Err(e) => {
                tracing::warn!(
                    generation = self.generation(),
                    error = %e,
                    "reload failed, keeping previous module"
                );
                Err(e)
            }
        }
    }

    fn install(&self, module: CompiledModule) -> ReloadReport {
        module.static_init();
        let schemas = module.names().count();
        let module = Arc::new(module);
        let generation = {
            let mut current = self.current.write();
            *current = module;
            self.generation.fetch_add(1, Ordering::AcqRel) + 1
        };
        tracing::info!(generation, schemas, "installed script module");
        ReloadReport { generation, schemas }
    }
}

fn build(
    provider: &dyn SourceProvider,
    builtins: &BuiltinRegistry,
    config: &ScriptConfig,
) -> Result<CompiledModule, ReloadError> {
    let started = Instant::now();
    let files = provider.load()?;
    tracing::info!(files = files.len(), "reloading scripts");
    let module = compile_corpus(&files, builtins, config.limits())?;
    tracing::debug!(elapsed_ms = started.elapsed().as_millis(), "corpus compiled");
    Ok(module)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, SourceFile};
    use crate::value::Value;
    use parking_lot::Mutex;
    use std::sync::mpsc;

    fn manager() -> ScriptManager {
        ScriptManager::new(BuiltinRegistry::standard(), ScriptConfig::default())
    }

    fn source(body: &str) -> MemorySource {
        MemorySource::new().with(
            ResourceId::new("demo", "answer"),
            format!("schema() -> number {{ {body} }}"),
        )
    }

    fn answer(manager: &ScriptManager) -> Option<Value> {
        manager.function("answer").unwrap().invoke(&[]).unwrap()
    }

    #[tokio::test]
    async fn test_reload_installs_new_module() {
        let manager = manager();
        assert!(manager.function("answer").is_none());

        let report = manager.reload(Arc::new(source("42"))).await.unwrap();
        assert_eq!(report, ReloadReport { generation: 1, schemas: 1 });
        assert!(manager.module().is_initialized());
        assert_eq!(answer(&manager), Some(Value::Number(42.0)));

        let by_id = manager
            .function_by_resource(&ResourceId::new("demo", "answer"))
            .unwrap();
        assert_eq!(by_id.name(), "answer");
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_module() {
        let manager = manager();
        manager.reload(Arc::new(source("1"))).await.unwrap();

        let err = manager.reload(Arc::new(source("missing()"))).await.unwrap_err();
        assert!(matches!(err, ReloadError::Compile(_)));
        assert_eq!(manager.generation(), 1);
        assert_eq!(answer(&manager), Some(Value::Number(1.0)));
    }

    #[tokio::test]
    async fn test_old_callable_survives_reload() {
        let manager = manager();
        manager.reload(Arc::new(source("1"))).await.unwrap();
        let old = manager.function("answer").unwrap();

        manager.reload(Arc::new(source("2"))).await.unwrap();
        assert_eq!(old.invoke(&[]).unwrap(), Some(Value::Number(1.0)));
        assert_eq!(answer(&manager), Some(Value::Number(2.0)));
        assert!(!Arc::ptr_eq(old.module(), &manager.module()));
    }

    #[test]
    fn test_blocking_reload() {
        let manager = manager();
        manager.reload_blocking(&source("7")).unwrap();
        assert_eq!(answer(&manager), Some(Value::Number(7.0)));
        assert_eq!(manager.generation(), 1);
    }

    /// Provider that parks inside `load` until released.
    struct GatedSource {
        inner: MemorySource,
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl SourceProvider for GatedSource {
        fn load(&self) -> Result<Vec<SourceFile>, SourceError> {
            self.started.lock().send(()).unwrap();
            self.release.lock().recv().unwrap();
            self.inner.load()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reloads_are_single_flight() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gated = Arc::new(GatedSource {
            inner: source("3"),
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });
        let manager = Arc::new(manager());

        let running = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.reload(gated).await }
        });
        tokio::task::spawn_blocking(move || started_rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            manager.reload_blocking(&source("4")),
            Err(ReloadError::InProgress)
        ));
        assert_eq!(manager.generation(), 0);

        release_tx.send(()).unwrap();
        let report = running.await.unwrap().unwrap();
        assert_eq!(report.generation, 1);
        assert_eq!(answer(&manager), Some(Value::Number(3.0)));
    }
}
