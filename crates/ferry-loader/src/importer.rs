//! Pluggable importers.
//!
//! An [`Importer`] adapts one host mechanism to a uniform contract: a
//! blocking entry point taking an optional completion, and an asynchronous
//! entry point returning a future. Futures returned by `import_async` are
//! lazy; nothing happens until they are polled.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ImportError, ImportResult};
use crate::host::{BlockingLoad, ModuleImport, Provider};
use crate::queue::{Completion, QueueConfig, QueueEngine};

/// Which host mechanism an importer drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImporterKind {
    Worker,
    ModuleSystem,
    Queue,
}

impl fmt::Display for ImporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImporterKind::Worker => f.write_str("worker"),
            ImporterKind::ModuleSystem => f.write_str("module"),
            ImporterKind::Queue => f.write_str("queue"),
        }
    }
}

/// Strategy for bringing a resource into the runtime.
pub trait Importer: Send + Sync {
    /// Host mechanism behind this importer
    fn kind(&self) -> ImporterKind;

    /// Whether imports settle after `import_script` returns
    fn is_async(&self) -> bool;

    /// Start importing `url`, calling `on_done` when it settles.
    ///
    /// Blocking importers settle before returning and return the outcome.
    /// Asynchronous importers return `Ok` once the import was issued.
    fn import_script(&self, url: &str, on_done: Option<Completion>) -> ImportResult;

    /// Future settling when `url` was imported.
    fn import_async(&self, url: &str) -> BoxFuture<'static, ImportResult>;
}

/// Build the importer for a selected provider.
///
/// The queue engine is spawned here, so this must run inside a Tokio runtime
/// when the provider is [`Provider::Queue`].
pub fn from_provider(provider: Provider, queue: QueueConfig) -> Arc<dyn Importer> {
    match provider {
        Provider::Worker(loader) => Arc::new(WorkerImporter::new(loader)),
        Provider::ModuleSystem(modules) => Arc::new(ModuleImporter::new(modules)),
        Provider::Queue {
            injector, prefetch, ..
        } => Arc::new(QueueImporter::new(QueueEngine::new(injector, prefetch, queue))),
    }
}

/// Importer over a blocking load primitive.
pub struct WorkerImporter {
    loader: Arc<dyn BlockingLoad>,
}

impl WorkerImporter {
    pub fn new(loader: Arc<dyn BlockingLoad>) -> Self {
        Self { loader }
    }
}

impl Importer for WorkerImporter {
    fn kind(&self) -> ImporterKind {
        ImporterKind::Worker
    }

    fn is_async(&self) -> bool {
        false
    }

    fn import_script(&self, url: &str, on_done: Option<Completion>) -> ImportResult {
        let result = self.loader.load(url);
        if let Some(on_done) = on_done {
            on_done(result.clone());
        }
        result
    }

    fn import_async(&self, url: &str) -> BoxFuture<'static, ImportResult> {
        let loader = self.loader.clone();
        let url = url.to_string();
        async move { loader.load(&url) }.boxed()
    }
}

/// Importer over a native module system.
pub struct ModuleImporter {
    modules: Arc<dyn ModuleImport>,
}

impl ModuleImporter {
    pub fn new(modules: Arc<dyn ModuleImport>) -> Self {
        Self { modules }
    }
}

impl Importer for ModuleImporter {
    fn kind(&self) -> ImporterKind {
        ImporterKind::ModuleSystem
    }

    fn is_async(&self) -> bool {
        true
    }

    fn import_script(&self, url: &str, on_done: Option<Completion>) -> ImportResult {
        let import = self.import_async(url);
        tokio::spawn(async move {
            let result = import.await;
            if let Some(on_done) = on_done {
                on_done(result);
            }
        });
        Ok(())
    }

    fn import_async(&self, url: &str) -> BoxFuture<'static, ImportResult> {
        let modules = self.modules.clone();
        let url = url.to_string();
        async move { modules.import(&url).await }.boxed()
    }
}

/// Importer feeding the two-phase queue engine.
#[derive(Clone)]
pub struct QueueImporter {
    engine: QueueEngine,
}

impl QueueImporter {
    pub fn new(engine: QueueEngine) -> Self {
        Self { engine }
    }

    /// The underlying engine
    pub fn engine(&self) -> &QueueEngine {
        &self.engine
    }
}

impl Importer for QueueImporter {
    fn kind(&self) -> ImporterKind {
        ImporterKind::Queue
    }

    fn is_async(&self) -> bool {
        true
    }

    fn import_script(&self, url: &str, on_done: Option<Completion>) -> ImportResult {
        if self.engine.state(url).is_some() {
            debug!(url, "already queued");
            if let Some(on_done) = on_done {
                on_done(Ok(()));
            }
            return Ok(());
        }
        self.engine.load(Some(url), true, on_done);
        Ok(())
    }

    fn import_async(&self, url: &str) -> BoxFuture<'static, ImportResult> {
        let engine = self.engine.clone();
        let url = url.to_string();
        async move {
            let (tx, rx) = oneshot::channel();
            let queued = engine.load(
                Some(&url),
                true,
                Some(Box::new(move |result| {
                    let _ = tx.send(result);
                })),
            );
            if !queued {
                debug!(url = url.as_str(), "already queued");
                return Ok(());
            }
            rx.await
                .unwrap_or_else(|_| Err(ImportError::interrupted(url)))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ScriptInjector;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingLoader {
        calls: AtomicUsize,
    }

    impl BlockingLoad for CountingLoader {
        fn load(&self, url: &str) -> ImportResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.ends_with("missing.js") {
                Err(ImportError::failed(url, "not found"))
            } else {
                Ok(())
            }
        }
    }

    struct Modules;

    impl ModuleImport for Modules {
        fn import(&self, url: &str) -> BoxFuture<'static, ImportResult> {
            let url = url.to_string();
            async move {
                tokio::task::yield_now().await;
                if url.ends_with("broken.js") {
                    Err(ImportError::failed(url, "syntax error"))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }
    }

    #[derive(Default)]
    struct Injector {
        trace: Mutex<Vec<String>>,
    }

    impl ScriptInjector for Injector {
        fn inject(&self, url: &str) -> BoxFuture<'static, ImportResult> {
            self.trace.lock().push(url.to_string());
            futures_util::future::ready(Ok(())).boxed()
        }
    }

    #[test]
    fn test_worker_import_script_runs_callback() {
        let loader = Arc::new(CountingLoader::default());
        let importer = WorkerImporter::new(loader.clone());
        let seen = Arc::new(Mutex::new(None));

        let slot = seen.clone();
        let result = importer.import_script(
            "/missing.js",
            Some(Box::new(move |result| *slot.lock() = Some(result))),
        );

        assert!(result.is_err());
        assert_eq!(*seen.lock(), Some(result));
        assert!(!importer.is_async());
        assert_eq!(importer.kind(), ImporterKind::Worker);
    }

    #[tokio::test]
    async fn test_worker_import_async_is_lazy() {
        let loader = Arc::new(CountingLoader::default());
        let importer = WorkerImporter::new(loader.clone());

        let import = importer.import_async("/a.js");
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
        assert!(import.await.is_ok());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_module_import_script_reports_through_callback() {
        let importer = ModuleImporter::new(Arc::new(Modules));
        let (tx, rx) = oneshot::channel();

        let issued = importer.import_script(
            "/broken.js",
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        );

        assert!(issued.is_ok());
        assert!(matches!(rx.await.unwrap(), Err(ImportError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_queue_import_async_settles_after_execution() {
        let injector = Arc::new(Injector::default());
        let engine = QueueEngine::new(injector.clone(), None, QueueConfig::default());
        let importer = QueueImporter::new(engine);

        importer.import_async("/one.js").await.unwrap();
        assert_eq!(*injector.trace.lock(), vec!["/one.js"]);
        assert!(importer.engine().is_executed("/one.js"));
    }

    #[tokio::test]
    async fn test_queue_duplicate_resolves_ok() {
        let injector = Arc::new(Injector::default());
        let engine = QueueEngine::new(injector.clone(), None, QueueConfig::default());
        let importer = QueueImporter::new(engine);

        importer.import_async("/one.js").await.unwrap();
        importer.import_async("/one.js").await.unwrap();

        let (tx, rx) = oneshot::channel();
        importer
            .import_script(
                "/one.js",
                Some(Box::new(move |result| {
                    let _ = tx.send(result);
                })),
            )
            .unwrap();
        assert!(rx.await.unwrap().is_ok());
        assert_eq!(injector.trace.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_from_provider() {
        let worker = from_provider(
            Provider::Worker(Arc::new(CountingLoader::default())),
            QueueConfig::default(),
        );
        assert_eq!(worker.kind(), ImporterKind::Worker);

        let queue = from_provider(
            Provider::Queue {
                injector: Arc::new(Injector::default()),
                prefetch: None,
                runtime_script: None,
            },
            QueueConfig::default(),
        );
        assert_eq!(queue.kind(), ImporterKind::Queue);
        assert!(queue.is_async());
    }
}
