//! Host primitives and import provider selection.
//!
//! A host exposes some subset of these loading mechanisms:
//!
//! - [`BlockingLoad`]: load and execute a resource before returning
//!   (worker-style contexts)
//! - [`ModuleImport`]: a native module system that settles a future
//! - [`ScriptInjector`]: append an executable unit and settle when it ran
//! - [`Prefetch`]: a best-effort probe that warms caches without executing
//!
//! [`HostEnvironment`] collects what the host offers and lists the usable
//! [`Provider`]s in priority order: worker, module system, queue engine.

use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

use crate::error::ImportResult;
use crate::importer::ImporterKind;

/// Blocking "load and execute" primitive.
pub trait BlockingLoad: Send + Sync {
    /// Load and execute `url`; returns once the side effect happened.
    fn load(&self, url: &str) -> ImportResult;
}

/// Native asynchronous module system.
pub trait ModuleImport: Send + Sync {
    /// Import `url`, settling once the module ran or failed.
    fn import(&self, url: &str) -> BoxFuture<'static, ImportResult>;

    /// Whether the module system can be used right now.
    ///
    /// Hosts whose module system is provided by a loader installer report
    /// `false` until that installer ran.
    fn is_available(&self) -> bool {
        true
    }
}

/// Script injection: performs the real side effect of a resource.
pub trait ScriptInjector: Send + Sync {
    /// Inject `url`, settling once it executed or failed.
    fn inject(&self, url: &str) -> BoxFuture<'static, ImportResult>;
}

/// Non-executing warm-up fetch.
pub trait Prefetch: Send + Sync {
    /// Probe `url`; either outcome only means "fetch finished".
    fn probe(&self, url: &str) -> BoxFuture<'static, ImportResult>;
}

/// Import mechanism candidates, in the order they are tried.
#[derive(Clone)]
pub enum Provider {
    /// Blocking loader of a worker-like context
    Worker(Arc<dyn BlockingLoad>),
    /// Native module system
    ModuleSystem(Arc<dyn ModuleImport>),
    /// Two-phase queue engine over script injection
    Queue {
        injector: Arc<dyn ScriptInjector>,
        prefetch: Option<Arc<dyn Prefetch>>,
        /// Runtime script to execute before the engine is used
        runtime_script: Option<String>,
    },
}

impl Provider {
    /// Importer kind this provider produces
    pub fn kind(&self) -> ImporterKind {
        match self {
            Provider::Worker(_) => ImporterKind::Worker,
            Provider::ModuleSystem(_) => ImporterKind::ModuleSystem,
            Provider::Queue { .. } => ImporterKind::Queue,
        }
    }

    /// Whether the provider can be selected now
    pub fn is_available(&self) -> bool {
        match self {
            Provider::ModuleSystem(modules) => modules.is_available(),
            Provider::Worker(_) | Provider::Queue { .. } => true,
        }
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Provider({})", self.kind())
    }
}

/// Loading mechanisms offered by the host.
///
/// # Example
///
/// ```
/// use ferry_loader::HostEnvironment;
///
/// let host = HostEnvironment::new();
/// assert!(host.providers().is_empty());
/// assert!(host.select().is_none());
/// ```
#[derive(Clone, Default)]
pub struct HostEnvironment {
    worker: Option<Arc<dyn BlockingLoad>>,
    module_system: Option<Arc<dyn ModuleImport>>,
    injector: Option<Arc<dyn ScriptInjector>>,
    prefetch: Option<Arc<dyn Prefetch>>,
    queue_runtime: Option<String>,
}

impl HostEnvironment {
    /// Create an environment offering nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a worker-like context with a blocking loader.
    pub fn with_worker(mut self, loader: Arc<dyn BlockingLoad>) -> Self {
        self.worker = Some(loader);
        self
    }

    /// Declare a native module system.
    pub fn with_module_system(mut self, modules: Arc<dyn ModuleImport>) -> Self {
        self.module_system = Some(modules);
        self
    }

    /// Declare script injection.
    pub fn with_injector(mut self, injector: Arc<dyn ScriptInjector>) -> Self {
        self.injector = Some(injector);
        self
    }

    /// Declare a preload probe for the queue engine.
    pub fn with_prefetch(mut self, prefetch: Arc<dyn Prefetch>) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    /// Name of the runtime script executed before the queue engine is used.
    ///
    /// Resolved in the `loader` bucket.
    pub fn with_queue_runtime(mut self, script: impl Into<String>) -> Self {
        self.queue_runtime = Some(script.into());
        self
    }

    /// Blocking loader, if this is a worker-like context
    pub fn worker(&self) -> Option<&Arc<dyn BlockingLoad>> {
        self.worker.as_ref()
    }

    /// Script injector, if any
    pub fn injector(&self) -> Option<&Arc<dyn ScriptInjector>> {
        self.injector.as_ref()
    }

    /// Every provider the host can back, highest priority first.
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers = Vec::new();
        if let Some(worker) = &self.worker {
            providers.push(Provider::Worker(worker.clone()));
        }
        if let Some(modules) = &self.module_system {
            providers.push(Provider::ModuleSystem(modules.clone()));
        }
        if let Some(injector) = &self.injector {
            providers.push(Provider::Queue {
                injector: injector.clone(),
                prefetch: self.prefetch.clone(),
                runtime_script: self.queue_runtime.clone(),
            });
        }
        providers
    }

    /// First available provider.
    pub fn select(&self) -> Option<Provider> {
        self.providers()
            .into_iter()
            .find(|provider| provider.is_available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Blocking;

    impl BlockingLoad for Blocking {
        fn load(&self, _url: &str) -> ImportResult {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Modules {
        installed: AtomicBool,
    }

    impl ModuleImport for Modules {
        fn import(&self, _url: &str) -> BoxFuture<'static, ImportResult> {
            futures_util::future::ready(Ok(())).boxed()
        }

        fn is_available(&self) -> bool {
            self.installed.load(Ordering::SeqCst)
        }
    }

    struct Injector;

    impl ScriptInjector for Injector {
        fn inject(&self, _url: &str) -> BoxFuture<'static, ImportResult> {
            futures_util::future::ready(Ok(())).boxed()
        }
    }

    #[test]
    fn test_worker_has_priority() {
        let host = HostEnvironment::new()
            .with_injector(Arc::new(Injector))
            .with_module_system(Arc::new(Modules::default()))
            .with_worker(Arc::new(Blocking));

        let kinds: Vec<_> = host.providers().iter().map(Provider::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ImporterKind::Worker,
                ImporterKind::ModuleSystem,
                ImporterKind::Queue
            ]
        );
        assert_eq!(host.select().map(|p| p.kind()), Some(ImporterKind::Worker));
    }

    #[test]
    fn test_unavailable_module_system_falls_back_to_queue() {
        let modules = Arc::new(Modules::default());
        let host = HostEnvironment::new()
            .with_module_system(modules.clone())
            .with_injector(Arc::new(Injector));

        assert_eq!(host.select().map(|p| p.kind()), Some(ImporterKind::Queue));

        modules.installed.store(true, Ordering::SeqCst);
        assert_eq!(
            host.select().map(|p| p.kind()),
            Some(ImporterKind::ModuleSystem)
        );
    }

    #[test]
    fn test_queue_provider_carries_runtime_script() {
        let host = HostEnvironment::new()
            .with_injector(Arc::new(Injector))
            .with_queue_runtime("queue.js");

        match host.select() {
            Some(Provider::Queue {
                runtime_script,
                prefetch,
                ..
            }) => {
                assert_eq!(runtime_script.as_deref(), Some("queue.js"));
                assert!(prefetch.is_none());
            }
            other => panic!("unexpected provider: {other:?}"),
        }
    }
}
