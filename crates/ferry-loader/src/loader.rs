//! Loader façade and bootstrap orchestrator
//!
//! [`Loader`] ties together the path table, the import registry and the
//! selected [`Importer`]. It is an explicit context object: create it once
//! per host, share it as `Arc<Loader>`, and hand it to whatever needs to
//! request resources.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Level, debug, info};

use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use crate::error::{BootStage, BoxError, ImportError, ImportResult, LoaderError, LoaderResult};
use crate::host::{HostEnvironment, Provider};
use crate::importer::{self, Importer, ImporterKind};
use crate::paths::{BUCKET_LOADER, BUCKET_SCRIPTS, PathConfig};
use crate::queue::QueueConfig;
use crate::registry::{ImportHandle, LoadRegistry};

/// User bootstrap callback, run between the two import batches.
pub type Bootstrap =
    Box<dyn FnOnce(Arc<Loader>, Value) -> BoxFuture<'static, Result<Value, BoxError>> + Send>;

/// Serializable bootstrap settings, as read from a config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootSettings {
    /// Path buckets
    pub paths: PathConfig,

    /// Script providing a module system, executed before importer selection
    pub loader_installer: Option<String>,

    /// Imports awaited before the bootstrap callback
    pub before_boot: Vec<String>,

    /// Imports awaited after the bootstrap callback
    pub after_boot: Vec<String>,

    /// Parameter handed to the bootstrap callback
    pub boot_param: Value,

    /// Queue engine knobs
    pub queue: QueueConfig,
}

/// Bootstrap configuration.
///
/// Every part is optional; an empty config still normalizes the paths and
/// selects an importer.
#[derive(Default)]
pub struct BootConfig {
    pub paths: Option<PathConfig>,
    pub loader_installer: Option<String>,
    pub before_boot: Vec<String>,
    pub bootstrap: Option<Bootstrap>,
    pub boot_param: Value,
    pub after_boot: Vec<String>,
    pub queue: QueueConfig,
}

impl BootConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(mut self, paths: PathConfig) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn loader_installer(mut self, name: impl Into<String>) -> Self {
        self.loader_installer = Some(name.into());
        self
    }

    pub fn before_boot<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.before_boot.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn after_boot<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after_boot.extend(names.into_iter().map(Into::into));
        self
    }

    /// Set the bootstrap callback.
    pub fn bootstrap<F, Fut>(mut self, callback: F) -> Self
    where
        F: FnOnce(Arc<Loader>, Value) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.bootstrap = Some(Box::new(move |loader, param| callback(loader, param).boxed()));
        self
    }

    pub fn boot_param(mut self, param: Value) -> Self {
        self.boot_param = param;
        self
    }

    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }
}

impl From<BootSettings> for BootConfig {
    fn from(settings: BootSettings) -> Self {
        Self {
            paths: Some(settings.paths),
            loader_installer: settings.loader_installer,
            before_boot: settings.before_boot,
            bootstrap: None,
            boot_param: settings.boot_param,
            after_boot: settings.after_boot,
            queue: settings.queue,
        }
    }
}

impl fmt::Debug for BootConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootConfig")
            .field("paths", &self.paths)
            .field("loader_installer", &self.loader_installer)
            .field("before_boot", &self.before_boot)
            .field("bootstrap", &self.bootstrap.is_some())
            .field("boot_param", &self.boot_param)
            .field("after_boot", &self.after_boot)
            .field("queue", &self.queue)
            .finish()
    }
}

/// Dependency-aware resource loader
pub struct Loader {
    host: HostEnvironment,
    paths: RwLock<PathConfig>,
    registry: Arc<LoadRegistry>,
    importer: RwLock<Option<Arc<dyn Importer>>>,
    bootstrapping: AtomicBool,
    diagnostics: Arc<dyn Diagnostics>,
}

impl Loader {
    /// Create a loader reporting through `tracing`.
    pub fn new(host: HostEnvironment) -> Arc<Self> {
        Self::with_diagnostics(host, Arc::new(TracingDiagnostics))
    }

    /// Create a loader with a custom diagnostics sink.
    pub fn with_diagnostics(host: HostEnvironment, diagnostics: Arc<dyn Diagnostics>) -> Arc<Self> {
        Arc::new(Self {
            host,
            paths: RwLock::new(PathConfig::default().configured()),
            registry: Arc::new(LoadRegistry::new(diagnostics.clone())),
            importer: RwLock::new(None),
            bootstrapping: AtomicBool::new(false),
            diagnostics,
        })
    }

    /// Host this loader imports through
    pub fn host(&self) -> &HostEnvironment {
        &self.host
    }

    /// Replace the path table.
    pub fn configure(&self, paths: PathConfig) {
        *self.paths.write() = paths.configured();
    }

    /// Snapshot of the normalized path table
    pub fn paths(&self) -> PathConfig {
        self.paths.read().clone()
    }

    /// Resolve a logical name, warning when its bucket is not configured.
    pub fn resolve_path(&self, name: &str, bucket: Option<&str>) -> String {
        let paths = self.paths.read();
        if let Some(missing) = paths.missing_bucket(name, bucket) {
            self.diagnostics.report(
                Level::WARN,
                &format!("bucket '{missing}' is not configured, resolving '{name}' against the root"),
            );
        }
        paths.resolve(name, bucket)
    }

    pub fn resolve_all<S: AsRef<str>>(&self, names: &[S], bucket: Option<&str>) -> Vec<String> {
        names
            .iter()
            .map(|name| self.resolve_path(name.as_ref(), bucket))
            .collect()
    }

    /// URL of a script in the `scripts` bucket
    pub fn script_url(&self, name: &str) -> String {
        self.resolve_path(name, Some(BUCKET_SCRIPTS))
    }

    pub fn root_path(&self) -> String {
        self.paths.read().root_path().to_string()
    }

    /// Import registry
    pub fn registry(&self) -> &Arc<LoadRegistry> {
        &self.registry
    }

    /// Whether a resolved URL was ever requested
    pub fn is_imported(&self, url: &str) -> bool {
        self.registry.is_imported(url)
    }

    pub fn num_requested(&self) -> usize {
        self.registry.num_requested()
    }

    pub fn num_imported(&self) -> usize {
        self.registry.num_imported()
    }

    /// Settled share of requested imports; 0 when nothing was requested
    pub fn load_progress(&self) -> f64 {
        self.registry.load_progress()
    }

    /// Whether [`init`](Self::init) is running its stages
    pub fn is_bootstrapping(&self) -> bool {
        self.bootstrapping.load(Ordering::SeqCst)
    }

    /// Active importer
    pub fn importer(&self) -> Option<Arc<dyn Importer>> {
        self.importer.read().clone()
    }

    /// Install an importer, bypassing provider selection.
    pub fn set_importer(&self, importer: Arc<dyn Importer>) {
        *self.importer.write() = Some(importer);
    }

    fn active_importer(&self) -> LoaderResult<Arc<dyn Importer>> {
        self.importer().ok_or(LoaderError::NotInitialized)
    }

    /// Pick the first available host provider and install its importer.
    ///
    /// A queue provider with a runtime script executes that script from the
    /// `loader` bucket first.
    pub async fn select_importer(&self, queue: QueueConfig) -> LoaderResult<ImporterKind> {
        let provider = self.host.select().ok_or(LoaderError::NoProvider)?;

        if let Provider::Queue {
            runtime_script: Some(script),
            ..
        } = &provider
        {
            let url = self.resolve_path(script, Some(BUCKET_LOADER));
            self.execute_url(&url).await?;
        }

        let importer = importer::from_provider(provider, queue);
        let kind = importer.kind();
        self.set_importer(importer);
        debug!(%kind, "importer selected");
        Ok(kind)
    }

    /// Execute a script directly, bypassing the registry.
    pub async fn execute_async(&self, name: &str) -> LoaderResult<()> {
        let url = self.resolve_path(name, None);
        self.execute_url(&url).await
    }

    async fn execute_url(&self, url: &str) -> LoaderResult<()> {
        if let Some(injector) = self.host.injector() {
            injector.inject(url).await?;
        } else if let Some(worker) = self.host.worker() {
            worker.load(url)?;
        } else {
            return Err(LoaderError::CannotExecute(url.to_string()));
        }
        debug!(url, "executed");
        Ok(())
    }

    /// Fire-and-forget import of several names.
    ///
    /// A blocking importer imports them before returning, so nested calls
    /// from inside a resource extend the caller's import chain. An async
    /// importer issues the requests in the background.
    pub fn imports<S: AsRef<str>>(&self, names: &[S]) -> LoaderResult<()> {
        let importer = self.active_importer()?;

        for name in names {
            let url = self.resolve_path(name.as_ref(), None);

            if self.registry.is_failed(&url) {
                self.diagnostics
                    .report(Level::WARN, &format!("'{url}' already failed"));
                continue;
            }

            if importer.is_async() {
                if !self.is_bootstrapping() && !self.registry.is_imported(&url) {
                    self.diagnostics.report(
                        Level::WARN,
                        &format!("'{url}' is loaded asynchronously, add it to the bootstrap"),
                    );
                }
                drop(self.registry.request(&url, &importer));
            } else {
                self.registry.request_blocking(&url, importer.as_ref())?;
            }
        }
        Ok(())
    }

    /// Request one resource; the handle settles when it was imported.
    pub fn import_async(&self, name: &str) -> LoaderResult<ImportHandle> {
        let importer = self.active_importer()?;
        let url = self.resolve_path(name, None);
        Ok(self.registry.request(&url, &importer))
    }

    /// Request several resources and wait for all of them.
    pub async fn import_all<S: AsRef<str>>(&self, names: &[S]) -> LoaderResult<Vec<ImportResult>> {
        let handles = names
            .iter()
            .map(|name| self.import_async(name.as_ref()))
            .collect::<LoaderResult<Vec<_>>>()?;
        Ok(join_all(handles).await)
    }

    /// Run the bootstrap stages and return the callback's output.
    pub async fn init(self: &Arc<Self>, config: BootConfig) -> LoaderResult<Value> {
        let BootConfig {
            paths,
            loader_installer,
            before_boot,
            bootstrap,
            boot_param,
            after_boot,
            queue,
        } = config;

        match paths {
            Some(paths) => self.configure(paths),
            None => self.paths.write().configure(),
        }

        if let Some(installer) = loader_installer {
            self.execute_async(&installer).await?;
        }

        let kind = match self.importer() {
            Some(importer) => importer.kind(),
            None => self.select_importer(queue).await?,
        };

        info!(%kind, "bootstrap started");
        self.bootstrapping.store(true, Ordering::SeqCst);
        let result = self
            .run_stages(&before_boot, bootstrap, boot_param, &after_boot)
            .await;
        self.bootstrapping.store(false, Ordering::SeqCst);

        match &result {
            Ok(_) => info!(
                requested = self.num_requested(),
                imported = self.num_imported(),
                "bootstrap finished"
            ),
            Err(err) => self
                .diagnostics
                .report(Level::ERROR, &format!("bootstrap failed: {err}")),
        }
        result
    }

    /// Bootstrap importing `names` after boot, up to the first empty name.
    pub async fn boot<S: AsRef<str>>(self: &Arc<Self>, names: &[S]) -> LoaderResult<Value> {
        let names = names
            .iter()
            .map(|name| name.as_ref())
            .take_while(|name| !name.is_empty());
        self.init(BootConfig::new().after_boot(names)).await
    }

    async fn run_stages(
        self: &Arc<Self>,
        before_boot: &[String],
        bootstrap: Option<Bootstrap>,
        boot_param: Value,
        after_boot: &[String],
    ) -> LoaderResult<Value> {
        self.run_batch(BootStage::BeforeBoot, before_boot).await?;

        let output = match bootstrap {
            Some(callback) => callback(self.clone(), boot_param)
                .await
                .map_err(LoaderError::Bootstrap)?,
            None => Value::Null,
        };

        self.run_batch(BootStage::AfterBoot, after_boot).await?;
        Ok(output)
    }

    /// Fan out one batch and wait until every import settled.
    async fn run_batch(&self, stage: BootStage, names: &[String]) -> LoaderResult<()> {
        if names.is_empty() {
            return Ok(());
        }
        debug!(%stage, count = names.len(), "importing batch");

        let results = self.import_all(names).await?;
        let total = results.len();
        let failures: Vec<ImportError> = results.into_iter().filter_map(Result::err).collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(LoaderError::Batch {
                stage,
                total,
                failures,
            })
        }
    }
}

/// Create a loader for `host` and run the bootstrap stages.
pub async fn init(host: HostEnvironment, config: BootConfig) -> LoaderResult<Arc<Loader>> {
    let loader = Loader::new(host);
    loader.init(config).await?;
    Ok(loader)
}
