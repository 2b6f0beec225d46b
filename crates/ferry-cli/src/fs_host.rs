//! Filesystem host: resources are files under a base directory.
//!
//! "Executing" a resource records it in the trace and then follows every
//! `imports("name")` directive in its source through the loader. Worker and
//! queue hosts fire the directives and move on; the module host waits for
//! them, like static module imports.

use ferry_loader::{
    BlockingLoad, HostEnvironment, ImportError, ImportResult, Loader, ModuleImport, Prefetch,
    ScriptInjector,
};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use crate::config::HostKind;

const DIRECTIVE_PATTERN: &str = r#"imports\s*\(\s*['"]([^'"]+)['"]\s*\)"#;

struct Inner {
    base_dir: PathBuf,
    directive: Regex,
    loader: OnceLock<Weak<Loader>>,
    trace: Mutex<Vec<String>>,
}

/// Host backed by files on disk
#[derive(Clone)]
pub struct FsHost {
    inner: Arc<Inner>,
}

impl FsHost {
    pub fn new(base_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                base_dir: base_dir.into(),
                directive: Regex::new(DIRECTIVE_PATTERN)?,
                loader: OnceLock::new(),
                trace: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Host environment offering the mechanisms of `kind`.
    pub fn environment(&self, kind: HostKind, queue_runtime: Option<&str>) -> HostEnvironment {
        let shared = Arc::new(self.clone());
        match kind {
            HostKind::Worker => HostEnvironment::new().with_worker(shared),
            HostKind::Module => HostEnvironment::new()
                .with_module_system(shared.clone())
                .with_injector(shared),
            HostKind::Queue => {
                let host = HostEnvironment::new()
                    .with_injector(shared.clone())
                    .with_prefetch(shared);
                match queue_runtime {
                    Some(script) => host.with_queue_runtime(script),
                    None => host,
                }
            }
        }
    }

    /// Let executed resources import through `loader`.
    pub fn attach(&self, loader: &Arc<Loader>) {
        let _ = self.inner.loader.set(Arc::downgrade(loader));
    }

    /// Executed URLs in execution order
    pub fn trace(&self) -> Vec<String> {
        self.inner.trace.lock().clone()
    }

    pub fn base_dir(&self) -> &Path {
        &self.inner.base_dir
    }
}

impl Inner {
    fn path_of(&self, url: &str) -> Result<PathBuf, ImportError> {
        if url.contains("://") {
            return Err(ImportError::failed(url, "remote resources are not supported"));
        }
        Ok(self.base_dir.join(url.trim_start_matches('/')))
    }

    fn directives(&self, source: &str) -> Vec<String> {
        self.directive
            .captures_iter(source)
            .map(|cap| cap[1].to_string())
            .collect()
    }

    fn loader(&self) -> Option<Arc<Loader>> {
        self.loader.get().and_then(Weak::upgrade)
    }

    fn record(&self, url: &str) {
        tracing::debug!(url, "executing");
        self.trace.lock().push(url.to_string());
    }

    /// Record `url` and fire its directives without waiting for them.
    fn execute_detached(&self, url: &str, source: &str) -> ImportResult {
        self.record(url);
        let names = self.directives(source);
        if names.is_empty() {
            return Ok(());
        }
        match self.loader() {
            Some(loader) => loader
                .imports(&names)
                .map_err(|err| ImportError::failed(url, err)),
            None => Ok(()),
        }
    }

    async fn read(&self, url: &str) -> Result<String, ImportError> {
        let path = self.path_of(url)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| ImportError::failed(url, format!("{}: {err}", path.display())))
    }
}

impl BlockingLoad for FsHost {
    fn load(&self, url: &str) -> ImportResult {
        let path = self.inner.path_of(url)?;
        let source = std::fs::read_to_string(&path)
            .map_err(|err| ImportError::failed(url, format!("{}: {err}", path.display())))?;
        self.inner.execute_detached(url, &source)
    }
}

impl ScriptInjector for FsHost {
    fn inject(&self, url: &str) -> BoxFuture<'static, ImportResult> {
        let inner = self.inner.clone();
        let url = url.to_string();
        async move {
            let source = inner.read(&url).await?;
            inner.execute_detached(&url, &source)
        }
        .boxed()
    }
}

impl ModuleImport for FsHost {
    fn import(&self, url: &str) -> BoxFuture<'static, ImportResult> {
        let inner = self.inner.clone();
        let url = url.to_string();
        async move {
            let source = inner.read(&url).await?;
            inner.record(&url);

            let Some(loader) = inner.loader() else {
                return Ok(());
            };
            let handles = inner
                .directives(&source)
                .iter()
                .map(|name| loader.import_async(name))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| ImportError::failed(url.as_str(), err))?;
            for result in join_all(handles).await {
                result?;
            }
            Ok(())
        }
        .boxed()
    }
}

impl Prefetch for FsHost {
    fn probe(&self, url: &str) -> BoxFuture<'static, ImportResult> {
        let inner = self.inner.clone();
        let url = url.to_string();
        async move {
            let path = inner.path_of(&url)?;
            tokio::fs::metadata(&path)
                .await
                .map(|_| ())
                .map_err(|err| ImportError::failed(url, err))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_loader::{BootConfig, ImporterKind, PathConfig};
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, source: &str) {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, source).unwrap();
    }

    fn boot_loader(host: &FsHost, kind: HostKind) -> Arc<Loader> {
        let loader = Loader::new(host.environment(kind, None));
        host.attach(&loader);
        loader
    }

    #[test]
    fn test_directives() {
        let host = FsHost::new(".").unwrap();
        let source = r#"
            imports("a.js");
            imports( 'lib/b.js' )
            // importsAll("c.js") is not a directive
        "#;
        assert_eq!(host.inner.directives(source), vec!["a.js", "lib/b.js"]);
    }

    #[test]
    fn test_remote_urls_are_rejected() {
        let host = FsHost::new(".").unwrap();
        assert!(host.load("https://cdn.example.com/x.js").is_err());
    }

    #[tokio::test]
    async fn test_worker_host_runs_nested_imports_inline() {
        let dir = tempdir().unwrap();
        write(dir.path(), "scripts/main.js", r#"imports("util.js"); imports("view.js");"#);
        write(dir.path(), "scripts/util.js", "");
        write(dir.path(), "scripts/view.js", r#"imports("util.js");"#);

        let host = FsHost::new(dir.path()).unwrap();
        let loader = boot_loader(&host, HostKind::Worker);
        loader
            .init(BootConfig::new().after_boot(["main.js"]))
            .await
            .unwrap();

        assert_eq!(
            host.trace(),
            vec!["scripts/main.js", "scripts/util.js", "scripts/view.js"]
        );
        assert_eq!(loader.load_progress(), 1.0);
    }

    #[tokio::test]
    async fn test_module_host_survives_cycles() {
        let dir = tempdir().unwrap();
        write(dir.path(), "app/js/a.js", r#"imports("b.js");"#);
        write(dir.path(), "app/js/b.js", r#"imports("a.js");"#);

        let host = FsHost::new(dir.path()).unwrap();
        let loader = boot_loader(&host, HostKind::Module);
        loader
            .init(
                BootConfig::new()
                    .paths(PathConfig::new("/app").with_bucket("scripts", "js"))
                    .before_boot(["a.js"]),
            )
            .await
            .unwrap();

        assert_eq!(host.trace(), vec!["/app/js/a.js", "/app/js/b.js"]);
        assert_eq!(
            loader.importer().map(|importer| importer.kind()),
            Some(ImporterKind::ModuleSystem)
        );
    }

    #[tokio::test]
    async fn test_queue_host_missing_file_fails_batch() {
        let dir = tempdir().unwrap();
        write(dir.path(), "scripts/present.js", "");

        let host = FsHost::new(dir.path()).unwrap();
        let loader = boot_loader(&host, HostKind::Queue);
        let result = loader
            .init(BootConfig::new().before_boot(["present.js", "missing.js"]))
            .await;

        assert!(result.is_err());
        assert_eq!(host.trace(), vec!["scripts/present.js"]);
        assert!(loader.registry().is_failed("scripts/missing.js"));
    }
}
