//! Import registry: deduplication, cycle detection and progress counters.
//!
//! Every resolved URL is requested at most once. A URL moves through
//! `Pending -> Succeeded | Failed` and never leaves a terminal state, so a
//! failed resource is not retried. Concurrent requests for a pending URL
//! share one [`ImportHandle`].
//!
//! Each import runs with the chain of imports that led to it. A spawned
//! import inherits its requester's chain plus its own URL, and a blocking
//! import extends the chain for the duration of the call. Requesting a URL
//! that is already on the caller's own chain is a circular dependency: it is
//! reported once through the [`Diagnostics`] sink and resolves immediately
//! instead of waiting on itself. Unrelated concurrent requests for a pending
//! URL are not cycles and wait on its handle.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{Level, debug};

use crate::diagnostics::Diagnostics;
use crate::error::{ImportError, ImportResult};
use crate::importer::Importer;

tokio::task_local! {
    static IMPORT_CHAIN: Vec<String>;
}

fn current_chain() -> Vec<String> {
    IMPORT_CHAIN.try_with(Clone::clone).unwrap_or_default()
}

/// Awaitable outcome of one import, shared by every deduplicated caller.
#[derive(Clone)]
pub struct ImportHandle {
    url: Arc<str>,
    inner: Shared<BoxFuture<'static, ImportResult>>,
}

impl ImportHandle {
    /// Handle that is already settled.
    pub fn ready(url: &str, result: ImportResult) -> Self {
        Self {
            url: Arc::from(url),
            inner: futures_util::future::ready(result).boxed().shared(),
        }
    }

    fn pending(url: &str, settled: oneshot::Receiver<ImportResult>) -> Self {
        let owned = url.to_string();
        let inner = settled
            .map(move |result| result.unwrap_or_else(|_| Err(ImportError::interrupted(owned))))
            .boxed()
            .shared();
        Self {
            url: Arc::from(url),
            inner,
        }
    }

    /// URL this handle settles for
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Outcome, if already settled and polled
    pub fn peek(&self) -> Option<&ImportResult> {
        self.inner.peek()
    }
}

impl Future for ImportHandle {
    type Output = ImportResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl fmt::Debug for ImportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportHandle")
            .field("url", &self.url)
            .field("settled", &self.peek().is_some())
            .finish()
    }
}

/// Registry state of one URL
#[derive(Debug, Clone)]
pub enum LoadState {
    /// Requested and not settled yet
    Pending(ImportHandle),
    /// Imported
    Succeeded,
    /// Import failed; never retried
    Failed(ImportError),
}

impl LoadState {
    /// Whether the import has not settled yet
    pub fn is_pending(&self) -> bool {
        matches!(self, LoadState::Pending(_))
    }
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, LoadState>,
    num_requested: usize,
    num_imported: usize,
}

enum Request {
    Settled(ImportHandle),
    Fresh {
        handle: ImportHandle,
        settled: oneshot::Sender<ImportResult>,
    },
}

/// Deduplicating import registry
pub struct LoadRegistry {
    state: Mutex<RegistryState>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl LoadRegistry {
    /// Empty registry reporting through `diagnostics`.
    pub fn new(diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            diagnostics,
        }
    }

    /// Request `url` through an asynchronous importer.
    ///
    /// A fresh request is driven on a spawned task, so it makes progress
    /// whether or not the handle is awaited. Must run inside a Tokio runtime.
    pub fn request(self: &Arc<Self>, url: &str, importer: &Arc<dyn Importer>) -> ImportHandle {
        let mut chain = current_chain();
        let (handle, settled) = match self.begin(url, &chain) {
            Request::Settled(handle) => return handle,
            Request::Fresh { handle, settled } => (handle, settled),
        };
        chain.push(url.to_string());

        let import = importer.import_async(url);
        let registry = self.clone();
        let url = url.to_string();
        tokio::spawn(IMPORT_CHAIN.scope(chain, async move {
            let result = import.await;
            registry.settle(&url, &result);
            let _ = settled.send(result);
        }));

        handle
    }

    /// Request `url` through a blocking importer, settling before returning.
    ///
    /// A URL still pending on another task cannot be waited for here; it is
    /// skipped and settles on that task.
    pub fn request_blocking(&self, url: &str, importer: &dyn Importer) -> ImportResult {
        let mut chain = current_chain();
        let settled = match self.begin(url, &chain) {
            Request::Settled(handle) => {
                return match handle.now_or_never() {
                    Some(result) => result,
                    None => {
                        debug!(url, "already in progress");
                        Ok(())
                    }
                };
            }
            Request::Fresh { settled, .. } => settled,
        };

        chain.push(url.to_string());
        let result = IMPORT_CHAIN.sync_scope(chain, || importer.import_script(url, None));
        self.settle(url, &result);
        let _ = settled.send(result.clone());
        result
    }

    fn begin(&self, url: &str, chain: &[String]) -> Request {
        let mut state = self.state.lock();

        match state.entries.get(url) {
            Some(LoadState::Succeeded) => return Request::Settled(ImportHandle::ready(url, Ok(()))),
            Some(LoadState::Failed(err)) => {
                return Request::Settled(ImportHandle::ready(url, Err(err.clone())));
            }
            _ => {}
        }

        if chain.iter().any(|entry| entry == url) {
            drop(state);
            let top = chain.last().map(String::as_str).unwrap_or_default();
            self.diagnostics.report(
                Level::ERROR,
                &format!("circular dependency on '{url}' in '{top}'"),
            );
            return Request::Settled(ImportHandle::ready(url, Ok(())));
        }

        if let Some(LoadState::Pending(handle)) = state.entries.get(url) {
            return Request::Settled(handle.clone());
        }

        let (settled, receiver) = oneshot::channel();
        let handle = ImportHandle::pending(url, receiver);
        state
            .entries
            .insert(url.to_string(), LoadState::Pending(handle.clone()));
        state.num_requested += 1;
        debug!(url, "import requested");

        Request::Fresh { handle, settled }
    }

    fn settle(&self, url: &str, result: &ImportResult) {
        {
            let mut state = self.state.lock();
            let terminal = match result {
                Ok(()) => LoadState::Succeeded,
                Err(err) => LoadState::Failed(err.clone()),
            };
            state.entries.insert(url.to_string(), terminal);
            state.num_imported += 1;
        }

        match result {
            Ok(()) => debug!(url, "import settled"),
            Err(err) => self.diagnostics.report(Level::ERROR, &err.to_string()),
        }
    }

    /// State of `url`, if it was ever requested
    pub fn state(&self, url: &str) -> Option<LoadState> {
        self.state.lock().entries.get(url).cloned()
    }

    /// Whether `url` was ever requested
    pub fn is_imported(&self, url: &str) -> bool {
        self.state.lock().entries.contains_key(url)
    }

    /// Whether `url` is settled as failed
    pub fn is_failed(&self, url: &str) -> bool {
        matches!(self.state(url), Some(LoadState::Failed(_)))
    }

    /// Imports the calling task is nested in, innermost last
    pub fn stack(&self) -> Vec<String> {
        current_chain()
    }

    /// Number of distinct URLs requested
    pub fn num_requested(&self) -> usize {
        self.state.lock().num_requested
    }

    /// Number of requests that settled, successfully or not
    pub fn num_imported(&self) -> usize {
        self.state.lock().num_imported
    }

    /// Settled share of requested imports; 0 when nothing was requested
    pub fn load_progress(&self) -> f64 {
        let state = self.state.lock();
        if state.num_requested > 0 {
            state.num_imported as f64 / state.num_requested as f64
        } else {
            0.0
        }
    }
}
