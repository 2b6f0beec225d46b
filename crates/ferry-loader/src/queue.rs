//! Two-phase preload/execute queue.
//!
//! Used when the host has no native module system. Every queued resource
//! goes through `Pending -> Loaded -> Executed`:
//!
//! 1. **Preload**: a non-executing [`Prefetch`] probe runs for every entry
//!    carrying a source. Its completion, success or error, only flips the
//!    entry to `Loaded`.
//! 2. **Execute**: a cursor points at the oldest entry not yet executed.
//!    When that entry is `Loaded` it is injected through the
//!    [`ScriptInjector`]; when the injection settles the entry becomes
//!    `Executed`, its completion runs and the cursor advances. A head that is
//!    still `Pending` stops the engine until the next preload completes.
//!
//! Execution order is always enqueue order. All state changes are funneled
//! through one driver task consuming [`Step`]s, so completions that queue
//! more work never recurse into the scheduler.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::ImportResult;
use crate::host::{Prefetch, ScriptInjector};

/// Callback receiving the outcome of a queued entry.
pub type Completion = Box<dyn FnOnce(ImportResult) + Send + 'static>;

/// Queue engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Delay in milliseconds before each execute step; negative disables it
    #[serde(default = "default_execute_delay")]
    pub execute_delay_ms: i64,
}

fn default_execute_delay() -> i64 {
    -1
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            execute_delay_ms: default_execute_delay(),
        }
    }
}

impl QueueConfig {
    /// Config with a fixed delay between execute steps.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            execute_delay_ms: i64::try_from(delay.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// The inter-step delay, if enabled
    pub fn execute_delay(&self) -> Option<Duration> {
        u64::try_from(self.execute_delay_ms)
            .ok()
            .map(Duration::from_millis)
    }
}

/// Lifecycle of a queued entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryState {
    /// Queued, preload not finished
    Pending,
    /// Preload finished (or nothing to preload)
    Loaded,
    /// Side effect performed, completion delivered
    Executed,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryState::Pending => f.write_str("pending"),
            EntryState::Loaded => f.write_str("loaded"),
            EntryState::Executed => f.write_str("executed"),
        }
    }
}

struct QueueEntry {
    state: EntryState,
    source: Option<String>,
    execute: bool,
    completion: Option<Completion>,
}

#[derive(Default)]
struct QueueState {
    entries: Vec<QueueEntry>,
    sources: HashMap<String, EntryState>,
    next_index: usize,
    num_queued: usize,
    num_loaded: usize,
    num_executed: usize,
    running: bool,
}

/// Unit of work for the driver loop
enum Step {
    /// Start the preload probe of an entry
    Probe { index: usize, url: String },
    /// A preload probe finished
    Preloaded { index: usize, result: ImportResult },
    /// An injection settled
    Executed { index: usize, result: ImportResult },
    /// Try to advance the cursor
    Resume,
}

/// Ordered preload-then-execute queue.
///
/// Must be created inside a Tokio runtime: the driver loop is spawned on
/// construction and lives until every handle to the engine is dropped.
#[derive(Clone)]
pub struct QueueEngine {
    state: Arc<Mutex<QueueState>>,
    steps: mpsc::UnboundedSender<Step>,
    has_prefetch: bool,
}

impl QueueEngine {
    pub fn new(
        injector: Arc<dyn ScriptInjector>,
        prefetch: Option<Arc<dyn Prefetch>>,
        config: QueueConfig,
    ) -> Self {
        let (steps, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(QueueState::default()));
        let has_prefetch = prefetch.is_some();

        let driver = Driver {
            state: state.clone(),
            injector,
            prefetch,
            delay: config.execute_delay(),
            steps: steps.downgrade(),
            executing: false,
        };
        tokio::spawn(driver.run(receiver));

        Self {
            state,
            steps,
            has_prefetch,
        }
    }

    /// Queue a resource, or a plain callback when `source` is `None`.
    ///
    /// Returns `false` when nothing was queued: the source is already in the
    /// queue, or there is neither a source nor a completion.
    pub fn load(&self, source: Option<&str>, execute: bool, completion: Option<Completion>) -> bool {
        let mut state = self.state.lock();

        let step = match source.filter(|source| !source.is_empty()) {
            Some(source) => {
                if state.sources.contains_key(source) {
                    debug!(source, "already in queue");
                    return false;
                }
                let index = state.entries.len();
                state.entries.push(QueueEntry {
                    state: EntryState::Pending,
                    source: Some(source.to_string()),
                    execute,
                    completion,
                });
                state.sources.insert(source.to_string(), EntryState::Pending);
                state.num_queued += 1;

                if self.has_prefetch {
                    Step::Probe {
                        index,
                        url: source.to_string(),
                    }
                } else {
                    Step::Preloaded {
                        index,
                        result: Ok(()),
                    }
                }
            }
            None => {
                let Some(completion) = completion else {
                    return false;
                };
                state.entries.push(QueueEntry {
                    state: EntryState::Loaded,
                    source: None,
                    execute: true,
                    completion: Some(completion),
                });
                Step::Resume
            }
        };
        drop(state);

        if self.steps.send(step).is_err() {
            error!("queue driver is gone");
        }
        true
    }

    /// Queue a plain callback that runs after everything queued before it.
    pub fn enqueue_callback(&self, completion: Completion) -> bool {
        self.load(None, true, Some(completion))
    }

    /// State of a queued source
    pub fn state(&self, source: &str) -> Option<EntryState> {
        if source.is_empty() {
            return None;
        }
        self.state.lock().sources.get(source).copied()
    }

    /// Whether the source finished preloading
    pub fn is_loaded(&self, source: &str) -> bool {
        matches!(
            self.state(source),
            Some(EntryState::Loaded | EntryState::Executed)
        )
    }

    /// Whether the source was executed
    pub fn is_executed(&self, source: &str) -> bool {
        self.state(source) == Some(EntryState::Executed)
    }

    /// Snapshot of all queued sources in enqueue order
    pub fn sources(&self) -> Vec<(String, EntryState)> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter_map(|entry| entry.source.clone().map(|source| (source, entry.state)))
            .collect()
    }

    pub fn num_queued(&self) -> usize {
        self.state.lock().num_queued
    }

    pub fn num_loaded(&self) -> usize {
        self.state.lock().num_loaded
    }

    pub fn num_executed(&self) -> usize {
        self.state.lock().num_executed
    }

    /// Whether the cursor is currently advancing
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Executed share of queued sources; 0 when nothing was queued
    pub fn load_progress(&self) -> f64 {
        let state = self.state.lock();
        if state.num_queued > 0 {
            state.num_executed as f64 / state.num_queued as f64
        } else {
            0.0
        }
    }
}

enum Action {
    Inject { index: usize, url: String },
    Complete { completion: Option<Completion> },
}

struct Driver {
    state: Arc<Mutex<QueueState>>,
    injector: Arc<dyn ScriptInjector>,
    prefetch: Option<Arc<dyn Prefetch>>,
    delay: Option<Duration>,
    steps: mpsc::WeakUnboundedSender<Step>,
    executing: bool,
}

impl Driver {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Step>) {
        while let Some(step) = receiver.recv().await {
            match step {
                Step::Probe { index, url } => self.probe(index, url),
                Step::Preloaded { index, result } => self.on_preloaded(index, result),
                Step::Executed { index, result } => self.on_executed(index, result),
                Step::Resume => {}
            }
            self.schedule().await;
        }
        debug!("queue driver stopped");
    }

    fn probe(&self, index: usize, url: String) {
        let (Some(prefetch), Some(steps)) = (&self.prefetch, self.steps.upgrade()) else {
            return;
        };
        let probe = prefetch.probe(&url);
        tokio::spawn(async move {
            let result = probe.await;
            let _ = steps.send(Step::Preloaded { index, result });
        });
    }

    fn on_preloaded(&self, index: usize, result: ImportResult) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(entry) = state.entries.get_mut(index) else {
            return;
        };
        let source = entry.source.as_deref().unwrap_or_default();
        match &result {
            Ok(()) => debug!(source, "preloaded"),
            Err(err) => warn!(source, "preload failed: {err}"),
        }

        if entry.state == EntryState::Pending {
            entry.state = EntryState::Loaded;
            if let Some(source) = &entry.source {
                state.sources.insert(source.clone(), EntryState::Loaded);
            }
            state.num_loaded += 1;
        }
    }

    fn on_executed(&mut self, index: usize, result: ImportResult) {
        self.executing = false;

        let completion = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(entry) = state.entries.get_mut(index) else {
                return;
            };
            entry.state = EntryState::Executed;
            if let Some(source) = &entry.source {
                state.sources.insert(source.clone(), EntryState::Executed);
                state.num_executed += 1;
                match &result {
                    Ok(()) => debug!(source = source.as_str(), "executed"),
                    Err(err) => error!(source = source.as_str(), "execution failed: {err}"),
                }
            }
            entry.completion.take()
        };

        if let Some(completion) = completion {
            completion(result);
        }
    }

    /// Advance the cursor as far as loaded entries allow.
    async fn schedule(&mut self) {
        loop {
            if self.executing {
                return;
            }

            let head_loaded = {
                let mut state = self.state.lock();
                let loaded = state
                    .entries
                    .get(state.next_index)
                    .is_some_and(|entry| entry.state == EntryState::Loaded);
                if !loaded {
                    state.running = false;
                }
                loaded
            };
            if !head_loaded {
                return;
            }

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let action = {
                let mut guard = self.state.lock();
                let state = &mut *guard;
                let index = state.next_index;
                state.next_index += 1;
                state.running = true;

                let entry = &mut state.entries[index];
                match (&entry.source, entry.execute) {
                    (Some(url), true) => Action::Inject {
                        index,
                        url: url.clone(),
                    },
                    (source, _) => {
                        entry.state = EntryState::Executed;
                        if let Some(source) = source {
                            state.sources.insert(source.clone(), EntryState::Executed);
                            state.num_executed += 1;
                        }
                        Action::Complete {
                            completion: entry.completion.take(),
                        }
                    }
                }
            };

            match action {
                Action::Inject { index, url } => {
                    let Some(steps) = self.steps.upgrade() else {
                        return;
                    };
                    self.executing = true;
                    debug!(source = url.as_str(), "executing");
                    let run = self.injector.inject(&url);
                    tokio::spawn(async move {
                        let result = run.await;
                        let _ = steps.send(Step::Executed { index, result });
                    });
                    return;
                }
                Action::Complete { completion } => {
                    if let Some(completion) = completion {
                        completion(Ok(()));
                    }
                }
            }
        }
    }
}
