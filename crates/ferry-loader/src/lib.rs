//! Ferry loader core.
//!
//! This crate loads scripts and other resources in a caller-intended order
//! on top of whatever loading mechanism the host offers.
//!
//! # Features
//!
//! - **Path buckets**: map logical names to URLs through a normalized table
//! - **Deduplication**: every URL is imported at most once, concurrent
//!   requests share one settlement
//! - **Cycle detection**: self-referential imports are reported and
//!   short-circuited instead of deadlocking
//! - **Pluggable importers**: blocking loaders, native module systems, or the
//!   built-in two-phase queue engine
//! - **Bootstrap**: ordered `before_boot` imports, user callback, and
//!   `after_boot` imports
//!
//! # Example
//!
//! ```no_run
//! use ferry_loader::{BootConfig, HostEnvironment, Loader, PathConfig};
//! # use ferry_loader::ScriptInjector;
//! # use std::sync::Arc;
//! # fn injector() -> Arc<dyn ScriptInjector> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = HostEnvironment::new().with_injector(injector());
//!     let loader = Loader::new(host);
//!
//!     let config = BootConfig::new()
//!         .paths(PathConfig::new("/app").with_bucket("scripts", "js"))
//!         .before_boot(["vendor.js"])
//!         .bootstrap(|loader, _param| async move {
//!             loader.imports(&["widgets.js"])?;
//!             Ok::<_, ferry_loader::BoxError>(serde_json::Value::Null)
//!         })
//!         .after_boot(["main.js"]);
//!
//!     loader.init(config).await?;
//!     println!("progress: {}", loader.load_progress());
//!     Ok(())
//! }
//! ```

pub mod diagnostics;
pub mod error;
pub mod host;
pub mod importer;
pub mod loader;
pub mod params;
pub mod paths;
pub mod queue;
pub mod registry;

pub use diagnostics::{Diagnostics, TracingDiagnostics};
pub use error::{BootStage, BoxError, ImportError, ImportResult, LoaderError, LoaderResult};
pub use host::{BlockingLoad, HostEnvironment, ModuleImport, Prefetch, Provider, ScriptInjector};
pub use importer::{Importer, ImporterKind, ModuleImporter, QueueImporter, WorkerImporter};
pub use loader::{BootConfig, BootSettings, Bootstrap, Loader, init};
pub use params::{Conversion, parse_params};
pub use paths::{BUCKET_LOADER, BUCKET_SCRIPTS, PathConfig};
pub use queue::{Completion, EntryState, QueueConfig, QueueEngine};
pub use registry::{ImportHandle, LoadRegistry, LoadState};
