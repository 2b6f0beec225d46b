//! Diagnostics sink for human-readable loader warnings.
//!
//! The loader reports warnings, errors and cycle notices through a
//! [`Diagnostics`] implementation. Reports never influence control flow.

use tracing::Level;

/// Receiver of leveled loader messages.
pub trait Diagnostics: Send + Sync {
    /// Report a message at `level`
    fn report(&self, level: Level, message: &str);
}

/// Forwards every report to `tracing` under the `ferry::loader` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "ferry::loader", "{message}"),
            Level::WARN => tracing::warn!(target: "ferry::loader", "{message}"),
            Level::INFO => tracing::info!(target: "ferry::loader", "{message}"),
            Level::DEBUG => tracing::debug!(target: "ferry::loader", "{message}"),
            _ => tracing::trace!(target: "ferry::loader", "{message}"),
        }
    }
}
