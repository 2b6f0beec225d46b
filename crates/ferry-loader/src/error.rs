//! Error types for ferry-loader

use std::fmt;
use thiserror::Error;

/// Failure of a single import.
///
/// Cloneable because one settlement is observed by every caller that was
/// deduplicated onto the same request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    /// The host primitive rejected the resource
    #[error("failed to import '{url}': {reason}")]
    Failed { url: String, reason: String },

    /// The task driving the import went away before it settled
    #[error("import of '{url}' was interrupted before it settled")]
    Interrupted { url: String },

    /// The resource failed earlier and is not retried
    #[error("'{url}' already failed")]
    AlreadyFailed { url: String },
}

impl ImportError {
    /// Create a host failure for `url`
    pub fn failed(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Failed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an interruption error for `url`
    pub fn interrupted(url: impl Into<String>) -> Self {
        Self::Interrupted { url: url.into() }
    }

    /// URL of the resource this error is about
    pub fn url(&self) -> &str {
        match self {
            Self::Failed { url, .. } | Self::Interrupted { url } | Self::AlreadyFailed { url } => {
                url
            }
        }
    }
}

/// Outcome of one import.
pub type ImportResult = Result<(), ImportError>;

/// Boxed error returned by user bootstrap callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Bootstrap stage that fans out a batch of imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    /// Imports awaited before the user callback
    BeforeBoot,
    /// Imports awaited after the user callback
    AfterBoot,
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootStage::BeforeBoot => f.write_str("beforeBoot"),
            BootStage::AfterBoot => f.write_str("afterBoot"),
        }
    }
}

/// Loader error type
#[derive(Debug, Error)]
pub enum LoaderError {
    /// No importer has been selected or installed yet
    #[error("loader is not initialized")]
    NotInitialized,

    /// The host offers none of the supported import mechanisms
    #[error("no import provider is available on this host")]
    NoProvider,

    /// The host cannot inject scripts directly
    #[error("host cannot execute '{0}': no script injector or blocking loader")]
    CannotExecute(String),

    /// A single import failed
    #[error(transparent)]
    Import(#[from] ImportError),

    /// Some imports of a fanned-out batch failed
    #[error("{stage}: {} of {total} imports failed", failures.len())]
    Batch {
        stage: BootStage,
        total: usize,
        failures: Vec<ImportError>,
    },

    /// The user bootstrap callback failed
    #[error("bootstrap callback failed: {0}")]
    Bootstrap(#[source] BoxError),
}

/// Result type using LoaderError
pub type LoaderResult<T> = Result<T, LoaderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_error_message() {
        let err = LoaderError::Batch {
            stage: BootStage::AfterBoot,
            total: 3,
            failures: vec![
                ImportError::failed("/a.js", "404"),
                ImportError::interrupted("/b.js"),
            ],
        };
        assert_eq!(err.to_string(), "afterBoot: 2 of 3 imports failed");
    }

    #[test]
    fn test_import_error_url() {
        assert_eq!(ImportError::failed("/x.js", "boom").url(), "/x.js");
        assert_eq!(
            ImportError::failed("/x.js", "boom").to_string(),
            "failed to import '/x.js': boom"
        );
    }
}
