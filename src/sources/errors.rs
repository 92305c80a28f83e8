//! Structured error kinds surfaced by the coordination core.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors whose meaning goes beyond their message text.
///
/// Everything else the core surfaces is an [`anyhow::Error`] chain carrying
/// the source URL and the step that failed.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The supervisor's lifetime context was canceled; no further work is
    /// accepted for the rest of the process.
    #[error("source coordinator has been terminated")]
    Terminated,

    /// The per-call context was canceled while the operation was in flight.
    #[error("operation canceled")]
    Canceled,

    /// Authoritative: returned only once the version list reflects upstream,
    /// or immediately when it already did.
    #[error("version {version} does not exist in source")]
    NoSuchVersion { version: String },

    /// Every candidate backend failed to produce a working source. Not cached
    /// anywhere; retrying reaches the candidates again.
    #[error("no usable source could be set up for `{name}`: {}", .failures.join("; "))]
    NoUsableSource {
        name: String,
        failures: Vec<String>,
    },
}

impl SourceError {
    /// Whether this error means the call should stop immediately rather than
    /// fall through to another candidate or step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Terminated | SourceError::Canceled)
    }
}

/// A clonable error handle.
///
/// The coordinator folds many waiters onto one set-up worker; when the worker
/// fails, each waiter receives the same failure through its own channel.
#[derive(Debug, Clone)]
pub struct SharedError(Arc<anyhow::Error>);

impl SharedError {
    pub fn new(err: anyhow::Error) -> Self {
        SharedError(Arc::new(err))
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for SharedError {}
