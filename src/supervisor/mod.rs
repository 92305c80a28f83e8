//! Call supervision: cancellation-aware dispatch and concurrency accounting
//! for every outbound network and disk operation.
//!
//! Gateways never run blocking backend work themselves; they hand a closure
//! to the supervisor, which runs it on the blocking pool while racing the
//! per-call context and the process-wide lifetime context. Cancellation
//! abandons the blocking task rather than interrupting it; the awaiting
//! caller observes the cancellation immediately.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::sources::errors::SourceError;

/// Category tags for supervised calls. The set is closed; every outbound
/// operation of the core falls into exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    SourcePing,
    SourceInit,
    SourceFetch,
    ExportTree,
    ListVersions,
    GetManifestAndLock,
    ListPackages,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::SourcePing => "source-ping",
            CallKind::SourceInit => "source-init",
            CallKind::SourceFetch => "source-fetch",
            CallKind::ExportTree => "export-tree",
            CallKind::ListVersions => "list-versions",
            CallKind::GetManifestAndLock => "get-manifest-and-lock",
            CallKind::ListPackages => "list-packages",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running totals for one call category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCount {
    /// Calls handed to the blocking pool since process start.
    pub dispatched: u64,
    /// Calls currently being awaited.
    pub active: u64,
}

/// Dispatch authority for all blocking work in the coordination core.
pub struct Supervisor {
    lifetime: CancellationToken,
    limit: Option<Arc<Semaphore>>,
    counts: Mutex<HashMap<CallKind, CallCount>>,
}

impl Supervisor {
    pub fn new(lifetime: CancellationToken) -> Self {
        Supervisor {
            lifetime,
            limit: None,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Cap the number of concurrently running supervised calls.
    pub fn with_call_limit(lifetime: CancellationToken, permits: usize) -> Self {
        Supervisor {
            lifetime,
            limit: Some(Arc::new(Semaphore::new(permits))),
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide cancellation handle. Once canceled, every in-flight
    /// and future call fails with [`SourceError::Terminated`].
    pub fn lifetime(&self) -> &CancellationToken {
        &self.lifetime
    }

    /// Snapshot of per-category counters.
    pub fn counts(&self) -> HashMap<CallKind, CallCount> {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many calls of `kind` have been dispatched so far.
    pub fn dispatched(&self, kind: CallKind) -> u64 {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(|c| c.dispatched)
            .unwrap_or(0)
    }

    /// Run `f` on the blocking pool under this supervisor's accounting,
    /// racing completion against both `ctx` and the lifetime context.
    pub async fn run<T, F>(
        &self,
        ctx: &CancellationToken,
        label: &str,
        kind: CallKind,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.lifetime.is_cancelled() {
            return Err(SourceError::Terminated.into());
        }
        if ctx.is_cancelled() {
            return Err(SourceError::Canceled.into());
        }

        let _permit = match &self.limit {
            Some(sem) => {
                let sem = Arc::clone(sem);
                tokio::select! {
                    permit = sem.acquire_owned() => match permit {
                        Ok(p) => Some(p),
                        Err(_) => return Err(SourceError::Terminated.into()),
                    },
                    _ = ctx.cancelled() => return Err(SourceError::Canceled.into()),
                    _ = self.lifetime.cancelled() => return Err(SourceError::Terminated.into()),
                }
            }
            None => None,
        };

        debug!(%label, kind = %kind, "dispatching supervised call");
        self.record_start(kind);

        let handle = tokio::task::spawn_blocking(f);
        let result = tokio::select! {
            joined = handle => match joined {
                Ok(res) => res,
                Err(err) => Err(anyhow::anyhow!("supervised call panicked: {err}")),
            },
            _ = ctx.cancelled() => Err(SourceError::Canceled.into()),
            _ = self.lifetime.cancelled() => Err(SourceError::Terminated.into()),
        };

        self.record_finish(kind);
        result
    }

    fn record_start(&self, kind: CallKind) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = counts.entry(kind).or_default();
        entry.dispatched += 1;
        entry.active += 1;
    }

    fn record_finish(&self, kind: CallKind) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = counts.get_mut(&kind) {
            entry.active = entry.active.saturating_sub(1);
        }
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("terminated", &self.lifetime.is_cancelled())
            .field("limited", &self.limit.is_some())
            .finish()
    }
}
