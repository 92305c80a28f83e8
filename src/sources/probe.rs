//! Candidate probing - deferred backend selection for one source.
//!
//! Deduction produces candidates, not adapters: a candidate names a place a
//! repository might live, and only when a gateway first needs its source does
//! the probe try each candidate against the cache directory. A probe that
//! finds an existing clone, or that pings upstream successfully, reports the
//! state bits it satisfied along the way so the gateway does not repeat the
//! work.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::sources::errors::SourceError;
use crate::sources::gateway::SourceState;
use crate::sources::git::GitSource;
use crate::sources::path::LocalSource;
use crate::sources::source::SourceAdapter;
use crate::supervisor::{CallKind, Supervisor};

/// A deferred constructor for one possible backend of one source.
#[async_trait]
pub trait CandidateProbe: Send + Sync {
    /// Human-readable identification for error composition.
    fn label(&self) -> String;

    /// Try to produce a working adapter, reporting any state bits satisfied
    /// incidentally.
    async fn probe(
        &self,
        ctx: &CancellationToken,
        cache_dir: &Path,
        supervisor: &Supervisor,
    ) -> Result<(Arc<dyn SourceAdapter>, SourceState)>;
}

/// A git repository candidate.
pub struct GitCandidate {
    pub url: Url,
}

#[async_trait]
impl CandidateProbe for GitCandidate {
    fn label(&self) -> String {
        format!("git:{}", self.url)
    }

    async fn probe(
        &self,
        ctx: &CancellationToken,
        cache_dir: &Path,
        supervisor: &Supervisor,
    ) -> Result<(Arc<dyn SourceAdapter>, SourceState)> {
        let src = Arc::new(GitSource::new(self.url.clone(), cache_dir));

        if src.exists_locally() {
            return Ok((src, SourceState::EXISTS_LOCALLY));
        }

        let pinged = Arc::clone(&src);
        supervisor
            .run(ctx, self.url.as_str(), CallKind::SourcePing, move || {
                if pinged.exists_upstream() {
                    Ok(())
                } else {
                    bail!("{} does not exist upstream", pinged.upstream_url())
                }
            })
            .await?;

        Ok((src, SourceState::EXISTS_UPSTREAM))
    }
}

/// A plain-directory candidate.
pub struct LocalCandidate {
    pub path: PathBuf,
}

#[async_trait]
impl CandidateProbe for LocalCandidate {
    fn label(&self) -> String {
        format!("local:{}", self.path.display())
    }

    async fn probe(
        &self,
        _ctx: &CancellationToken,
        _cache_dir: &Path,
        _supervisor: &Supervisor,
    ) -> Result<(Arc<dyn SourceAdapter>, SourceState)> {
        let src = Arc::new(LocalSource::new(&self.path)?);
        if !src.exists_locally() {
            bail!("local source {} does not exist", self.path.display());
        }
        // The directory is simultaneously the upstream and the clone.
        Ok((
            src,
            SourceState::EXISTS_LOCALLY | SourceState::EXISTS_UPSTREAM,
        ))
    }
}

/// The ordered candidates deduction produced for one normalized name.
#[derive(Clone)]
pub struct CandidateSet {
    name: String,
    candidates: Vec<Arc<dyn CandidateProbe>>,
}

impl CandidateSet {
    pub fn new(name: impl Into<String>, candidates: Vec<Arc<dyn CandidateProbe>>) -> Self {
        CandidateSet {
            name: name.into(),
            candidates,
        }
    }

    /// Try each candidate in order, returning the first working adapter.
    ///
    /// Cancellation and termination abort immediately; every other failure
    /// falls through to the next candidate and is folded into the composed
    /// error. The composed error is never cached anywhere, so external retry
    /// strategies reach the candidates again.
    pub(crate) async fn try_sources(
        &self,
        ctx: &CancellationToken,
        cache_dir: &Path,
        supervisor: &Supervisor,
    ) -> Result<(Arc<dyn SourceAdapter>, SourceState)> {
        let mut failures = Vec::new();

        for candidate in &self.candidates {
            match candidate.probe(ctx, cache_dir, supervisor).await {
                Ok(found) => {
                    debug!(candidate = %candidate.label(), "candidate accepted");
                    return Ok(found);
                }
                Err(err) => {
                    if matches!(
                        err.downcast_ref::<SourceError>(),
                        Some(e) if e.is_fatal()
                    ) {
                        return Err(err);
                    }
                    failures.push(format!("{}: {err:#}", candidate.label()));
                }
            }
        }

        Err(SourceError::NoUsableSource {
            name: self.name.clone(),
            failures,
        }
        .into())
    }
}

impl fmt::Debug for CandidateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateSet")
            .field("name", &self.name)
            .field(
                "candidates",
                &self.candidates.iter().map(|c| c.label()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_candidate_probe() {
        let tmp = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let superv = Supervisor::new(CancellationToken::new());
        let ctx = CancellationToken::new();

        let set = CandidateSet::new(
            "proj",
            vec![Arc::new(LocalCandidate {
                path: tmp.path().to_path_buf(),
            })],
        );
        let (adapter, state) = set.try_sources(&ctx, cache.path(), &superv).await.unwrap();

        assert_eq!(adapter.source_type(), "local");
        assert!(state.contains(SourceState::EXISTS_LOCALLY));
        assert!(state.contains(SourceState::EXISTS_UPSTREAM));
    }

    #[tokio::test]
    async fn test_all_candidates_failing_composes_error() {
        let cache = TempDir::new().unwrap();
        let superv = Supervisor::new(CancellationToken::new());
        let ctx = CancellationToken::new();

        let set = CandidateSet::new(
            "ghost",
            vec![
                Arc::new(LocalCandidate {
                    path: PathBuf::from("/nonexistent/one"),
                }) as Arc<dyn CandidateProbe>,
                Arc::new(LocalCandidate {
                    path: PathBuf::from("/nonexistent/two"),
                }),
            ],
        );
        let err = match set.try_sources(&ctx, cache.path(), &superv).await {
            Ok(_) => panic!("expected try_sources to fail"),
            Err(e) => e,
        };

        let source_err = err.downcast_ref::<SourceError>().unwrap();
        match source_err {
            SourceError::NoUsableSource { name, failures } => {
                assert_eq!(name, "ghost");
                assert_eq!(failures.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_canceled_probe_aborts_instead_of_falling_through() {
        let cache = TempDir::new().unwrap();
        let superv = Supervisor::new(CancellationToken::new());
        let ctx = CancellationToken::new();
        ctx.cancel();

        // A git candidate must ping through the supervisor, which notices the
        // canceled context before trying the (nonexistent) remote.
        let set = CandidateSet::new(
            "gone",
            vec![Arc::new(GitCandidate {
                url: Url::parse("https://invalid.example/nope").unwrap(),
            }) as Arc<dyn CandidateProbe>],
        );
        let err = match set.try_sources(&ctx, cache.path(), &superv).await {
            Ok(_) => panic!("expected try_sources to fail"),
            Err(e) => e,
        };
        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::Canceled)
        ));
    }
}
