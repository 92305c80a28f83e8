//! Deduction - turning a normalized name into candidate repositories.
//!
//! The full deduction subsystem (vanity import hosts, metadata lookups) is a
//! separate collaborator; the coordination core only depends on the
//! [`Deducer`] trait. [`UrlDeducer`] covers the cases that need no network:
//! explicit URLs and filesystem paths.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::project::ProjectRoot;
use crate::sources::probe::{CandidateProbe, CandidateSet, GitCandidate, LocalCandidate};

/// The outcome of deducing one normalized name.
#[derive(Debug)]
pub struct Deduction {
    /// The project-root portion of the import path.
    pub root: ProjectRoot,
    /// Candidate repositories, in the order they should be tried.
    pub candidates: CandidateSet,
}

/// Resolves a normalized project name to candidate repositories.
///
/// Errors propagate to callers opaquely and are never cached by the
/// coordinator, so externally-driven retry strategies stay possible.
#[async_trait]
pub trait Deducer: Send + Sync {
    async fn deduce(&self, ctx: &CancellationToken, name: &str) -> Result<Deduction>;
}

/// Minimal deducer for explicit locations.
///
/// `https`/`http`/`git`/`ssh` URLs and scheme-less host paths become git
/// candidates; `file` URLs and absolute or relative paths become local
/// candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlDeducer;

#[async_trait]
impl Deducer for UrlDeducer {
    async fn deduce(&self, _ctx: &CancellationToken, name: &str) -> Result<Deduction> {
        if name.starts_with('/') || name.starts_with("./") || name.starts_with("../") {
            return Ok(local_deduction(name, PathBuf::from(name)));
        }

        if let Ok(url) = Url::parse(name) {
            return match url.scheme() {
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|_| anyhow!("unusable file URL: {name}"))?;
                    Ok(local_deduction(name, path))
                }
                "http" | "https" | "git" | "ssh" => Ok(git_deduction(name, url)),
                other => bail!("cannot deduce a source from scheme `{other}` in {name}"),
            };
        }

        // A scheme-less import path such as github.com/x/y.
        let url = Url::parse(&format!("https://{name}"))
            .map_err(|err| anyhow!("cannot deduce a source for {name}: {err}"))?;
        if url.host_str().is_none() {
            bail!("cannot deduce a source for {name}: no host");
        }
        Ok(git_deduction(name, url))
    }
}

fn git_deduction(name: &str, url: Url) -> Deduction {
    let root = format!(
        "{}{}",
        url.host_str().unwrap_or_default(),
        url.path().trim_end_matches('/')
    );
    Deduction {
        root: ProjectRoot::new(root),
        candidates: CandidateSet::new(
            name,
            vec![std::sync::Arc::new(GitCandidate { url }) as std::sync::Arc<dyn CandidateProbe>],
        ),
    }
}

fn local_deduction(name: &str, path: PathBuf) -> Deduction {
    Deduction {
        root: ProjectRoot::new(name),
        candidates: CandidateSet::new(
            name,
            vec![
                std::sync::Arc::new(LocalCandidate { path }) as std::sync::Arc<dyn CandidateProbe>
            ],
        ),
    }
}
