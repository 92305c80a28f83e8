//! Git source adapter.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use git2::{Direction, Oid, Repository, ResetType};
use url::Url;

use crate::core::manifest::{Analyzer, Lock, Manifest};
use crate::core::package::{self, PackageTree};
use crate::core::project::ProjectRoot;
use crate::core::version::{PairedVersion, Revision, Version};
use crate::sources::source::SourceAdapter;
use crate::util::fs::{ensure_dir, export_tree};
use crate::util::hash::sha256_str;

/// A git-backed source: one remote, one clone under the cache directory.
pub struct GitSource {
    /// Remote repository URL
    remote: Url,

    /// Local clone path
    repo_path: PathBuf,

    /// Guards every operation that opens or repositions the clone.
    clone_lock: Mutex<()>,
}

impl GitSource {
    pub fn new(remote: Url, cache_dir: &Path) -> Self {
        // One directory per remote, stable across runs: readable prefix plus
        // a hash suffix so near-identical URLs cannot collide.
        let dir_name = format!(
            "{}-{}",
            sanitize_url_for_path(&remote),
            &sha256_str(remote.as_str())[..8]
        );
        let repo_path = cache_dir.join("git").join(dir_name);

        GitSource {
            remote,
            repo_path,
            clone_lock: Mutex::new(()),
        }
    }

    /// The clone's location under the cache directory.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn open(&self) -> Result<Repository> {
        Repository::open(&self.repo_path).with_context(|| {
            format!("failed to open git repository at {}", self.repo_path.display())
        })
    }

    /// Put the working tree at `revision`.
    fn checkout_revision(&self, repo: &Repository, revision: &Revision) -> Result<()> {
        let oid = Oid::from_str(revision.as_str())
            .with_context(|| format!("malformed git revision: {revision}"))?;
        let commit = repo
            .find_commit(oid)
            .with_context(|| format!("revision {} not present in {}", revision, self.remote))?;
        repo.reset(commit.as_object(), ResetType::Hard, None)
            .with_context(|| format!("failed to check out {revision}"))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.clone_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SourceAdapter for GitSource {
    fn source_type(&self) -> &'static str {
        "git"
    }

    fn upstream_url(&self) -> &Url {
        &self.remote
    }

    fn exists_locally(&self) -> bool {
        Repository::open(&self.repo_path).is_ok()
    }

    fn exists_upstream(&self) -> bool {
        let Ok(mut remote) = git2::Remote::create_detached(self.remote.as_str()) else {
            return false;
        };
        remote.connect(Direction::Fetch).is_ok()
    }

    fn init_local(&self) -> Result<()> {
        let _guard = self.lock();

        tracing::info!("cloning {}", self.remote);
        if let Some(parent) = self.repo_path.parent() {
            ensure_dir(parent)?;
        }
        Repository::clone(self.remote.as_str(), &self.repo_path)
            .with_context(|| format!("failed to clone {}", self.remote))?;
        Ok(())
    }

    fn update_local(&self) -> Result<()> {
        let _guard = self.lock();

        tracing::info!("updating {}", self.remote);
        let repo = self.open()?;
        let mut remote = repo
            .find_remote("origin")
            .context("clone has no origin remote")?;
        remote
            .fetch(
                &[
                    "+refs/heads/*:refs/heads/*",
                    "+refs/tags/*:refs/tags/*",
                ],
                None,
                None,
            )
            .with_context(|| format!("failed to fetch {}", self.remote))?;
        Ok(())
    }

    fn list_versions(&self) -> Result<Vec<PairedVersion>> {
        let mut remote = git2::Remote::create_detached(self.remote.as_str())
            .with_context(|| format!("invalid git remote: {}", self.remote))?;
        remote
            .connect(Direction::Fetch)
            .with_context(|| format!("failed to reach {}", self.remote))?;

        let mut default_branch = None;
        let mut branches: Vec<(String, Oid)> = Vec::new();
        // Annotated tags advertise both the tag object and a peeled `^{}`
        // entry; the peeled commit wins.
        let mut tags: Vec<(String, Oid)> = Vec::new();

        for head in remote.list()? {
            let name = head.name();
            if name == "HEAD" {
                default_branch = head
                    .symref_target()
                    .and_then(|t| t.strip_prefix("refs/heads/"))
                    .map(str::to_string);
            } else if let Some(branch) = name.strip_prefix("refs/heads/") {
                branches.push((branch.to_string(), head.oid()));
            } else if let Some(tag) = name.strip_prefix("refs/tags/") {
                match tag.strip_suffix("^{}") {
                    Some(peeled) => {
                        match tags.iter_mut().find(|(t, _)| t == peeled) {
                            Some(entry) => entry.1 = head.oid(),
                            None => tags.push((peeled.to_string(), head.oid())),
                        }
                    }
                    None => {
                        if !tags.iter().any(|(t, _)| t == tag) {
                            tags.push((tag.to_string(), head.oid()));
                        }
                    }
                }
            }
        }

        // Default branch first; the rest keep advertisement order.
        if let Some(default) = &default_branch {
            if let Some(pos) = branches.iter().position(|(b, _)| b == default) {
                let entry = branches.remove(pos);
                branches.insert(0, entry);
            }
        }

        let mut versions = Vec::with_capacity(branches.len() + tags.len());
        for (branch, oid) in branches {
            versions.push(PairedVersion::new(
                Version::Branch(branch),
                Revision::new(oid.to_string()),
            ));
        }
        for (tag, oid) in tags {
            versions.push(PairedVersion::new(
                Version::from_tag(&tag),
                Revision::new(oid.to_string()),
            ));
        }
        Ok(versions)
    }

    fn get_manifest_and_lock(
        &self,
        root: &ProjectRoot,
        revision: &Revision,
        analyzer: &dyn Analyzer,
    ) -> Result<(Manifest, Option<Lock>)> {
        let _guard = self.lock();

        let repo = self.open()?;
        self.checkout_revision(&repo, revision)?;
        analyzer.derive(&self.repo_path, root)
    }

    fn list_packages(&self, root: &ProjectRoot, revision: &Revision) -> Result<PackageTree> {
        let _guard = self.lock();

        let repo = self.open()?;
        self.checkout_revision(&repo, revision)?;
        package::list_packages(&self.repo_path, root)
    }

    fn revision_present_in(&self, revision: &Revision) -> Result<bool> {
        let _guard = self.lock();

        let repo = self.open()?;
        let found = repo.revparse_single(revision.as_str()).is_ok();
        Ok(found)
    }

    fn export_revision_to(&self, revision: &Revision, to: &Path) -> Result<()> {
        let _guard = self.lock();

        let repo = self.open()?;
        self.checkout_revision(&repo, revision)?;
        export_tree(&self.repo_path, to)
            .with_context(|| format!("failed to export {} to {}", self.remote, to.display()))
    }
}

/// Sanitize a URL for use as a directory name.
fn sanitize_url_for_path(url: &Url) -> String {
    let mut name = String::new();

    if let Some(host) = url.host_str() {
        name.push_str(host);
    }

    let path = url.path().trim_matches('/');
    if !path.is_empty() {
        if !name.is_empty() {
            name.push('-');
        }
        name.push_str(&path.replace('/', "-"));
    }

    // Remove .git suffix
    if name.ends_with(".git") {
        name.truncate(name.len() - 4);
    }

    name
}
