//! Single-source in-memory cache.
//!
//! Pure bookkeeping for one source: no I/O, no locking, no eviction. The
//! owning gateway serializes access and decides freshness; the cache only
//! answers what it has been told.

use std::collections::HashMap;

use crate::core::manifest::{AnalyzerInfo, Lock, Manifest};
use crate::core::package::PackageTree;
use crate::core::project::ProjectRoot;
use crate::core::version::{PairedVersion, Revision, Version};

/// In-memory memo of everything learned about one source.
#[derive(Debug, Default)]
pub struct SourceCache {
    /// Version list in backend order.
    versions: Vec<PairedVersion>,
    /// Set once the list reflects an upstream query.
    complete: bool,
    to_rev: HashMap<Version, Revision>,
    from_rev: HashMap<Revision, Vec<Version>>,
    manifests: HashMap<(Revision, AnalyzerInfo), (Manifest, Option<Lock>)>,
    trees: HashMap<(Revision, ProjectRoot), PackageTree>,
}

impl SourceCache {
    pub fn new() -> Self {
        SourceCache::default()
    }

    /// Forward lookup: the revision a version currently maps to.
    pub fn to_revision(&self, version: &Version) -> Option<Revision> {
        self.to_rev.get(version).cloned()
    }

    /// Reverse lookup. `Some(&[])` means the revision is known to exist but
    /// not to belong to any current version; `None` means nothing is known.
    pub fn versions_for(&self, revision: &Revision) -> Option<&[Version]> {
        self.from_rev.get(revision).map(Vec::as_slice)
    }

    /// Idempotent note that `revision` was observed in the backend.
    pub fn mark_revision_exists(&mut self, revision: &Revision) {
        self.from_rev.entry(revision.clone()).or_default();
    }

    /// Install a new version list. When `flush` is set, both indices are
    /// replaced wholesale; otherwise the pairs merge over what is known,
    /// moving any version whose revision changed.
    pub fn store_version_map(&mut self, pairs: Vec<PairedVersion>, flush: bool) {
        if flush {
            self.to_rev.clear();
            self.from_rev.clear();
            for pv in &pairs {
                self.insert_pair(pv);
            }
            self.versions = pairs;
            self.complete = true;
            return;
        }

        for pv in pairs {
            self.insert_pair(&pv);
            match self
                .versions
                .iter_mut()
                .find(|known| known.version == pv.version)
            {
                Some(known) => known.revision = pv.revision,
                None => self.versions.push(pv),
            }
        }
    }

    fn insert_pair(&mut self, pv: &PairedVersion) {
        if let Some(old) = self
            .to_rev
            .insert(pv.version.clone(), pv.revision.clone())
        {
            if old != pv.revision {
                if let Some(versions) = self.from_rev.get_mut(&old) {
                    versions.retain(|v| v != &pv.version);
                }
            }
        }
        let versions = self.from_rev.entry(pv.revision.clone()).or_default();
        if !versions.contains(&pv.version) {
            versions.push(pv.version.clone());
        }
    }

    /// Whether the version list has been refreshed against upstream.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Every known paired version, in backend order.
    pub fn all_versions(&self) -> Vec<PairedVersion> {
        self.versions.clone()
    }

    pub fn manifest_and_lock(
        &self,
        revision: &Revision,
        analyzer: &AnalyzerInfo,
    ) -> Option<(Manifest, Option<Lock>)> {
        self.manifests
            .get(&(revision.clone(), analyzer.clone()))
            .cloned()
    }

    pub fn set_manifest_and_lock(
        &mut self,
        revision: &Revision,
        analyzer: AnalyzerInfo,
        manifest: Manifest,
        lock: Option<Lock>,
    ) {
        self.manifests
            .insert((revision.clone(), analyzer), (manifest, lock));
    }

    pub fn package_tree(&self, revision: &Revision, root: &ProjectRoot) -> Option<PackageTree> {
        self.trees.get(&(revision.clone(), root.clone())).cloned()
    }

    pub fn set_package_tree(&mut self, revision: &Revision, root: ProjectRoot, tree: PackageTree) {
        self.trees.insert((revision.clone(), root), tree);
    }
}
