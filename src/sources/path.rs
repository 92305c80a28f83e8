//! Local directory source - a plain directory treated as its own clone.
//!
//! There is no history to speak of: the backend advertises a single
//! synthetic branch paired with a content fingerprint of the manifest, so
//! the rest of the machinery (version lists, revision checks, caching) works
//! unchanged. Init and update are no-ops; the directory is never copied into
//! the cache.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use url::Url;

use crate::core::manifest::{Analyzer, Lock, Manifest};
use crate::core::package::{self, PackageTree};
use crate::core::project::ProjectRoot;
use crate::core::version::{PairedVersion, Revision, Version};
use crate::sources::source::SourceAdapter;
use crate::util::fs::export_tree;
use crate::util::hash::{sha256_file, sha256_str};

/// The single synthetic branch a local directory advertises.
pub const LOCAL_BRANCH: &str = "local";

/// A directory on the local filesystem serving as a source.
pub struct LocalSource {
    path: PathBuf,
    url: Url,
}

impl LocalSource {
    pub fn new(path: &Path) -> Result<Self> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let url = Url::from_file_path(&canonical)
            .map_err(|_| anyhow!("invalid local source path: {}", path.display()))?;
        Ok(LocalSource {
            path: canonical,
            url,
        })
    }

    /// Content fingerprint standing in for a VCS revision: the hash of the
    /// manifest when there is one, of the location otherwise.
    fn current_revision(&self) -> Result<Revision> {
        let manifest = self.path.join(Manifest::FILE_NAME);
        let digest = if manifest.is_file() {
            sha256_file(&manifest)?
        } else {
            sha256_str(self.url.as_str())
        };
        Ok(Revision::new(digest))
    }

    fn check_revision(&self, revision: &Revision) -> Result<()> {
        let current = self.current_revision()?;
        if *revision != current {
            bail!(
                "revision {} not present in local source {}",
                revision,
                self.path.display()
            );
        }
        Ok(())
    }
}

impl SourceAdapter for LocalSource {
    fn source_type(&self) -> &'static str {
        "local"
    }

    fn upstream_url(&self) -> &Url {
        &self.url
    }

    fn exists_locally(&self) -> bool {
        self.path.is_dir()
    }

    fn exists_upstream(&self) -> bool {
        // The directory is its own upstream.
        self.path.is_dir()
    }

    fn init_local(&self) -> Result<()> {
        if !self.path.is_dir() {
            bail!("local source {} does not exist", self.path.display());
        }
        Ok(())
    }

    fn update_local(&self) -> Result<()> {
        Ok(())
    }

    fn list_versions(&self) -> Result<Vec<PairedVersion>> {
        Ok(vec![PairedVersion::new(
            Version::Branch(LOCAL_BRANCH.to_string()),
            self.current_revision()?,
        )])
    }

    fn get_manifest_and_lock(
        &self,
        root: &ProjectRoot,
        revision: &Revision,
        analyzer: &dyn Analyzer,
    ) -> Result<(Manifest, Option<Lock>)> {
        self.check_revision(revision)?;
        analyzer.derive(&self.path, root)
    }

    fn list_packages(&self, root: &ProjectRoot, revision: &Revision) -> Result<PackageTree> {
        self.check_revision(revision)?;
        package::list_packages(&self.path, root)
    }

    fn revision_present_in(&self, revision: &Revision) -> Result<bool> {
        Ok(*revision == self.current_revision()?)
    }

    fn export_revision_to(&self, revision: &Revision, to: &Path) -> Result<()> {
        self.check_revision(revision)?;
        export_tree(&self.path, to)
    }
}
