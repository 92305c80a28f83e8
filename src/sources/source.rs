//! Source adapter trait - the uniform surface over one on-disk clone.

use std::path::Path;

use anyhow::Result;
use url::Url;

use crate::core::manifest::{Analyzer, Lock, Manifest};
use crate::core::package::PackageTree;
use crate::core::project::ProjectRoot;
use crate::core::version::{PairedVersion, Revision};

/// A backend-specific wrapper around one on-disk clone of one upstream
/// source.
///
/// Adapters are blocking: the gateway dispatches everything that may touch
/// the network or reposition the working tree through the supervisor, which
/// also owns cancellation. Operations that reposition the working tree
/// (`get_manifest_and_lock`, `list_packages`, `export_revision_to`) serialize
/// on an internal clone mutex and must not be assumed reentrant.
pub trait SourceAdapter: Send + Sync {
    /// Stable short tag identifying the backend, e.g. `"git"`.
    fn source_type(&self) -> &'static str;

    /// The canonical upstream location as the backend reports it.
    fn upstream_url(&self) -> &Url;

    /// Whether an on-disk clone is present and recognized.
    fn exists_locally(&self) -> bool;

    /// One network probe for upstream reachability. No side effects.
    fn exists_upstream(&self) -> bool;

    /// Whether `exists_upstream` needs local state to answer. Backends
    /// without a cheap remote ping return true, and the gateway forces the
    /// clone into existence before asking.
    fn ping_requires_local(&self) -> bool {
        false
    }

    /// Clone the upstream into the cache directory. On success the clone is
    /// both present and current.
    fn init_local(&self) -> Result<()>;

    /// Fetch, bringing the clone up to the upstream head set.
    fn update_local(&self) -> Result<()>;

    /// Query the backend for branches and tags as paired versions.
    fn list_versions(&self) -> Result<Vec<PairedVersion>>;

    /// Position the working tree at `revision`, then run the analyzer on it.
    fn get_manifest_and_lock(
        &self,
        root: &ProjectRoot,
        revision: &Revision,
        analyzer: &dyn Analyzer,
    ) -> Result<(Manifest, Option<Lock>)>;

    /// Position the working tree at `revision`, then enumerate its packages.
    fn list_packages(&self, root: &ProjectRoot, revision: &Revision) -> Result<PackageTree>;

    /// Backend-local query: does `revision` exist in the clone? A missing
    /// revision is a plain `Ok(false)`, not an error.
    fn revision_present_in(&self, revision: &Revision) -> Result<bool>;

    /// Check out `revision` and copy the working tree into `to`, creating
    /// only the parent of `to`.
    fn export_revision_to(&self, revision: &Revision, to: &Path) -> Result<()>;
}
