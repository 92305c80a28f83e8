//! Quay - source coordination core for versioned dependency management.
//!
//! Given abstract project identifiers (human-friendly import paths that may
//! or may not coincide with a repository URL), quay discovers the actual
//! upstream location, manages a local on-disk clone, serializes concurrent
//! access to it, and answers the version, revision, manifest and package-tree
//! queries a dependency resolver needs.

pub mod core;
pub mod deduce;
pub mod sources;
pub mod supervisor;
pub mod util;

/// Test doubles for quay unit tests.
///
/// Only available when running tests; provides mock adapters, probes and
/// deducers so coordination behavior can be exercised without real backends.
#[cfg(test)]
pub mod test_support;

pub use crate::core::manifest::{Analyzer, AnalyzerInfo, Lock, Manifest, ManifestAnalyzer};
pub use crate::core::package::PackageTree;
pub use crate::core::project::{ProjectIdentifier, ProjectRoot};
pub use crate::core::version::{PairedVersion, Revision, Version};
pub use crate::deduce::{Deducer, Deduction, UrlDeducer};
pub use crate::sources::{SourceAdapter, SourceCoordinator, SourceError, SourceGateway, SourceState};
pub use crate::supervisor::{CallKind, Supervisor};
