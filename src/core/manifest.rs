//! Manifest and lock data handed to the resolver.
//!
//! The manifest (`Quay.toml`) declares what a project needs; the lock
//! (`Quay.lock`) records what a previous resolution pinned. The core never
//! interprets either beyond parsing - it derives them from checked-out trees
//! via an [`Analyzer`] and memoizes the results per revision.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use semver::VersionReq;
use serde::{Deserialize, Serialize};

use crate::core::project::ProjectRoot;
use crate::core::version::{Revision, Version};

/// A single dependency requirement as declared in a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Semver requirement; absent means any version is acceptable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req: Option<VersionReq>,

    /// Explicit source location overriding deduction from the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageSection {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<semver::Version>,
}

/// The parsed `Quay.toml` manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub package: PackageSection,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, DependencySpec>,

    /// Dependencies only needed by this project's own tests.
    #[serde(
        default,
        rename = "dev-dependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dev_dependencies: BTreeMap<String, DependencySpec>,
}

impl Manifest {
    pub const FILE_NAME: &'static str = "Quay.toml";

    /// Parse manifest text.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("failed to parse manifest")
    }

    /// Load a manifest from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid manifest: {}", path.display()))
    }
}

/// One pinned project recorded in a lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockedProject {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,

    pub revision: Revision,
}

/// The parsed `Quay.lock`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    #[serde(default, rename = "project")]
    pub projects: Vec<LockedProject>,
}

impl Lock {
    pub const FILE_NAME: &'static str = "Quay.lock";

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("failed to parse lock")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read lock: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid lock: {}", path.display()))
    }
}

/// Identity of an analyzer. Derived manifests are cached per
/// `(revision, analyzer identity)`; two analyzers differing in name or
/// version never share entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnalyzerInfo {
    pub name: String,
    pub version: semver::Version,
}

impl AnalyzerInfo {
    pub fn new(name: impl Into<String>, version: semver::Version) -> Self {
        AnalyzerInfo {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for AnalyzerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.version)
    }
}

/// Derives manifest and lock data from a checked-out source tree.
pub trait Analyzer: Send + Sync {
    /// Stable identity used to key cached results.
    fn info(&self) -> AnalyzerInfo;

    /// Analyze the tree at `local_path`, rooted at `root`.
    ///
    /// A project without a lock is normal; a project the analyzer cannot make
    /// sense of at all is an error.
    fn derive(&self, local_path: &Path, root: &ProjectRoot) -> Result<(Manifest, Option<Lock>)>;
}

/// Default analyzer: reads `Quay.toml` and, when present, `Quay.lock` at the
/// tree root.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestAnalyzer;

impl Analyzer for ManifestAnalyzer {
    fn info(&self) -> AnalyzerInfo {
        AnalyzerInfo::new("quay", semver::Version::new(1, 0, 0))
    }

    fn derive(&self, local_path: &Path, root: &ProjectRoot) -> Result<(Manifest, Option<Lock>)> {
        let manifest_path = local_path.join(Manifest::FILE_NAME);
        if !manifest_path.is_file() {
            bail!("no {} at the root of `{}`", Manifest::FILE_NAME, root);
        }
        let manifest = Manifest::load(&manifest_path)?;

        let lock_path = local_path.join(Lock::FILE_NAME);
        let lock = if lock_path.is_file() {
            Some(Lock::load(&lock_path)?)
        } else {
            None
        };

        Ok((manifest, lock))
    }
}
