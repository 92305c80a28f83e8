//! Versions and revisions - the two ways of naming a point in history.
//!
//! A [`Version`] is a movable, human-facing handle (branch, tag, semantic
//! version). A [`Revision`] is the backend's immutable identifier for one
//! point in history, e.g. a git commit hash. The mapping from version to
//! revision is many-to-one and can change upstream at any time; a revision
//! may be known to exist without belonging to any current version.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An immutable backend identifier for a point in a source's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Create a revision from the backend's identifier string.
    pub fn new(s: impl Into<String>) -> Self {
        Revision(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Revision {
    fn from(s: &str) -> Self {
        Revision(s.to_string())
    }
}

/// A named, movable handle into a source's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    /// A branch head; moves with every push.
    Branch(String),
    /// A plain tag that does not parse as a semantic version.
    Tag(String),
    /// A tag that parses as a semantic version.
    Semver(semver::Version),
}

impl Version {
    /// Classify a tag name, preferring a semantic-version reading.
    ///
    /// An optional leading `v` is accepted; `v1.2.3` and `1.2.3` both become
    /// `Semver(1.2.3)`, while `nightly` stays a plain tag.
    pub fn from_tag(name: &str) -> Version {
        let trimmed = name.strip_prefix('v').unwrap_or(name);
        match semver::Version::parse(trimmed) {
            Ok(v) => Version::Semver(v),
            Err(_) => Version::Tag(name.to_string()),
        }
    }

    /// Whether this version is a branch (and so can move without warning).
    pub fn is_branch(&self) -> bool {
        matches!(self, Version::Branch(_))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Branch(b) => f.write_str(b),
            Version::Tag(t) => f.write_str(t),
            Version::Semver(v) => write!(f, "v{}", v),
        }
    }
}

/// A version paired with the revision it pointed at when observed.
///
/// The atomic unit returned by version listings: the pairing is a snapshot,
/// not a guarantee that upstream still agrees.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairedVersion {
    pub version: Version,
    pub revision: Revision,
}

impl PairedVersion {
    pub fn new(version: Version, revision: Revision) -> Self {
        PairedVersion { version, revision }
    }
}

impl fmt::Display for PairedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.version, self.revision)
    }
}
