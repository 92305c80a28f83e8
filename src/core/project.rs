//! Project identity - how callers name a source before it is resolved.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The root import path of a project, as the resolver sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectRoot(String);

impl ProjectRoot {
    pub fn new(s: impl Into<String>) -> Self {
        ProjectRoot(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectRoot {
    fn from(s: &str) -> Self {
        ProjectRoot(s.to_string())
    }
}

/// A project identifier: an import-path-like root, plus an optional explicit
/// source location that overrides deduction from the root.
///
/// Two identifiers may normalize to the same name, and distinct normalized
/// names may still resolve to the same canonical source URL. The coordinator
/// folds both levels of aliasing onto one gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectIdentifier {
    pub project_root: ProjectRoot,
    pub source: Option<String>,
}

impl ProjectIdentifier {
    pub fn new(root: impl Into<String>) -> Self {
        ProjectIdentifier {
            project_root: ProjectRoot::new(root),
            source: None,
        }
    }

    pub fn with_source(root: impl Into<String>, source: impl Into<String>) -> Self {
        ProjectIdentifier {
            project_root: ProjectRoot::new(root),
            source: Some(source.into()),
        }
    }

    /// The string the coordinator keys in-flight set-up work on.
    ///
    /// The explicit source wins over the root. Spellings that normalize alike
    /// share one set-up worker.
    pub fn normalized(&self) -> String {
        let raw = self
            .source
            .as_deref()
            .unwrap_or_else(|| self.project_root.as_str());
        normalize_name(raw)
    }
}

impl fmt::Display for ProjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) if source != self.project_root.as_str() => {
                write!(f, "{} (from {})", self.project_root, source)
            }
            _ => self.project_root.fmt(f),
        }
    }
}

/// Canonical string form of a raw identifier: surrounding whitespace,
/// trailing slashes and a trailing `.git` are dropped.
pub(crate) fn normalize_name(raw: &str) -> String {
    let s = raw.trim().trim_end_matches('/');
    let s = s.strip_suffix(".git").unwrap_or(s);
    s.to_string()
}
