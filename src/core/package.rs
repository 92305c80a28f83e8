//! Package tree enumeration over a checked-out source tree.
//!
//! A project may hold several packages: any directory beneath the root with
//! its own manifest. Enumeration is forgiving - a package whose manifest does
//! not parse is recorded in place with its error rather than failing the
//! whole walk, so the resolver can report precisely which subtree is broken.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::{DirEntry, WalkDir};

use crate::core::manifest::Manifest;
use crate::core::project::ProjectRoot;

/// A single package discovered beneath a project root.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    /// Name declared in the package's manifest.
    pub name: String,
    /// Import path: the project root joined with the package's relative path.
    pub import_path: String,
}

/// A discovered package, or the error that kept its manifest from parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum PackageOrErr {
    Package(Package),
    Err(String),
}

/// All packages found beneath one revision of a project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageTree {
    pub import_root: String,
    /// Keyed by import path.
    pub packages: BTreeMap<String, PackageOrErr>,
}

impl PackageTree {
    /// Packages that parsed cleanly.
    pub fn valid_packages(&self) -> impl Iterator<Item = (&str, &Package)> {
        self.packages.iter().filter_map(|(path, p)| match p {
            PackageOrErr::Package(pkg) => Some((path.as_str(), pkg)),
            PackageOrErr::Err(_) => None,
        })
    }
}

/// Walk `dir` and collect every directory holding a manifest into a
/// [`PackageTree`] rooted at `root`.
///
/// Hidden directories (`.git` and friends) are skipped.
pub fn list_packages(dir: &Path, root: &ProjectRoot) -> Result<PackageTree> {
    let mut packages = BTreeMap::new();

    for entry in WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry =
            entry.with_context(|| format!("failed to walk source tree: {}", dir.display()))?;
        if !entry.file_type().is_file() || entry.file_name() != Manifest::FILE_NAME {
            continue;
        }

        let pkg_dir = entry.path().parent().unwrap_or(dir);
        let import_path = import_path_for(dir, pkg_dir, root);

        let pkg = match Manifest::load(entry.path()) {
            Ok(manifest) => PackageOrErr::Package(Package {
                name: manifest.package.name,
                import_path: import_path.clone(),
            }),
            Err(err) => PackageOrErr::Err(format!("{err:#}")),
        };
        packages.insert(import_path, pkg);
    }

    Ok(PackageTree {
        import_root: root.to_string(),
        packages,
    })
}

fn import_path_for(base: &Path, pkg_dir: &Path, root: &ProjectRoot) -> String {
    match pkg_dir.strip_prefix(base) {
        Ok(rel) if !rel.as_os_str().is_empty() => {
            format!("{}/{}", root, rel.display())
        }
        _ => root.to_string(),
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}
