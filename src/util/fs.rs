//! Filesystem utilities.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Directory names that are VCS bookkeeping, not working-tree content.
const VCS_DIRS: &[&str] = &[".git", ".hg", ".bzr", ".svn"];

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Recursively copy a directory.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("failed to create directory: {}", dst.display()))?;

    for entry in
        fs::read_dir(src).with_context(|| format!("failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if ty.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
        }
    }
    Ok(())
}

/// Copy a working tree into `dst`, leaving VCS bookkeeping behind.
///
/// Only the immediate parent chain of `dst` is pre-created; `dst` itself must
/// not already exist, since a partial prior export would otherwise be merged
/// into silently.
pub fn export_tree(src: &Path, dst: &Path) -> Result<()> {
    if dst.exists() {
        bail!("export destination already exists: {}", dst.display());
    }
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }

    fs::create_dir(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    for entry in
        fs::read_dir(src).with_context(|| format!("failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        if entry.file_type()?.is_dir() {
            if let Some(s) = name.to_str() {
                if VCS_DIRS.contains(&s) {
                    continue;
                }
            }
            copy_dir_all(&entry.path(), &dst.join(&name))?;
        } else {
            fs::copy(entry.path(), dst.join(&name))
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}
