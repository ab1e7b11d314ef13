use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Resolves a file name recorded in a parity archive against the archive's directory.
///
/// Names come from untrusted volumes: absolute paths, `..`, and prefixes are rejected so a
/// repair can never write outside `dir`.
pub fn resolve(dir: &Path, name: &str) -> Result<PathBuf> {
    let rel = Path::new(name);
    if name.is_empty() || rel.is_absolute() {
        return Err(Error::UnsafeFileName(name.to_string()));
    }
    for comp in rel.components() {
        if !matches!(comp, Component::Normal(_)) {
            return Err(Error::UnsafeFileName(name.to_string()));
        }
    }
    Ok(dir.join(rel))
}
