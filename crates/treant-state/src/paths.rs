//! Absolute/relative path pairs stored in records.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::Result;

/// A file referenced by a record, by absolute path and by path relative to
/// the record's own directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPair {
    pub abspath: String,
    pub relpath: String,
}

impl PathPair {
    /// Build a pair for `path` as seen from `location`.
    ///
    /// `path` may be relative to the working directory; it is made absolute
    /// first. The relative half is always derived, never taken from input.
    pub fn resolve(path: impl AsRef<Path>, location: &Path) -> Result<Self> {
        let abspath = absolutize(path.as_ref())?;
        let relpath = relative_path(location, &abspath);
        Ok(Self {
            abspath: abspath.to_string_lossy().into_owned(),
            relpath: relpath.to_string_lossy().into_owned(),
        })
    }
}

/// Make `path` absolute against the working directory and drop `.`/`..`
/// components lexically.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    let abs = std::path::absolute(path).map_err(|e| StateError::io(path, e))?;
    Ok(normalize(&abs))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Lexical path from directory `base` to `target`. Both must be absolute.
pub fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base = normalize(base);
    let target = normalize(target);

    let base_parts: Vec<_> = base.components().collect();
    let target_parts: Vec<_> = target.components().collect();
    let common = base_parts
        .iter()
        .zip(&target_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base_parts.len() {
        rel.push("..");
    }
    for part in &target_parts[common..] {
        rel.push(part.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_directory() {
        let rel = relative_path(Path::new("/a/b/sim"), Path::new("/a/b/data/top.pdb"));
        assert_eq!(rel, PathBuf::from("../data/top.pdb"));
    }

    #[test]
    fn file_inside_location() {
        let rel = relative_path(Path::new("/a/sim"), Path::new("/a/sim/run1.xtc"));
        assert_eq!(rel, PathBuf::from("run1.xtc"));
    }

    #[test]
    fn same_directory_is_dot() {
        let rel = relative_path(Path::new("/a/sim"), Path::new("/a/sim"));
        assert_eq!(rel, PathBuf::from("."));
    }

    #[test]
    fn resolve_ignores_dot_segments() {
        let pair = PathPair::resolve("/a/x/../sim/./top.pdb", Path::new("/a/sim")).unwrap();
        assert_eq!(pair.abspath, "/a/sim/top.pdb");
        assert_eq!(pair.relpath, "top.pdb");
    }
}
