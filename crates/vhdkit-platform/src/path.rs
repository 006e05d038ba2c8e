//! Path helpers for parent locators.
//!
//! A differencing image records where its parent lives in three ways: the parent's
//! base name, its absolute path, and its path relative to the child's directory.
//! These helpers compute those forms purely lexically; nothing here touches the
//! filesystem beyond resolving the current directory for relative inputs.

use crate::{PlatformError, Result};
use std::path::{Component, Path, PathBuf};

/// Longest path, in UTF-8 bytes, that may be recorded in a parent locator
pub const MAX_PATH_BYTES: usize = 1024;

/// Final component of `path` as UTF-8.
pub fn file_name(path: &Path) -> Result<&str> {
    let name = path
        .file_name()
        .ok_or_else(|| PlatformError::InvalidSequence(format!("{} has no file name", path.display())))?;
    name.to_str()
        .ok_or_else(|| PlatformError::NonUnicodePath(path.to_path_buf()))
}

/// `path` made absolute and with `.` and `..` components folded away.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    let abs = std::path::absolute(path)?;
    let mut out = PathBuf::new();
    for component in abs.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    check_len(&out)?;
    Ok(out)
}

/// Path of `target` relative to the directory `from_dir`.
///
/// Both inputs are made absolute first. Fails with [`PlatformError::NotRelative`]
/// when they have different roots (e.g. different drive letters).
pub fn relative_path(from_dir: &Path, target: &Path) -> Result<PathBuf> {
    let from = absolute(from_dir)?;
    let to = absolute(target)?;

    let from_parts: Vec<Component<'_>> = from.components().collect();
    let to_parts: Vec<Component<'_>> = to.components().collect();

    if from_parts.first() != to_parts.first() {
        return Err(PlatformError::NotRelative { from, to });
    }

    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from_parts.len() {
        rel.push("..");
    }
    for part in &to_parts[common..] {
        rel.push(part.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }

    check_len(&rel)?;
    Ok(rel)
}

/// Convert a locator path recorded on another host into this host's separators.
///
/// Locators are written by Windows tools with `\`; on other hosts those become `/`.
pub fn normalize_separators(raw: &str) -> String {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            raw.to_string()
        } else {
            raw.replace('\\', "/")
        }
    }
}

fn check_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len > MAX_PATH_BYTES {
        return Err(PlatformError::PathTooLong {
            len,
            max: MAX_PATH_BYTES,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        assert_eq!(file_name(Path::new("/a/b/parent.vhd")).unwrap(), "parent.vhd");
        assert_eq!(file_name(Path::new("parent.vhd")).unwrap(), "parent.vhd");
        assert!(file_name(Path::new("/")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_sibling() {
        let rel = relative_path(Path::new("/images"), Path::new("/images/base.vhd")).unwrap();
        assert_eq!(rel, PathBuf::from("base.vhd"));
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_up_and_over() {
        let rel = relative_path(Path::new("/images/diffs/a"), Path::new("/images/base/b.vhd")).unwrap();
        assert_eq!(rel, PathBuf::from("../../base/b.vhd"));
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_folds_dots() {
        let rel = relative_path(Path::new("/images/./diffs/../diffs"), Path::new("/images/base.vhd")).unwrap();
        assert_eq!(rel, PathBuf::from("../base.vhd"));
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_same_dir_is_dot() {
        let rel = relative_path(Path::new("/images"), Path::new("/images")).unwrap();
        assert_eq!(rel, PathBuf::from("."));
    }

    #[test]
    fn test_relative_from_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let rel = relative_path(&cwd, Path::new("child.vhd")).unwrap();
        assert_eq!(rel, PathBuf::from("child.vhd"));
    }

    #[test]
    fn test_path_too_long() {
        let long = "x".repeat(MAX_PATH_BYTES + 1);
        let err = absolute(Path::new(&long)).unwrap_err();
        assert!(matches!(err, PlatformError::PathTooLong { .. }));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_normalize_separators() {
        assert_eq!(normalize_separators(r"..\base\disk.vhd"), "../base/disk.vhd");
        assert_eq!(normalize_separators("plain.vhd"), "plain.vhd");
    }
}
