//! Opening image files.
//!
//! The engine opens every image through [`open_file`] so that failures carry the
//! path and the raw OS error code, and so that platform-specific open flags stay
//! out of the core crate.

use crate::{PlatformError, Result};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

/// How an image file should be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, read only
    Read,
    /// Existing file, read and write
    ReadWrite,
    /// New file, read and write; an existing file is truncated
    Create,
}

impl OpenMode {
    /// Whether the mode permits writing
    pub fn is_writable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    fn options(self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        match self {
            OpenMode::Read => {
                opts.read(true);
            }
            OpenMode::ReadWrite => {
                opts.read(true).write(true);
            }
            OpenMode::Create => {
                opts.read(true).write(true).create(true).truncate(true);
            }
        }

        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::fs::OpenOptionsExt;
                if self == OpenMode::Create {
                    opts.mode(0o644);
                }
            } else if #[cfg(windows)] {
                use std::os::windows::fs::OpenOptionsExt;
                // FILE_SHARE_READ: other readers may open a parent image concurrently
                const FILE_SHARE_READ: u32 = 0x0000_0001;
                if self == OpenMode::Read {
                    opts.share_mode(FILE_SHARE_READ);
                }
            }
        }

        opts
    }
}

/// Open `path` in the requested mode.
///
/// Permission and not-found failures map to their dedicated variants; anything
/// else is reported as [`PlatformError::Open`] with the raw OS error code.
pub fn open_file(path: &Path, mode: OpenMode) -> Result<File> {
    debug!("Opening {} ({:?})", path.display(), mode);

    mode.options().open(path).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => PlatformError::PermissionDenied(path.to_path_buf()),
        ErrorKind::NotFound => PlatformError::NotFound(path.to_path_buf()),
        _ => PlatformError::Open {
            path: path.to_path_buf(),
            code: e.raw_os_error(),
            source: e,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    #[test]
    fn test_create_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.vhd");

        let mut f = open_file(&path, OpenMode::Create).unwrap();
        f.write_all(b"conectix").unwrap();
        drop(f);

        let mut f = open_file(&path, OpenMode::Read).unwrap();
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"conectix");
    }

    #[test]
    fn test_create_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.vhd");
        std::fs::write(&path, vec![0xAA; 4096]).unwrap();

        let f = open_file(&path, OpenMode::Create).unwrap();
        assert_eq!(f.metadata().unwrap().len(), 0);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.vhd");

        let err = open_file(&path, OpenMode::ReadWrite).unwrap_err();
        assert!(matches!(err, PlatformError::NotFound(_)));
    }

    #[test]
    fn test_read_mode_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.vhd");
        std::fs::write(&path, [0u8; 512]).unwrap();

        let mut f = open_file(&path, OpenMode::Read).unwrap();
        assert!(f.write_all(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_mode_writable() {
        assert!(!OpenMode::Read.is_writable());
        assert!(OpenMode::ReadWrite.is_writable());
        assert!(OpenMode::Create.is_writable());
    }
}
