//! # vhdkit Platform
//!
//! Platform adapters used by the VHD engine at its edges.
//!
//! The engine itself only deals in sectors. Everything that depends on the host
//! (how a path is opened, how two paths relate to each other, how text is stored in
//! the UTF-16 fields of a differencing header) lives here:
//!
//! - [`file`]: open an image path in a given mode, surfacing the OS error code
//! - [`path`]: base names, child-to-parent relative paths, separator normalization
//! - [`text`]: UTF-8 <-> UTF-16 (big or little endian) with explicit failure reporting

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::path::PathBuf;
use thiserror::Error;

pub mod file;
pub mod path;
pub mod text;

pub use file::{open_file, OpenMode};
pub use path::{absolute, file_name, normalize_separators, relative_path, MAX_PATH_BYTES};
pub use text::{decode_utf16, encode_utf16, encode_utf16_into, Endian};

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Opening a file failed; carries the OS error code when there is one
    #[error("Cannot open {}: {source} (os error {})", path.display(), code.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
    Open {
        /// Path that failed to open
        path: PathBuf,
        /// Raw OS error code
        code: Option<i32>,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Access denied
    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// File not found
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Input text could not be transcoded
    #[error("Invalid text sequence: {0}")]
    InvalidSequence(String),

    /// Encoded text does not fit the destination buffer
    #[error("Encoded text needs {needed} bytes but only {capacity} are available")]
    BufferOverflow {
        /// Bytes required
        needed: usize,
        /// Bytes available
        capacity: usize,
    },

    /// Path exceeds the storable length
    #[error("Path is {len} bytes long, maximum is {max}")]
    PathTooLong {
        /// Length in bytes
        len: usize,
        /// Maximum length in bytes
        max: usize,
    },

    /// No relative path exists between the two paths (e.g. different drives)
    #[error("No relative path from {} to {}", from.display(), to.display())]
    NotRelative {
        /// Starting directory
        from: PathBuf,
        /// Target path
        to: PathBuf,
    },

    /// Path is not valid Unicode and cannot be stored in a VHD header
    #[error("Path is not valid Unicode: {}", .0.display())]
    NonUnicodePath(PathBuf),
}

impl PlatformError {
    /// Raw OS error code, if this error came from the operating system
    pub fn os_code(&self) -> Option<i32> {
        match self {
            PlatformError::Open { code, .. } => *code,
            PlatformError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlatformError::PermissionDenied(PathBuf::from("/images/a.vhd"));
        assert!(err.to_string().contains("Permission denied"));
        assert!(err.to_string().contains("a.vhd"));

        let err = PlatformError::NotFound(PathBuf::from("/images/missing.vhd"));
        assert!(err.to_string().contains("not found"));

        let err = PlatformError::PathTooLong { len: 2000, max: 1024 };
        assert!(err.to_string().contains("2000"));
        assert!(err.to_string().contains("1024"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let platform_err: PlatformError = io_err.into();
        assert!(matches!(platform_err, PlatformError::Io(_)));
    }

    #[test]
    fn test_open_error_carries_code() {
        let err = PlatformError::Open {
            path: PathBuf::from("x.vhd"),
            code: Some(13),
            source: std::io::Error::from_raw_os_error(13),
        };
        assert_eq!(err.os_code(), Some(13));
        assert!(err.to_string().contains("os error 13"));

        let err = PlatformError::InvalidSequence("lone surrogate".to_string());
        assert_eq!(err.os_code(), None);
    }
}
