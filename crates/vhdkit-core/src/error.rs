//! Error types for the vhdkit core library

use thiserror::Error;
use uuid::Uuid;
use vhdkit_platform::PlatformError;

/// Main error type for VHD operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error during read/write operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File open, path or text-encoding failure from the platform layer
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// Memory for a table or bitmap could not be reserved
    #[error("Cannot allocate {bytes} bytes")]
    Allocation {
        /// Requested size in bytes
        bytes: usize,
    },

    /// The file does not end in a footer carrying the "conectix" cookie
    #[error("Not a VHD image")]
    NotVhd,

    /// Footer disk type is not fixed, dynamic or differencing
    #[error("Unsupported disk type {0}")]
    UnsupportedType(u32),

    /// Stored footer checksum does not match its contents
    #[error("Footer checksum mismatch: stored 0x{stored:08X}, computed 0x{computed:08X}")]
    FooterChecksum {
        /// Checksum read from the file
        stored: u32,
        /// Checksum computed over the record
        computed: u32,
    },

    /// Stored sparse header checksum does not match its contents
    #[error("Sparse header checksum mismatch: stored 0x{stored:08X}, computed 0x{computed:08X}")]
    SparseChecksum {
        /// Checksum read from the file
        stored: u32,
        /// Checksum computed over the record
        computed: u32,
    },

    /// Geometry with a zero dimension
    #[error("Invalid geometry {cyl}/{heads}/{spt}")]
    InvalidGeometry {
        /// Cylinders
        cyl: u16,
        /// Heads
        heads: u8,
        /// Sectors per track
        spt: u8,
    },

    /// None of the parent locators of a differencing image names an existing file
    #[error("Parent image not found: {0}")]
    ParentNotFound(String),

    /// The located parent is not the image this differencing image was created from
    #[error("Parent UUID mismatch: expected {expected}, found {found}")]
    ParentUuidMismatch {
        /// UUID recorded in the child's sparse header
        expected: Uuid,
        /// UUID of the parent that was found
        found: Uuid,
    },

    /// Structurally inconsistent image
    #[error("Corrupt image: {0}")]
    Corrupt(String),

    /// Caller buffer cannot hold the requested sectors
    #[error("Buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// Raw image size cannot be represented exactly by a VHD geometry
    #[error("Raw image is {raw_size} bytes but the closest VHD geometry holds {vhd_size} bytes")]
    ConversionSize {
        /// Raw image size in bytes
        raw_size: u64,
        /// Capacity of the computed geometry
        vhd_size: u64,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Image contents differ from the reference
    #[error("Verification failed at offset {offset}: {mismatches} mismatched sector(s)")]
    VerificationFailed {
        /// Byte offset of the first mismatch
        offset: u64,
        /// Number of mismatched sectors
        mismatches: u64,
    },
}

/// Result type alias using the vhdkit error type
pub type Result<T> = std::result::Result<T, Error>;
