//! # vhdkit Core
//!
//! Sector-level engine for fixed, dynamic (sparse) and differencing VHD images.
//!
//! ## Modules
//!
//! - `geometry`: CHS geometry from a requested size
//! - `footer`, `header`: on-disk footer and sparse header records
//! - `checksum`: one's-complement checksum over both records
//! - `bat`, `bitmap`: block allocation table and sector bitmap cache
//! - `image`: opening, flushing and closing images and their parent chains
//! - `io`: sector reads, writes and formatting
//! - `create`: creating fixed, dynamic and differencing images
//! - `convert`, `verify`: raw image conversion and comparison
//! - `inspect`: image information and consistency findings
//! - `config`: runtime creation options
//! - `settings`: persistent user settings from configuration file
//! - `error`: error types and result aliases
//!
//! ## Example
//!
//! ```ignore
//! use vhdkit_core::{calculate_geometry, create_sparse, Image};
//!
//! let (geometry, _) = calculate_geometry(64);
//! let mut image = create_sparse("disk.vhd", geometry)?;
//! image.write_sectors(0, 1, &[0xAA; 512])?;
//! image.close()?;
//!
//! let mut image = Image::open("disk.vhd", true)?;
//! let mut buf = [0u8; 1024];
//! let truncated = image.read_sectors(0, 2, &mut buf)?;
//! assert_eq!(truncated, 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bat;
pub mod bitmap;
pub mod checksum;
pub mod config;
pub mod convert;
pub mod create;
pub mod error;
pub mod footer;
pub mod geometry;
pub mod header;
pub mod image;
pub mod inspect;
pub mod io;
pub mod progress;
pub mod settings;
pub mod verify;

/// Bytes per sector
pub const SECTOR_SIZE: usize = 512;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use bat::{Bat, BlockLayout, BAT_UNALLOCATED, BLOCK_PADDING_SECTORS};
pub use checksum::Record;
pub use config::{CreateOptions, MAX_BLOCK_SIZE};
pub use convert::{
    convert_to_raw, convert_to_vhd_fixed, convert_to_vhd_sparse, raw_geometry, ConvertConfig,
    ConvertResult, Converter, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE,
};
pub use create::{
    create_differencing, create_differencing_with, create_fixed, create_fixed_with,
    create_sparse, create_sparse_with,
};
pub use error::{Error, Result};
pub use footer::{DiskType, Footer};
pub use geometry::{calculate_geometry, calculate_geometry_bytes, Geometry};
pub use header::{ParentLocator, SparseHeader, DEFAULT_BLOCK_SIZE};
pub use image::{is_vhd, Image};
pub use inspect::{Finding, ImageInfo};
pub use progress::{format_duration, format_speed, Progress, ProgressCallback};
pub use settings::{
    BehaviorSettings, ConvertSettings, CreateSettings, ImageKind, Settings, SettingsError,
};
pub use verify::{verify_against_raw, Verifier, VerifyResult};
