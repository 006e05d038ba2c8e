//! Options for creating images

use crate::error::{Error, Result};
use crate::footer::DEFAULT_CREATOR_APP;
use crate::header::DEFAULT_BLOCK_SIZE;
use crate::SECTOR_SIZE;

/// Largest accepted data block size (256 MiB)
pub const MAX_BLOCK_SIZE: u32 = 256 * 1024 * 1024;

/// Options used when creating a new image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    /// Data block size of dynamic and differencing images, in bytes
    pub block_size: u32,

    /// Creator application tag stored in the footer
    pub creator_app: [u8; 4],
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            creator_app: DEFAULT_CREATOR_APP,
        }
    }
}

impl CreateOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set block size
    pub fn block_size(mut self, size: u32) -> Self {
        self.block_size = size;
        self
    }

    /// Set creator application tag
    pub fn creator_app(mut self, tag: [u8; 4]) -> Self {
        self.creator_app = tag;
        self
    }

    /// Check the options describe a writable image
    pub fn validate(&self) -> Result<()> {
        let sector = SECTOR_SIZE as u32;
        if self.block_size < sector || self.block_size % sector != 0 {
            return Err(Error::InvalidConfig(format!(
                "block size {} is not a positive multiple of {}",
                self.block_size, sector
            )));
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "block size {} exceeds {}",
                self.block_size, MAX_BLOCK_SIZE
            )));
        }
        Ok(())
    }
}
