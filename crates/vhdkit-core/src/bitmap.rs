//! Single-slot sector bitmap cache
//!
//! Each allocated block is preceded by a bitmap with one bit per sector, most
//! significant bit first. Sector loops walk addresses in ascending order, so only
//! the bitmap of the block currently being touched is kept in memory.

use crate::bat::Bat;
use crate::error::{Error, Result};
use crate::SECTOR_SIZE;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::trace;

/// Bitmap of one block, cached in memory
#[derive(Debug)]
pub struct BitmapCache {
    block: Option<u32>,
    bits: Vec<u8>,
    dirty: bool,
}

impl BitmapCache {
    /// An empty cache for bitmaps of `bitmap_sectors` sectors
    pub fn new(bitmap_sectors: u32) -> Result<Self> {
        let bytes = bitmap_sectors as usize * SECTOR_SIZE;
        let mut bits = Vec::new();
        bits.try_reserve_exact(bytes)
            .map_err(|_| Error::Allocation { bytes })?;
        bits.resize(bytes, 0);
        Ok(Self {
            block: None,
            bits,
            dirty: false,
        })
    }

    /// Block whose bitmap is cached
    pub fn cached_block(&self) -> Option<u32> {
        self.block
    }

    /// Whether the cached bitmap has changes not yet on disk
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Point the cache at block `blk`.
    ///
    /// The previously cached bitmap is flushed first. An allocated block's bitmap is
    /// read from disk; an unallocated block starts with every bit clear.
    pub fn select<F: Read + Write + Seek>(&mut self, file: &mut F, bat: &Bat, blk: u32) -> Result<()> {
        if self.block == Some(blk) {
            return Ok(());
        }
        self.flush(file, bat)?;

        match bat.get(blk) {
            Some(sector) => {
                file.seek(SeekFrom::Start(u64::from(sector) * SECTOR_SIZE as u64))?;
                file.read_exact(&mut self.bits)?;
            }
            None => self.bits.fill(0),
        }
        trace!("Bitmap cache now holds block {}", blk);
        self.block = Some(blk);
        Ok(())
    }

    /// Write the cached bitmap back if it changed and its block has storage
    pub fn flush<F: Write + Seek>(&mut self, file: &mut F, bat: &Bat) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(sector) = self.block.and_then(|blk| bat.get(blk)) {
            file.seek(SeekFrom::Start(u64::from(sector) * SECTOR_SIZE as u64))?;
            file.write_all(&self.bits)?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Whether sector `sib` of the cached block holds data of this image
    pub fn is_set(&self, sib: u32) -> bool {
        let byte = (sib / 8) as usize;
        let mask = 0x80u8 >> (sib % 8);
        self.bits.get(byte).is_some_and(|b| b & mask != 0)
    }

    /// Mark sector `sib` of the cached block as written
    pub fn set(&mut self, sib: u32) {
        let byte = (sib / 8) as usize;
        let mask = 0x80u8 >> (sib % 8);
        if let Some(b) = self.bits.get_mut(byte) {
            if *b & mask == 0 {
                *b |= mask;
                self.dirty = true;
            }
        }
    }

    /// Cached bitmap bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}
