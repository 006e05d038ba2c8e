//! Sector I/O engine
//!
//! Uniform `read_sectors` / `write_sectors` / `format_sectors` over the three image
//! kinds. Every call clamps the request to the image capacity and returns the number
//! of sectors that were cut off (0 when the whole request was served).
//!
//! | Kind | Read | Write |
//! |---|---|---|
//! | fixed | direct at `sector * 512` | direct |
//! | dynamic | via BAT, zeros for unallocated blocks | allocate on first write, set bitmap bit |
//! | differencing | bitmap bit set: local data, else ask the parent | as dynamic; the parent is never written |

use crate::bat::BlockLayout;
use crate::error::{Error, Result};
use crate::image::{Blocks, Image, Storage};
use crate::SECTOR_SIZE;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::trace;

/// Sectors written per call when zero-filling
const ZERO_CHUNK_SECTORS: u64 = 128;

impl Image {
    /// Sectors addressable by the image geometry
    pub fn total_sectors(&self) -> u32 {
        self.footer.geometry.total_sectors()
    }

    /// Read `count` sectors starting at `offset` into `buf`.
    ///
    /// Returns the number of requested sectors past the end of the image that were
    /// not read. `buf` must hold at least the sectors actually transferred.
    pub fn read_sectors(&mut self, offset: u32, count: u32, buf: &mut [u8]) -> Result<u32> {
        let (transfer, truncated) = self.clamp(offset, count);
        check_buffer(buf.len(), transfer)?;
        if transfer == 0 {
            return Ok(truncated);
        }
        trace!("read {} sector(s) at {}", transfer, offset);

        let out = &mut buf[..transfer as usize * SECTOR_SIZE];
        match &mut self.storage {
            Storage::Fixed => read_fixed(&mut self.file, offset, out)?,
            Storage::Sparse(blocks) => read_sparse(&mut self.file, blocks, offset, out)?,
            Storage::Differencing { blocks, parent } => {
                read_differencing(&mut self.file, blocks, parent, offset, out)?
            }
        }
        Ok(truncated)
    }

    /// Write `count` sectors from `buf` starting at `offset`.
    ///
    /// Blocks of dynamic and differencing images are allocated on first write. On a
    /// read-only image this does nothing and reports success.
    pub fn write_sectors(&mut self, offset: u32, count: u32, buf: &[u8]) -> Result<u32> {
        if self.readonly {
            return Ok(0);
        }
        let (transfer, truncated) = self.clamp(offset, count);
        check_buffer(buf.len(), transfer)?;
        if transfer == 0 {
            return Ok(truncated);
        }
        trace!("write {} sector(s) at {}", transfer, offset);

        let data = &buf[..transfer as usize * SECTOR_SIZE];
        match &mut self.storage {
            Storage::Fixed => {
                self.file.seek(SeekFrom::Start(byte_offset(offset)))?;
                self.file.write_all(data)?;
            }
            Storage::Sparse(blocks) | Storage::Differencing { blocks, .. } => {
                write_sparse(&mut self.file, blocks, offset, data)?;
            }
        }
        Ok(truncated)
    }

    /// Zero `count` sectors starting at `offset`.
    ///
    /// On dynamic images only sectors of allocated blocks are touched; an
    /// unallocated block already reads as zero and is never allocated just to hold
    /// zeros. On differencing images every sector is written so it stops reading
    /// through to the parent.
    pub fn format_sectors(&mut self, offset: u32, count: u32) -> Result<u32> {
        if self.readonly {
            return Ok(0);
        }
        let (transfer, truncated) = self.clamp(offset, count);
        if transfer == 0 {
            return Ok(truncated);
        }
        trace!("format {} sector(s) at {}", transfer, offset);

        match &mut self.storage {
            Storage::Fixed => {
                self.file.seek(SeekFrom::Start(byte_offset(offset)))?;
                write_zero_sectors(&mut self.file, u64::from(transfer))?;
            }
            Storage::Sparse(blocks) => {
                format_sparse(&mut self.file, blocks, offset, transfer, false)?;
            }
            Storage::Differencing { blocks, .. } => {
                format_sparse(&mut self.file, blocks, offset, transfer, true)?;
            }
        }
        Ok(truncated)
    }

    fn clamp(&self, offset: u32, count: u32) -> (u32, u32) {
        let available = self.total_sectors().saturating_sub(offset);
        let transfer = count.min(available);
        (transfer, count - transfer)
    }

    /// Read one sector as seen through this image and its parents
    fn read_chain_sector(&mut self, sector: u32, out: &mut [u8]) -> Result<()> {
        if sector >= self.total_sectors() {
            out.fill(0);
            return Ok(());
        }
        match &mut self.storage {
            Storage::Fixed => read_fixed(&mut self.file, sector, out),
            Storage::Sparse(blocks) => read_sparse(&mut self.file, blocks, sector, out),
            Storage::Differencing { blocks, parent } => {
                read_differencing(&mut self.file, blocks, parent, sector, out)
            }
        }
    }
}

fn check_buffer(len: usize, sectors: u32) -> Result<()> {
    let needed = sectors as usize * SECTOR_SIZE;
    if len < needed {
        return Err(Error::BufferTooSmall {
            needed,
            actual: len,
        });
    }
    Ok(())
}

fn byte_offset(sector: u32) -> u64 {
    u64::from(sector) * SECTOR_SIZE as u64
}

/// Byte offset of sector `sib` inside the block stored at sector `base`
fn data_offset(blocks: &Blocks, base: u32, sib: u32) -> u64 {
    (u64::from(base) + u64::from(blocks.layout.bitmap_sectors) + u64::from(sib))
        * SECTOR_SIZE as u64
}

/// Split `sectors` sectors from `offset` into runs that stay inside one block.
///
/// Yields (block, sector in block, index of first sector in the run, run length).
fn block_runs(
    layout: BlockLayout,
    offset: u32,
    sectors: u32,
) -> impl Iterator<Item = (u32, u32, u32, u32)> {
    let mut done = 0u32;
    std::iter::from_fn(move || {
        if done >= sectors {
            return None;
        }
        let (blk, sib) = layout.locate(offset + done);
        let run = (layout.sectors_per_block - sib).min(sectors - done);
        let item = (blk, sib, done, run);
        done += run;
        Some(item)
    })
}

fn read_fixed(file: &mut File, offset: u32, out: &mut [u8]) -> Result<()> {
    file.seek(SeekFrom::Start(byte_offset(offset)))?;
    file.read_exact(out)?;
    Ok(())
}

fn read_sparse(file: &mut File, blocks: &Blocks, offset: u32, out: &mut [u8]) -> Result<()> {
    let sectors = (out.len() / SECTOR_SIZE) as u32;
    for (blk, sib, first, run) in block_runs(blocks.layout, offset, sectors) {
        let dst = &mut out[first as usize * SECTOR_SIZE..(first + run) as usize * SECTOR_SIZE];
        match blocks.bat.get(blk) {
            Some(base) => {
                file.seek(SeekFrom::Start(data_offset(blocks, base, sib)))?;
                file.read_exact(dst)?;
            }
            None => dst.fill(0),
        }
    }
    Ok(())
}

fn read_differencing(
    file: &mut File,
    blocks: &mut Blocks,
    parent: &mut Image,
    offset: u32,
    out: &mut [u8],
) -> Result<()> {
    for (i, dst) in out.chunks_exact_mut(SECTOR_SIZE).enumerate() {
        let sector = offset + i as u32;
        let (blk, sib) = blocks.layout.locate(sector);
        blocks.bitmap.select(file, &blocks.bat, blk)?;
        if blocks.bitmap.is_set(sib) {
            read_sparse(file, blocks, sector, dst)?;
        } else {
            parent.read_chain_sector(sector, dst)?;
        }
    }
    Ok(())
}

fn write_sparse(file: &mut File, blocks: &mut Blocks, offset: u32, data: &[u8]) -> Result<()> {
    let sectors = (data.len() / SECTOR_SIZE) as u32;
    for (blk, sib, first, run) in block_runs(blocks.layout, offset, sectors) {
        blocks.bitmap.select(file, &blocks.bat, blk)?;
        let base = match blocks.bat.get(blk) {
            Some(base) => base,
            None => blocks.bat.allocate_block(file, blk, blocks.layout)?,
        };

        let src = &data[first as usize * SECTOR_SIZE..(first + run) as usize * SECTOR_SIZE];
        file.seek(SeekFrom::Start(data_offset(blocks, base, sib)))?;
        file.write_all(src)?;
        for s in sib..sib + run {
            blocks.bitmap.set(s);
        }
    }
    Ok(())
}

/// Zero a run of sectors; `allocate` gives unallocated blocks storage first
fn format_sparse(
    file: &mut File,
    blocks: &mut Blocks,
    offset: u32,
    sectors: u32,
    allocate: bool,
) -> Result<()> {
    for (blk, sib, _, run) in block_runs(blocks.layout, offset, sectors) {
        if !allocate && !blocks.bat.is_allocated(blk) {
            continue;
        }
        blocks.bitmap.select(file, &blocks.bat, blk)?;
        let base = match blocks.bat.get(blk) {
            Some(base) => base,
            None => blocks.bat.allocate_block(file, blk, blocks.layout)?,
        };
        file.seek(SeekFrom::Start(data_offset(blocks, base, sib)))?;
        write_zero_sectors(file, u64::from(run))?;
        for s in sib..sib + run {
            blocks.bitmap.set(s);
        }
    }
    Ok(())
}

/// Write `sectors` zero sectors at the current position
pub(crate) fn write_zero_sectors<W: Write>(w: &mut W, sectors: u64) -> Result<()> {
    let zeros = vec![0u8; ZERO_CHUNK_SECTORS as usize * SECTOR_SIZE];
    let mut remaining = sectors;
    while remaining > 0 {
        let n = remaining.min(ZERO_CHUNK_SECTORS);
        w.write_all(&zeros[..n as usize * SECTOR_SIZE])?;
        remaining -= n;
    }
    Ok(())
}
