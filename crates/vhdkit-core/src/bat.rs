//! Block Allocation Table
//!
//! One big-endian `u32` per data block holding the block's absolute sector offset,
//! or [`BAT_UNALLOCATED`] for a block that has never been written. The whole table
//! is held in memory; each entry changed by an allocation is written straight
//! back to disk before the allocating write returns.

use crate::error::{Error, Result};
use crate::footer::{FOOTER_COOKIE, FOOTER_SIZE};
use crate::header::SparseHeader;
use crate::io::write_zero_sectors;
use crate::SECTOR_SIZE;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};

/// BAT entry of a block with no storage
pub const BAT_UNALLOCATED: u32 = u32::MAX;

/// Zero sectors written between the last data block and the trailing footer
pub const BLOCK_PADDING_SECTORS: u32 = 5;

/// Sector layout of the data blocks of one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    /// Data sectors per block
    pub sectors_per_block: u32,
    /// Bitmap sectors in front of each block
    pub bitmap_sectors: u32,
}

impl BlockLayout {
    /// Layout declared by a sparse header
    pub fn from_header(header: &SparseHeader) -> Self {
        Self {
            sectors_per_block: header.sectors_per_block(),
            bitmap_sectors: header.bitmap_sectors(),
        }
    }

    /// Block index and sector-in-block of an image sector
    pub fn locate(&self, sector: u32) -> (u32, u32) {
        (
            sector / self.sectors_per_block,
            sector % self.sectors_per_block,
        )
    }
}

/// In-memory Block Allocation Table
#[derive(Debug, Clone)]
pub struct Bat {
    entries: Vec<u32>,
    table_offset: u64,
}

impl Bat {
    /// Read `count` entries starting at byte `table_offset`
    pub fn load<F: Read + Seek>(file: &mut F, table_offset: u64, count: u32) -> Result<Self> {
        let bytes = count as usize * 4;
        let mut raw = Vec::new();
        raw.try_reserve_exact(bytes)
            .map_err(|_| Error::Allocation { bytes })?;
        raw.resize(bytes, 0);

        file.seek(SeekFrom::Start(table_offset))?;
        file.read_exact(&mut raw)?;

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(count as usize)
            .map_err(|_| Error::Allocation { bytes })?;
        entries.extend(
            raw.chunks_exact(4)
                .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]])),
        );

        debug!("Loaded BAT: {} entries at offset {}", count, table_offset);
        Ok(Self {
            entries,
            table_offset,
        })
    }

    /// Number of entries
    pub fn len(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sector offset of block `blk`, if it is allocated
    pub fn get(&self, blk: u32) -> Option<u32> {
        self.entries
            .get(blk as usize)
            .copied()
            .filter(|&e| e != BAT_UNALLOCATED)
    }

    /// Whether block `blk` has storage
    pub fn is_allocated(&self, blk: u32) -> bool {
        self.get(blk).is_some()
    }

    /// Number of allocated blocks
    pub fn allocated_count(&self) -> u32 {
        self.entries.iter().filter(|&&e| e != BAT_UNALLOCATED).count() as u32
    }

    /// Raw entries
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// Give block `blk` storage at the end of the image.
    ///
    /// The new block (zeroed bitmap and data, then padding) overwrites the trailing
    /// footer, which is rewritten after it. If the trailing footer is missing its
    /// cookie, the copy at offset 0 is used instead and the block starts at EOF.
    /// Returns the block's sector offset.
    pub fn allocate_block<F: Read + Write + Seek>(
        &mut self,
        file: &mut F,
        blk: u32,
        layout: BlockLayout,
    ) -> Result<u32> {
        if blk as usize >= self.entries.len() {
            return Err(Error::Corrupt(format!(
                "block {} is outside the {}-entry BAT",
                blk,
                self.entries.len()
            )));
        }

        let len = file.seek(SeekFrom::End(0))?;
        let (mut start, footer) = match read_trailing_footer(file, len)? {
            Some(footer) => (len - FOOTER_SIZE as u64, footer),
            None => {
                warn!("Trailing footer not found, using the copy at offset 0");
                let mut footer = [0u8; FOOTER_SIZE];
                file.seek(SeekFrom::Start(0))?;
                file.read_exact(&mut footer)?;
                (len, footer)
            }
        };

        let misalign = start % SECTOR_SIZE as u64;
        if misalign != 0 {
            let pad = SECTOR_SIZE as u64 - misalign;
            file.seek(SeekFrom::Start(start))?;
            file.write_all(&vec![0u8; pad as usize])?;
            start += pad;
        }

        let sector = u32::try_from(start / SECTOR_SIZE as u64)
            .map_err(|_| Error::Corrupt("image exceeds the 32-bit sector range".to_string()))?;

        file.seek(SeekFrom::Start(start))?;
        write_zero_sectors(
            file,
            u64::from(layout.bitmap_sectors + layout.sectors_per_block + BLOCK_PADDING_SECTORS),
        )?;
        file.write_all(&footer)?;

        self.entries[blk as usize] = sector;
        self.persist_entry(file, blk)?;

        debug!("Allocated block {} at sector {}", blk, sector);
        Ok(sector)
    }

    fn persist_entry<F: Write + Seek>(&self, file: &mut F, blk: u32) -> Result<()> {
        file.seek(SeekFrom::Start(self.table_offset + u64::from(blk) * 4))?;
        file.write_all(&self.entries[blk as usize].to_be_bytes())?;
        Ok(())
    }
}

/// Sectors occupied on disk by a table of `count` entries
pub fn table_sectors(count: u32) -> u32 {
    (u64::from(count) * 4).div_ceil(SECTOR_SIZE as u64) as u32
}

pub(crate) fn read_trailing_footer<F: Read + Seek>(
    file: &mut F,
    len: u64,
) -> Result<Option<[u8; FOOTER_SIZE]>> {
    if len < FOOTER_SIZE as u64 {
        return Ok(None);
    }
    let mut footer = [0u8; FOOTER_SIZE];
    file.seek(SeekFrom::Start(len - FOOTER_SIZE as u64))?;
    file.read_exact(&mut footer)?;
    Ok((&footer[..8] == FOOTER_COOKIE).then_some(footer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LAYOUT: BlockLayout = BlockLayout {
        sectors_per_block: 8,
        bitmap_sectors: 1,
    };

    /// Footer copy, 512-byte header, a 1-sector BAT of `count` entries, then the trailing footer
    fn image(count: u32) -> Cursor<Vec<u8>> {
        let mut data = vec![0u8; 512];
        data[..8].copy_from_slice(FOOTER_COOKIE);
        data[8] = 0xAB;
        data.extend_from_slice(&[0u8; 512]);
        data.extend_from_slice(&vec![0xFFu8; 512]);
        let footer = data[..512].to_vec();
        data.extend_from_slice(&footer);
        assert!(count <= 128);
        Cursor::new(data)
    }

    #[test]
    fn test_load() {
        let mut file = image(4);
        let bat = Bat::load(&mut file, 1024, 4).unwrap();
        assert_eq!(bat.len(), 4);
        assert_eq!(bat.allocated_count(), 0);
        assert!(!bat.is_allocated(0));
        assert_eq!(bat.get(10), None);
    }

    #[test]
    fn test_load_truncated_table() {
        let mut file = Cursor::new(vec![0u8; 600]);
        assert!(matches!(Bat::load(&mut file, 512, 64), Err(Error::Io(_))));
    }

    #[test]
    fn test_allocate_replaces_trailing_footer() {
        let mut file = image(4);
        let mut bat = Bat::load(&mut file, 1024, 4).unwrap();

        let sector = bat.allocate_block(&mut file, 2, LAYOUT).unwrap();
        // Old trailing footer started at byte 1536
        assert_eq!(sector, 3);
        assert_eq!(bat.get(2), Some(3));

        let data = file.into_inner();
        let block_end = (3 + 1 + 8 + BLOCK_PADDING_SECTORS as usize) * 512;
        assert_eq!(data.len(), block_end + 512);
        assert_eq!(&data[block_end..block_end + 8], FOOTER_COOKIE);
        assert_eq!(data[block_end + 8], 0xAB);
        assert!(data[1536..block_end].iter().all(|&b| b == 0));
        // BAT entry 2 was written through
        assert_eq!(&data[1024 + 8..1024 + 12], &3u32.to_be_bytes());
        assert_eq!(&data[1024..1028], &[0xFF; 4]);
    }

    #[test]
    fn test_allocate_twice_appends() {
        let mut file = image(4);
        let mut bat = Bat::load(&mut file, 1024, 4).unwrap();

        let first = bat.allocate_block(&mut file, 0, LAYOUT).unwrap();
        let second = bat.allocate_block(&mut file, 1, LAYOUT).unwrap();
        assert_eq!(second, first + 1 + 8 + BLOCK_PADDING_SECTORS);
        assert_eq!(bat.allocated_count(), 2);
    }

    #[test]
    fn test_allocate_with_misplaced_footer() {
        let mut file = image(4);
        // Clobber the trailing footer and leave the file misaligned
        let mut data = file.into_inner();
        let len = data.len();
        data[len - 512..len - 504].copy_from_slice(b"garbage!");
        data.extend_from_slice(&[1, 2, 3]);
        file = Cursor::new(data);

        let mut bat = Bat::load(&mut file, 1024, 4).unwrap();
        let sector = bat.allocate_block(&mut file, 0, LAYOUT).unwrap();
        // EOF at 2051 pads up to 2560
        assert_eq!(sector, 5);

        let data = file.into_inner();
        assert_eq!(&data[2048..2051], &[1, 2, 3]);
        let footer_at = (5 + 1 + 8 + BLOCK_PADDING_SECTORS as usize) * 512;
        assert_eq!(&data[footer_at..footer_at + 8], FOOTER_COOKIE);
        assert_eq!(data[footer_at + 8], 0xAB);
    }

    #[test]
    fn test_allocate_out_of_range() {
        let mut file = image(4);
        let mut bat = Bat::load(&mut file, 1024, 4).unwrap();
        assert!(matches!(
            bat.allocate_block(&mut file, 4, LAYOUT),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_table_sectors() {
        assert_eq!(table_sectors(1), 1);
        assert_eq!(table_sectors(128), 1);
        assert_eq!(table_sectors(129), 2);
    }

    #[test]
    fn test_locate() {
        assert_eq!(LAYOUT.locate(0), (0, 0));
        assert_eq!(LAYOUT.locate(9), (1, 1));
    }
}
