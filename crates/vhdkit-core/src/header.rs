//! The 1024-byte sparse (dynamic disk) header
//!
//! Dynamic and differencing images carry this record at the offset named by the
//! footer. It locates the BAT, fixes the block size and, for differencing images,
//! identifies the parent and records where to find it.

use crate::checksum::Record;
use crate::footer::{array, be_u32, be_u64};
use crate::SECTOR_SIZE;
use uuid::Uuid;
use vhdkit_platform::{decode_utf16, Endian};

/// Size of the sparse header in bytes
pub const HEADER_SIZE: usize = 1024;

/// Sparse header magic cookie
pub const SPARSE_COOKIE: &[u8; 8] = b"cxsparse";

/// Offset of the checksum field
pub const HEADER_CHECKSUM_OFFSET: usize = 36;

/// Sparse header version 1.0
pub const HEADER_VERSION: u32 = 0x0001_0000;

/// Block size used when none is configured (2 MiB)
pub const DEFAULT_BLOCK_SIZE: u32 = 2 * 1024 * 1024;

/// Number of parent locator slots
pub const LOCATOR_COUNT: usize = 8;

/// Size of the parent name field in bytes
pub const PARENT_NAME_SIZE: usize = 512;

/// Platform code of a locator holding an absolute UTF-16LE path
pub const PLATFORM_W2KU: u32 = 0x5732_6B75;

/// Platform code of a locator holding a relative UTF-16LE path
pub const PLATFORM_W2RU: u32 = 0x5732_7275;

const PARENT_NAME_OFFSET: usize = 64;
const LOCATORS_OFFSET: usize = 576;
const LOCATOR_SIZE: usize = 24;
const RESERVED2_OFFSET: usize = 768;
const RESERVED2_LEN: usize = HEADER_SIZE - RESERVED2_OFFSET;

/// One parent locator entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParentLocator {
    /// Platform code (`W2ku`, `W2ru`, or zero when unused)
    pub platform_code: u32,
    /// Space reserved for the locator data, in sectors
    pub data_space: u32,
    /// Length of the locator data in bytes
    pub data_length: u32,
    /// Reserved
    pub reserved: u32,
    /// Absolute byte offset of the locator data
    pub data_offset: u64,
}

impl ParentLocator {
    fn parse(buf: &[u8]) -> Self {
        Self {
            platform_code: be_u32(buf, 0),
            data_space: be_u32(buf, 4),
            data_length: be_u32(buf, 8),
            reserved: be_u32(buf, 12),
            data_offset: be_u64(buf, 16),
        }
    }

    fn write(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.platform_code.to_be_bytes());
        out[4..8].copy_from_slice(&self.data_space.to_be_bytes());
        out[8..12].copy_from_slice(&self.data_length.to_be_bytes());
        out[12..16].copy_from_slice(&self.reserved.to_be_bytes());
        out[16..24].copy_from_slice(&self.data_offset.to_be_bytes());
    }

    /// Whether this slot describes a locator
    pub fn is_used(&self) -> bool {
        self.platform_code != 0
    }
}

/// Parsed sparse header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseHeader {
    /// Magic cookie, "cxsparse" when valid
    pub cookie: [u8; 8],
    /// Unused, all ones
    pub data_offset: u64,
    /// Absolute byte offset of the BAT
    pub table_offset: u64,
    /// Header version
    pub header_version: u32,
    /// Number of BAT entries
    pub max_bat_entries: u32,
    /// Data block size in bytes
    pub block_size: u32,
    /// Stored checksum
    pub checksum: u32,
    /// UUID of the parent image (differencing only)
    pub parent_uuid: Uuid,
    /// Parent creation timestamp (differencing only)
    pub parent_timestamp: u32,
    /// Reserved
    pub reserved1: u32,
    /// Parent base name, UTF-16BE, zero padded
    pub parent_name: [u8; PARENT_NAME_SIZE],
    /// Parent locator entries
    pub locators: [ParentLocator; LOCATOR_COUNT],
    /// Reserved bytes, preserved as read
    pub reserved2: [u8; RESERVED2_LEN],
}

impl SparseHeader {
    /// A header for a table of `max_bat_entries` blocks of `block_size` bytes.
    ///
    /// The BAT is placed right after the header (footer copy at 0, header at 512).
    pub fn new(max_bat_entries: u32, block_size: u32) -> Self {
        Self {
            cookie: *SPARSE_COOKIE,
            data_offset: u64::MAX,
            table_offset: (SECTOR_SIZE + HEADER_SIZE) as u64,
            header_version: HEADER_VERSION,
            max_bat_entries,
            block_size,
            checksum: 0,
            parent_uuid: Uuid::nil(),
            parent_timestamp: 0,
            reserved1: 0,
            parent_name: [0u8; PARENT_NAME_SIZE],
            locators: [ParentLocator::default(); LOCATOR_COUNT],
            reserved2: [0u8; RESERVED2_LEN],
        }
    }

    /// Decode a header from its on-disk bytes
    pub fn parse(buf: &[u8; HEADER_SIZE]) -> Self {
        let mut locators = [ParentLocator::default(); LOCATOR_COUNT];
        for (i, loc) in locators.iter_mut().enumerate() {
            let start = LOCATORS_OFFSET + i * LOCATOR_SIZE;
            *loc = ParentLocator::parse(&buf[start..start + LOCATOR_SIZE]);
        }

        Self {
            cookie: array(buf, 0),
            data_offset: be_u64(buf, 8),
            table_offset: be_u64(buf, 16),
            header_version: be_u32(buf, 24),
            max_bat_entries: be_u32(buf, 28),
            block_size: be_u32(buf, 32),
            checksum: be_u32(buf, HEADER_CHECKSUM_OFFSET),
            parent_uuid: Uuid::from_bytes(array(buf, 40)),
            parent_timestamp: be_u32(buf, 56),
            reserved1: be_u32(buf, 60),
            parent_name: array(buf, PARENT_NAME_OFFSET),
            locators,
            reserved2: array(buf, RESERVED2_OFFSET),
        }
    }

    /// Encode the header into its on-disk bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.cookie);
        buf[8..16].copy_from_slice(&self.data_offset.to_be_bytes());
        buf[16..24].copy_from_slice(&self.table_offset.to_be_bytes());
        buf[24..28].copy_from_slice(&self.header_version.to_be_bytes());
        buf[28..32].copy_from_slice(&self.max_bat_entries.to_be_bytes());
        buf[32..36].copy_from_slice(&self.block_size.to_be_bytes());
        buf[36..40].copy_from_slice(&self.checksum.to_be_bytes());
        buf[40..56].copy_from_slice(self.parent_uuid.as_bytes());
        buf[56..60].copy_from_slice(&self.parent_timestamp.to_be_bytes());
        buf[60..64].copy_from_slice(&self.reserved1.to_be_bytes());
        buf[PARENT_NAME_OFFSET..PARENT_NAME_OFFSET + PARENT_NAME_SIZE]
            .copy_from_slice(&self.parent_name);
        for (i, loc) in self.locators.iter().enumerate() {
            let start = LOCATORS_OFFSET + i * LOCATOR_SIZE;
            loc.write(&mut buf[start..start + LOCATOR_SIZE]);
        }
        buf[RESERVED2_OFFSET..].copy_from_slice(&self.reserved2);
        buf
    }

    /// Whether the cookie reads "cxsparse"
    pub fn has_valid_cookie(&self) -> bool {
        &self.cookie == SPARSE_COOKIE
    }

    /// Sectors per data block
    pub fn sectors_per_block(&self) -> u32 {
        self.block_size / SECTOR_SIZE as u32
    }

    /// Sectors occupied by the bitmap in front of each data block
    pub fn bitmap_sectors(&self) -> u32 {
        bitmap_sectors(self.sectors_per_block())
    }

    /// First locator with the given platform code
    pub fn locator(&self, platform_code: u32) -> Option<&ParentLocator> {
        self.locators
            .iter()
            .find(|loc| loc.platform_code == platform_code)
    }

    /// Parent base name, decoded from the UTF-16BE name field
    pub fn parent_name(&self) -> vhdkit_platform::Result<String> {
        decode_utf16(&self.parent_name, Endian::Big)
    }
}

impl Record for SparseHeader {
    const SIZE: usize = HEADER_SIZE;
    const CHECKSUM_OFFSET: usize = HEADER_CHECKSUM_OFFSET;

    fn encode(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }

    fn stored_checksum(&self) -> u32 {
        self.checksum
    }

    fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum;
    }
}

/// Sectors needed for a bitmap with one bit per sector of a `sectors_per_block` block
pub fn bitmap_sectors(sectors_per_block: u32) -> u32 {
    sectors_per_block.div_ceil(8).div_ceil(SECTOR_SIZE as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use vhdkit_platform::encode_utf16_into;

    fn differencing_sample() -> SparseHeader {
        let mut header = SparseHeader::new(4, DEFAULT_BLOCK_SIZE);
        header.parent_uuid = Uuid::from_bytes([7u8; 16]);
        header.parent_timestamp = 0x1234_5678;
        encode_utf16_into("base.vhd", Endian::Big, &mut header.parent_name).unwrap();
        header.locators[0] = ParentLocator {
            platform_code: PLATFORM_W2KU,
            data_space: 1,
            data_length: 36,
            reserved: 0,
            data_offset: 4608,
        };
        header.locators[1] = ParentLocator {
            platform_code: PLATFORM_W2RU,
            data_space: 1,
            data_length: 16,
            reserved: 0,
            data_offset: 5120,
        };
        checksum::stamp(&mut header);
        header
    }

    #[test]
    fn test_new_header_fields() {
        let header = SparseHeader::new(4, DEFAULT_BLOCK_SIZE);
        assert!(header.has_valid_cookie());
        assert_eq!(header.table_offset, 1536);
        assert_eq!(header.data_offset, u64::MAX);
        assert_eq!(header.sectors_per_block(), 4096);
        assert_eq!(header.bitmap_sectors(), 1);
        assert!(header.locators.iter().all(|l| !l.is_used()));
    }

    #[test]
    fn test_byte_layout() {
        let buf = differencing_sample().to_bytes();
        assert_eq!(&buf[0..8], b"cxsparse");
        assert_eq!(&buf[8..16], &[0xFF; 8]);
        assert_eq!(&buf[16..24], &[0, 0, 0, 0, 0, 0, 0x06, 0x00]);
        assert_eq!(&buf[24..28], &[0, 1, 0, 0]);
        assert_eq!(&buf[28..32], &[0, 0, 0, 4]);
        assert_eq!(&buf[32..36], &[0, 0x20, 0, 0]);
        assert_eq!(&buf[40..56], &[7u8; 16]);
        assert_eq!(&buf[64..66], &[0, b'b']);
        assert_eq!(&buf[576..580], b"W2ku");
        assert_eq!(&buf[600..604], b"W2ru");
        assert_eq!(&buf[592..600], &4608u64.to_be_bytes());
    }

    #[test]
    fn test_parse_encode_preserves_bytes() {
        let mut buf = differencing_sample().to_bytes();
        buf[900] = 0x42;
        assert_eq!(SparseHeader::parse(&buf).to_bytes(), buf);
    }

    #[test]
    fn test_checksum_after_parse() {
        let header = differencing_sample();
        let parsed = SparseHeader::parse(&header.to_bytes());
        assert!(checksum::validate(&parsed));
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_parent_name_and_locators() {
        let header = differencing_sample();
        assert_eq!(header.parent_name().unwrap(), "base.vhd");
        assert_eq!(header.locator(PLATFORM_W2RU).unwrap().data_offset, 5120);
        assert!(header.locator(0x1234).is_none());
    }

    #[test]
    fn test_bitmap_sectors() {
        assert_eq!(bitmap_sectors(4096), 1);
        assert_eq!(bitmap_sectors(8), 1);
        assert_eq!(bitmap_sectors(4097), 2);
        assert_eq!(bitmap_sectors(65536), 16);
    }
}
