//! The 512-byte VHD footer
//!
//! Every VHD ends with this record; dynamic and differencing images also keep a copy
//! at offset 0. All numeric fields are big-endian. Parsing never fails: a malformed
//! buffer yields a record whose cookie or checksum the caller rejects.

use crate::checksum::{self, Record};
use crate::geometry::Geometry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Size of the footer in bytes
pub const FOOTER_SIZE: usize = 512;

/// Footer magic cookie
pub const FOOTER_COOKIE: &[u8; 8] = b"conectix";

/// Offset of the checksum field
pub const FOOTER_CHECKSUM_OFFSET: usize = 64;

/// Footer feature flags (reserved bit always set)
pub const FOOTER_FEATURES: u32 = 0x0000_0002;

/// File format version 1.0
pub const FORMAT_VERSION: u32 = 0x0001_0000;

/// Creator application tag written by default
pub const DEFAULT_CREATOR_APP: [u8; 4] = *b"mvhd";

/// Creator version written into new footers
pub const CREATOR_VERSION: u32 = 0x000e_0000;

/// Creator host OS tag written into new footers
pub const CREATOR_HOST_OS: [u8; 4] = *b"Wi2k";

/// Data offset sentinel for images without a sparse header
pub const NO_DATA_OFFSET: u64 = u64::MAX;

/// Seconds between the Unix epoch and 2000-01-01T00:00:00Z
pub const VHD_EPOCH_UNIX: u64 = 946_684_800;

const RESERVED_OFFSET: usize = 85;
const RESERVED_LEN: usize = FOOTER_SIZE - RESERVED_OFFSET;

/// Kind of VHD image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    /// Raw sectors followed by a footer
    Fixed,
    /// Blocks allocated on first write
    Dynamic,
    /// Dynamic image layered over a parent
    Differencing,
}

impl DiskType {
    /// Decode the footer's disk type field
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            2 => Some(DiskType::Fixed),
            3 => Some(DiskType::Dynamic),
            4 => Some(DiskType::Differencing),
            _ => None,
        }
    }

    /// Value stored in the footer
    pub fn as_raw(self) -> u32 {
        match self {
            DiskType::Fixed => 2,
            DiskType::Dynamic => 3,
            DiskType::Differencing => 4,
        }
    }
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiskType::Fixed => "fixed",
            DiskType::Dynamic => "dynamic",
            DiskType::Differencing => "differencing",
        };
        f.write_str(name)
    }
}

/// Parsed VHD footer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    /// Magic cookie, "conectix" when valid
    pub cookie: [u8; 8],
    /// Feature flags
    pub features: u32,
    /// File format version
    pub format_version: u32,
    /// Absolute offset of the sparse header, all ones for fixed images
    pub data_offset: u64,
    /// Creation time in seconds since 2000-01-01
    pub timestamp: u32,
    /// Creator application tag
    pub creator_app: [u8; 4],
    /// Creator application version
    pub creator_version: u32,
    /// Creator host OS tag
    pub creator_os: [u8; 4],
    /// Size at creation in bytes
    pub original_size: u64,
    /// Current size in bytes
    pub current_size: u64,
    /// CHS geometry
    pub geometry: Geometry,
    /// Raw disk type; see [`DiskType`]
    pub disk_type: u32,
    /// Stored checksum
    pub checksum: u32,
    /// Image identity
    pub uuid: Uuid,
    /// Saved-state flag
    pub saved_state: u8,
    /// Reserved bytes, preserved as read
    pub reserved: [u8; RESERVED_LEN],
}

impl Footer {
    /// A new, stamped footer for an image of `kind` with `geometry`
    pub fn new(kind: DiskType, geometry: Geometry, creator_app: [u8; 4]) -> Self {
        let size = geometry.capacity();
        let mut footer = Self {
            cookie: *FOOTER_COOKIE,
            features: FOOTER_FEATURES,
            format_version: FORMAT_VERSION,
            data_offset: match kind {
                DiskType::Fixed => NO_DATA_OFFSET,
                DiskType::Dynamic | DiskType::Differencing => FOOTER_SIZE as u64,
            },
            timestamp: vhd_timestamp(SystemTime::now()),
            creator_app,
            creator_version: CREATOR_VERSION,
            creator_os: CREATOR_HOST_OS,
            original_size: size,
            current_size: size,
            geometry,
            disk_type: kind.as_raw(),
            checksum: 0,
            uuid: Uuid::new_v4(),
            saved_state: 0,
            reserved: [0u8; RESERVED_LEN],
        };
        checksum::stamp(&mut footer);
        footer
    }

    /// Decode a footer from its on-disk bytes
    pub fn parse(buf: &[u8; FOOTER_SIZE]) -> Self {
        Self {
            cookie: array(buf, 0),
            features: be_u32(buf, 8),
            format_version: be_u32(buf, 12),
            data_offset: be_u64(buf, 16),
            timestamp: be_u32(buf, 24),
            creator_app: array(buf, 28),
            creator_version: be_u32(buf, 32),
            creator_os: array(buf, 36),
            original_size: be_u64(buf, 40),
            current_size: be_u64(buf, 48),
            geometry: Geometry::new(be_u16(buf, 56), buf[58], buf[59]),
            disk_type: be_u32(buf, 60),
            checksum: be_u32(buf, FOOTER_CHECKSUM_OFFSET),
            uuid: Uuid::from_bytes(array(buf, 68)),
            saved_state: buf[84],
            reserved: array(buf, RESERVED_OFFSET),
        }
    }

    /// Encode the footer into its on-disk bytes
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..8].copy_from_slice(&self.cookie);
        buf[8..12].copy_from_slice(&self.features.to_be_bytes());
        buf[12..16].copy_from_slice(&self.format_version.to_be_bytes());
        buf[16..24].copy_from_slice(&self.data_offset.to_be_bytes());
        buf[24..28].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[28..32].copy_from_slice(&self.creator_app);
        buf[32..36].copy_from_slice(&self.creator_version.to_be_bytes());
        buf[36..40].copy_from_slice(&self.creator_os);
        buf[40..48].copy_from_slice(&self.original_size.to_be_bytes());
        buf[48..56].copy_from_slice(&self.current_size.to_be_bytes());
        buf[56..58].copy_from_slice(&self.geometry.cyl.to_be_bytes());
        buf[58] = self.geometry.heads;
        buf[59] = self.geometry.spt;
        buf[60..64].copy_from_slice(&self.disk_type.to_be_bytes());
        buf[64..68].copy_from_slice(&self.checksum.to_be_bytes());
        buf[68..84].copy_from_slice(self.uuid.as_bytes());
        buf[84] = self.saved_state;
        buf[RESERVED_OFFSET..].copy_from_slice(&self.reserved);
        buf
    }

    /// Whether the cookie reads "conectix"
    pub fn has_valid_cookie(&self) -> bool {
        &self.cookie == FOOTER_COOKIE
    }

    /// Decoded disk type, if known
    pub fn kind(&self) -> Option<DiskType> {
        DiskType::from_raw(self.disk_type)
    }

    /// Creation time as wall-clock time
    pub fn creation_time(&self) -> SystemTime {
        timestamp_to_system_time(self.timestamp)
    }
}

impl Record for Footer {
    const SIZE: usize = FOOTER_SIZE;
    const CHECKSUM_OFFSET: usize = FOOTER_CHECKSUM_OFFSET;

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

/// Seconds since 2000-01-01 for `time`, saturating at both ends of the `u32` range
pub fn vhd_timestamp(time: SystemTime) -> u32 {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().saturating_sub(VHD_EPOCH_UNIX))
        .unwrap_or(0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}

/// Wall-clock time of a VHD timestamp
pub fn timestamp_to_system_time(timestamp: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(VHD_EPOCH_UNIX + u64::from(timestamp))
}

pub(crate) fn array<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

pub(crate) fn be_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes(array(buf, offset))
}

pub(crate) fn be_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(array(buf, offset))
}

pub(crate) fn be_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_be_bytes(array(buf, offset))
}
