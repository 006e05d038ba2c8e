//! Image information and consistency findings

use crate::error::Result;
use crate::footer::{DiskType, FOOTER_SIZE};
use crate::geometry::Geometry;
use crate::image::Image;
use crate::SECTOR_SIZE;
use serde::Serialize;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Snapshot of an image's metadata
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    /// Path the image was opened from
    pub path: PathBuf,
    /// Image kind
    pub disk_type: DiskType,
    /// CHS geometry
    pub geometry: Geometry,
    /// Bytes addressable through the geometry
    pub capacity: u64,
    /// Current size recorded in the footer
    pub current_size: u64,
    /// Original size recorded in the footer
    pub original_size: u64,
    /// Creation time, seconds since the Unix epoch
    pub created: u64,
    /// Image identifier
    pub uuid: Uuid,
    /// Creator application tag
    pub creator_app: String,
    /// Creator version as "major.minor"
    pub creator_version: String,
    /// Creator host OS tag
    pub creator_os: String,
    /// Data block size in bytes
    pub block_size: Option<u32>,
    /// Number of BAT entries
    pub total_blocks: Option<u32>,
    /// Blocks that have storage
    pub allocated_blocks: Option<u32>,
    /// Identifier the parent must carry
    pub parent_uuid: Option<Uuid>,
    /// Parent file name recorded in the header
    pub parent_name: Option<String>,
    /// Path the parent was opened from
    pub parent_path: Option<PathBuf>,
    /// Images in the chain, counting this one
    pub chain_depth: usize,
}

/// A non-fatal inconsistency found by [`Image::check`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// Footer current size is smaller than the geometry capacity
    SizeBelowGeometry {
        /// Current size in the footer
        current_size: u64,
        /// Capacity of the geometry
        capacity: u64,
    },
    /// Sectors per track above the 63 that BIOS translation allows
    NonStandardSpt {
        /// Sectors per track
        spt: u8,
    },
    /// Original and current sizes differ
    ResizedImage {
        /// Original size in the footer
        original_size: u64,
        /// Current size in the footer
        current_size: u64,
    },
    /// A BAT entry points past the end of the file
    BlockPastEnd {
        /// Block index
        block: u32,
        /// Sector offset stored in the BAT
        sector: u32,
    },
    /// The footer copy at offset 0 differs from the trailing footer
    FooterCopyMismatch,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::SizeBelowGeometry {
                current_size,
                capacity,
            } => write!(
                f,
                "current size {} is smaller than the geometry capacity {}",
                current_size, capacity
            ),
            Finding::NonStandardSpt { spt } => {
                write!(f, "{} sectors per track exceeds 63", spt)
            }
            Finding::ResizedImage {
                original_size,
                current_size,
            } => write!(
                f,
                "original size {} differs from current size {}",
                original_size, current_size
            ),
            Finding::BlockPastEnd { block, sector } => {
                write!(f, "block {} at sector {} lies past end of file", block, sector)
            }
            Finding::FooterCopyMismatch => write!(f, "footer copy at offset 0 differs"),
        }
    }
}

impl Image {
    /// Creation time recorded in the footer
    pub fn creation_time(&self) -> SystemTime {
        self.footer.creation_time()
    }

    /// Metadata snapshot
    pub fn info(&self) -> ImageInfo {
        let footer = &self.footer;
        let header = self.sparse_header();
        let created = self
            .creation_time()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());

        ImageInfo {
            path: self.path.clone(),
            disk_type: self.disk_type(),
            geometry: footer.geometry,
            capacity: footer.geometry.capacity(),
            current_size: footer.current_size,
            original_size: footer.original_size,
            created,
            uuid: footer.uuid,
            creator_app: tag_text(&footer.creator_app),
            creator_version: format!(
                "{}.{}",
                footer.creator_version >> 16,
                footer.creator_version & 0xFFFF
            ),
            creator_os: tag_text(&footer.creator_os),
            block_size: header.map(|h| h.block_size),
            total_blocks: self.bat().map(|b| b.len()),
            allocated_blocks: self.bat().map(|b| b.allocated_count()),
            parent_uuid: self.parent().and(header.map(|h| h.parent_uuid)),
            parent_name: self
                .parent()
                .and(header)
                .and_then(|h| h.parent_name().ok()),
            parent_path: self.parent().map(|p| p.path().to_path_buf()),
            chain_depth: self.chain_depth(),
        }
    }

    /// Non-fatal inconsistencies in the image's metadata
    pub fn check(&mut self) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        let footer = &self.footer;
        let capacity = footer.geometry.capacity();

        if footer.current_size < capacity {
            findings.push(Finding::SizeBelowGeometry {
                current_size: footer.current_size,
                capacity,
            });
        }
        if footer.geometry.spt > 63 {
            findings.push(Finding::NonStandardSpt {
                spt: footer.geometry.spt,
            });
        }
        if footer.original_size != footer.current_size {
            findings.push(Finding::ResizedImage {
                original_size: footer.original_size,
                current_size: footer.current_size,
            });
        }

        let len = self.file.seek(SeekFrom::End(0))?;
        let Some(blocks) = self.blocks() else {
            return Ok(findings);
        };

        let span = u64::from(blocks.layout.bitmap_sectors + blocks.layout.sectors_per_block)
            * SECTOR_SIZE as u64;
        for (block, &sector) in blocks.bat.entries().iter().enumerate() {
            if !blocks.bat.is_allocated(block as u32) {
                continue;
            }
            if u64::from(sector) * SECTOR_SIZE as u64 + span > len {
                findings.push(Finding::BlockPastEnd {
                    block: block as u32,
                    sector,
                });
            }
        }

        let mut copy = [0u8; FOOTER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut copy)?;
        if copy != self.footer.to_bytes() {
            findings.push(Finding::FooterCopyMismatch);
        }

        Ok(findings)
    }
}

fn tag_text(tag: &[u8; 4]) -> String {
    String::from_utf8_lossy(tag).trim_end_matches('\0').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use crate::create::{create_differencing, create_fixed, create_sparse};
    use std::io::Write;
    use tempfile::TempDir;

    const GEOM: Geometry = Geometry::new(100, 4, 17);

    #[test]
    fn test_info_fixed() {
        let dir = TempDir::new().unwrap();
        let image = create_fixed(dir.path().join("f.vhd"), GEOM).unwrap();
        let info = image.info();

        assert_eq!(info.disk_type, DiskType::Fixed);
        assert_eq!(info.capacity, 6800 * 512);
        assert_eq!(info.creator_app, "mvhd");
        assert_eq!(info.creator_version, "14.0");
        assert_eq!(info.creator_os, "Wi2k");
        assert_eq!(info.block_size, None);
        assert_eq!(info.parent_uuid, None);
        assert_eq!(info.chain_depth, 1);
        assert!(info.created > 946_684_800);
    }

    #[test]
    fn test_info_differencing() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("base.vhd");
        let parent_uuid = create_sparse(&base, GEOM).unwrap().footer().uuid;

        let mut child = create_differencing(dir.path().join("child.vhd"), &base).unwrap();
        child.write_sectors(0, 1, &[1u8; 512]).unwrap();
        let info = child.info();

        assert_eq!(info.disk_type, DiskType::Differencing);
        assert_eq!(info.allocated_blocks, Some(1));
        assert_eq!(info.parent_uuid, Some(parent_uuid));
        assert_eq!(info.parent_name.as_deref(), Some("base.vhd"));
        assert_eq!(info.chain_depth, 2);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["disk_type"], "differencing");
    }

    #[test]
    fn test_check_clean_images() {
        let dir = TempDir::new().unwrap();
        let mut fixed = create_fixed(dir.path().join("f.vhd"), GEOM).unwrap();
        assert!(fixed.check().unwrap().is_empty());

        let mut sparse = create_sparse(dir.path().join("s.vhd"), GEOM).unwrap();
        sparse.write_sectors(100, 1, &[9u8; 512]).unwrap();
        assert!(sparse.check().unwrap().is_empty());
    }

    #[test]
    fn test_check_reports_footer_rules() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.vhd");
        create_fixed(&path, Geometry::new(100, 4, 80)).unwrap().close().unwrap();

        // Shrink the recorded current size and restamp the footer
        let mut data = std::fs::read(&path).unwrap();
        let at = data.len() - 512;
        let mut footer = crate::footer::Footer::parse(data[at..].try_into().unwrap());
        footer.current_size -= 512;
        checksum::stamp(&mut footer);
        data[at..].copy_from_slice(&footer.to_bytes());
        std::fs::write(&path, &data).unwrap();

        let findings = Image::open(&path, true).unwrap().check().unwrap();
        assert!(findings.contains(&Finding::NonStandardSpt { spt: 80 }));
        assert!(findings
            .iter()
            .any(|f| matches!(f, Finding::SizeBelowGeometry { .. })));
        assert!(findings
            .iter()
            .any(|f| matches!(f, Finding::ResizedImage { .. })));
    }

    #[test]
    fn test_check_block_past_end() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.vhd");
        create_sparse(&path, GEOM).unwrap().close().unwrap();

        // Point BAT entry 0 far past the end of the file
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(1536)).unwrap();
        file.write_all(&100_000u32.to_be_bytes()).unwrap();
        drop(file);

        let findings = Image::open(&path, true).unwrap().check().unwrap();
        assert_eq!(
            findings,
            vec![Finding::BlockPastEnd {
                block: 0,
                sector: 100_000
            }]
        );
        assert_eq!(
            findings[0].to_string(),
            "block 0 at sector 100000 lies past end of file"
        );
    }
}
