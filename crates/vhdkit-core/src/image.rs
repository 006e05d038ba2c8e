//! Image lifecycle: open, flush and close
//!
//! An [`Image`] owns its file, footer and, for dynamic and differencing images, the
//! sparse header, BAT and bitmap cache. A differencing image also owns its parent,
//! opened read-only, so a chain of images is a singly linked list that is released
//! from the child down.

use crate::bat::{read_trailing_footer, Bat, BlockLayout};
use crate::bitmap::BitmapCache;
use crate::checksum::{checksum_bytes, stored_checksum_bytes};
use crate::error::{Error, Result};
use crate::footer::{DiskType, Footer, FOOTER_CHECKSUM_OFFSET};
use crate::geometry::Geometry;
use crate::header::{
    ParentLocator, SparseHeader, HEADER_CHECKSUM_OFFSET, HEADER_SIZE, PLATFORM_W2KU,
    PLATFORM_W2RU,
};
use crate::SECTOR_SIZE;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vhdkit_platform::{decode_utf16, normalize_separators, open_file, Endian, OpenMode, MAX_PATH_BYTES};

/// Longest locator payload accepted: a maximal path in UTF-16
const MAX_LOCATOR_BYTES: u32 = 2 * MAX_PATH_BYTES as u32;

/// An open VHD image
pub struct Image {
    pub(crate) file: File,
    pub(crate) path: PathBuf,
    pub(crate) readonly: bool,
    pub(crate) footer: Footer,
    pub(crate) storage: Storage,
}

/// How sectors of an image are stored
pub(crate) enum Storage {
    Fixed,
    Sparse(Blocks),
    Differencing { blocks: Blocks, parent: Box<Image> },
}

/// Tables of a dynamic or differencing image
pub(crate) struct Blocks {
    pub(crate) header: SparseHeader,
    pub(crate) bat: Bat,
    pub(crate) bitmap: BitmapCache,
    pub(crate) layout: BlockLayout,
}

impl Blocks {
    fn load(file: &mut File, footer: &Footer) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(footer.data_offset))?;
        file.read_exact(&mut buf)?;

        let stored = stored_checksum_bytes(&buf, HEADER_CHECKSUM_OFFSET);
        let computed = checksum_bytes(&buf, HEADER_CHECKSUM_OFFSET);
        if stored != computed {
            return Err(Error::SparseChecksum { stored, computed });
        }

        let header = SparseHeader::parse(&buf);
        if !header.has_valid_cookie() {
            return Err(Error::Corrupt("sparse header cookie missing".to_string()));
        }
        if header.block_size == 0 || header.block_size % SECTOR_SIZE as u32 != 0 {
            return Err(Error::Corrupt(format!(
                "block size {} is not a positive multiple of {}",
                header.block_size, SECTOR_SIZE
            )));
        }

        let layout = BlockLayout::from_header(&header);
        let covered = u64::from(header.max_bat_entries) * u64::from(layout.sectors_per_block);
        if covered < u64::from(footer.geometry.total_sectors()) {
            return Err(Error::Corrupt(format!(
                "BAT covers {} sectors but the geometry has {}",
                covered,
                footer.geometry.total_sectors()
            )));
        }

        let len = file.seek(SeekFrom::End(0))?;
        let table_end = header
            .table_offset
            .checked_add(u64::from(header.max_bat_entries) * 4)
            .filter(|&end| end <= len);
        if table_end.is_none() {
            return Err(Error::Corrupt(format!(
                "BAT of {} entries at offset {} runs past the end of the file ({} bytes)",
                header.max_bat_entries, header.table_offset, len
            )));
        }

        let bat = Bat::load(file, header.table_offset, header.max_bat_entries)?;
        let bitmap = BitmapCache::new(layout.bitmap_sectors)?;

        Ok(Self {
            header,
            bat,
            bitmap,
            layout,
        })
    }
}

impl Image {
    /// Open an existing image.
    ///
    /// Validates the footer and, for dynamic and differencing images, the sparse
    /// header and BAT. A differencing image's parent chain is opened read-only.
    pub fn open(path: impl AsRef<Path>, readonly: bool) -> Result<Self> {
        let path = path.as_ref();
        let mode = if readonly {
            OpenMode::Read
        } else {
            OpenMode::ReadWrite
        };
        let mut file = open_file(path, mode)?;
        let footer = read_footer(&mut file)?;

        let storage = match footer.kind() {
            Some(DiskType::Fixed) => Storage::Fixed,
            Some(DiskType::Dynamic) => Storage::Sparse(Blocks::load(&mut file, &footer)?),
            Some(DiskType::Differencing) => {
                let blocks = Blocks::load(&mut file, &footer)?;
                let parent = open_parent(&mut file, path, &blocks.header)?;
                Storage::Differencing {
                    blocks,
                    parent: Box::new(parent),
                }
            }
            None => return Err(Error::UnsupportedType(footer.disk_type)),
        };

        let image = Self {
            file,
            path: path.to_path_buf(),
            readonly,
            footer,
            storage,
        };
        debug!(
            "Opened {} image {} ({}, {})",
            image.disk_type(),
            path.display(),
            image.footer.geometry,
            if readonly { "read-only" } else { "read-write" }
        );
        Ok(image)
    }

    /// Flush the cached bitmap and sync the file
    pub fn flush(&mut self) -> Result<()> {
        self.write_back()?;
        if !self.readonly {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Flush and release the image and its whole parent chain
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        if let Storage::Differencing { parent, .. } =
            std::mem::replace(&mut self.storage, Storage::Fixed)
        {
            parent.close()?;
        }
        debug!("Closed {}", self.path.display());
        Ok(())
    }

    pub(crate) fn write_back(&mut self) -> Result<()> {
        match &mut self.storage {
            Storage::Sparse(blocks) | Storage::Differencing { blocks, .. } => {
                blocks.bitmap.flush(&mut self.file, &blocks.bat)
            }
            Storage::Fixed => Ok(()),
        }
    }

    /// Path the image was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether writes are ignored
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Parsed footer
    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    /// Image kind
    pub fn disk_type(&self) -> DiskType {
        match self.storage {
            Storage::Fixed => DiskType::Fixed,
            Storage::Sparse(_) => DiskType::Dynamic,
            Storage::Differencing { .. } => DiskType::Differencing,
        }
    }

    /// CHS geometry
    pub fn geometry(&self) -> Geometry {
        self.footer.geometry
    }

    /// Sparse header of a dynamic or differencing image
    pub fn sparse_header(&self) -> Option<&SparseHeader> {
        self.blocks().map(|b| &b.header)
    }

    /// BAT of a dynamic or differencing image
    pub fn bat(&self) -> Option<&Bat> {
        self.blocks().map(|b| &b.bat)
    }

    /// Parent of a differencing image
    pub fn parent(&self) -> Option<&Image> {
        match &self.storage {
            Storage::Differencing { parent, .. } => Some(parent),
            _ => None,
        }
    }

    /// Number of images in the chain, counting this one
    pub fn chain_depth(&self) -> usize {
        1 + self.parent().map_or(0, Image::chain_depth)
    }

    pub(crate) fn blocks(&self) -> Option<&Blocks> {
        match &self.storage {
            Storage::Sparse(blocks) | Storage::Differencing { blocks, .. } => Some(blocks),
            Storage::Fixed => None,
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Err(e) = self.write_back() {
            warn!("Failed to flush {} on drop: {}", self.path.display(), e);
        }
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("path", &self.path)
            .field("type", &self.disk_type())
            .field("geometry", &self.footer.geometry)
            .field("readonly", &self.readonly)
            .field("parent", &self.parent().map(Image::path))
            .finish()
    }
}

/// Whether `path` ends in a footer carrying the "conectix" cookie
pub fn is_vhd(path: impl AsRef<Path>) -> bool {
    let Ok(mut file) = open_file(path.as_ref(), OpenMode::Read) else {
        return false;
    };
    let Ok(len) = file.seek(SeekFrom::End(0)) else {
        return false;
    };
    matches!(read_trailing_footer(&mut file, len), Ok(Some(_)))
}

fn read_footer(file: &mut File) -> Result<Footer> {
    let len = file.seek(SeekFrom::End(0))?;
    let buf = read_trailing_footer(file, len)?.ok_or(Error::NotVhd)?;

    let stored = stored_checksum_bytes(&buf, FOOTER_CHECKSUM_OFFSET);
    let computed = checksum_bytes(&buf, FOOTER_CHECKSUM_OFFSET);
    if stored != computed {
        return Err(Error::FooterChecksum { stored, computed });
    }
    Ok(Footer::parse(&buf))
}

/// Locate and open the parent of a differencing image.
///
/// The relative locator is tried first, against the child's directory, then the
/// absolute one.
fn open_parent(file: &mut File, child: &Path, header: &SparseHeader) -> Result<Image> {
    let child_dir = child
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    for (code, relative) in [(PLATFORM_W2RU, true), (PLATFORM_W2KU, false)] {
        let Some(locator) = header.locator(code) else {
            continue;
        };
        let located = match read_locator(file, locator) {
            Ok(text) => PathBuf::from(normalize_separators(&text)),
            Err(Error::Platform(e)) => {
                warn!("Skipping unreadable parent locator: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };
        let candidate = if relative {
            child_dir.join(located)
        } else {
            located
        };
        if !candidate.is_file() {
            debug!("Parent locator {} does not exist", candidate.display());
            continue;
        }

        let parent = Image::open(&candidate, true)?;
        if parent.footer.uuid != header.parent_uuid {
            return Err(Error::ParentUuidMismatch {
                expected: header.parent_uuid,
                found: parent.footer.uuid,
            });
        }
        return Ok(parent);
    }

    Err(Error::ParentNotFound(header.parent_name().unwrap_or_default()))
}

fn read_locator(file: &mut File, locator: &ParentLocator) -> Result<String> {
    if locator.data_length > MAX_LOCATOR_BYTES {
        return Err(Error::Corrupt(format!(
            "parent locator length {} exceeds {}",
            locator.data_length, MAX_LOCATOR_BYTES
        )));
    }
    let mut raw = vec![0u8; locator.data_length as usize];
    file.seek(SeekFrom::Start(locator.data_offset))?;
    file.read_exact(&mut raw)?;
    Ok(decode_utf16(&raw, Endian::Little)?)
}
