//! Creating fixed, dynamic and differencing images
//!
//! Every constructor writes the complete on-disk structure and then reopens the
//! file through [`Image::open`], so a freshly created image has passed the same
//! validation as any other.
//!
//! Layout of a new dynamic or differencing image:
//!
//! ```text
//! 0      footer copy
//! 512    sparse header
//! 1536   BAT, all entries unallocated, padded to whole sectors
//!        5 zero sectors
//!        (differencing) W2ku locator data, W2ru locator data, 5 zero sectors
//!        footer
//! ```

use crate::bat::{table_sectors, BLOCK_PADDING_SECTORS};
use crate::checksum;
use crate::config::CreateOptions;
use crate::error::{Error, Result};
use crate::footer::{DiskType, Footer};
use crate::geometry::Geometry;
use crate::header::{ParentLocator, SparseHeader, PLATFORM_W2KU, PLATFORM_W2RU};
use crate::image::Image;
use crate::io::write_zero_sectors;
use crate::SECTOR_SIZE;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::debug;
use vhdkit_platform::{
    absolute, encode_utf16, encode_utf16_into, file_name, open_file, relative_path, Endian,
    OpenMode, PlatformError,
};

/// Sectors zero-filled between progress reports when creating a fixed image (1 MiB)
const FIXED_CHUNK_SECTORS: u64 = 2048;

/// Create a fixed image with `geometry`
pub fn create_fixed(path: impl AsRef<Path>, geometry: Geometry) -> Result<Image> {
    create_fixed_with(path, geometry, &CreateOptions::default(), |_, _| {})
}

/// Create a fixed image, reporting `(sectors_written, total_sectors)` as it goes
pub fn create_fixed_with<F>(
    path: impl AsRef<Path>,
    geometry: Geometry,
    options: &CreateOptions,
    mut progress: F,
) -> Result<Image>
where
    F: FnMut(u64, u64),
{
    let path = path.as_ref();
    geometry.validate()?;

    let footer = Footer::new(DiskType::Fixed, geometry, options.creator_app);
    let total = u64::from(geometry.total_sectors());

    let mut file = open_file(path, OpenMode::Create)?;
    let mut written = 0u64;
    while written < total {
        let n = (total - written).min(FIXED_CHUNK_SECTORS);
        write_zero_sectors(&mut file, n)?;
        written += n;
        progress(written, total);
    }
    file.write_all(&footer.to_bytes())?;
    file.sync_all()?;
    drop(file);

    debug!("Created fixed image {} ({})", path.display(), geometry);
    Image::open(path, false)
}

/// Create a dynamic image with `geometry`
pub fn create_sparse(path: impl AsRef<Path>, geometry: Geometry) -> Result<Image> {
    create_sparse_with(path, geometry, &CreateOptions::default())
}

/// Create a dynamic image with explicit options
pub fn create_sparse_with(
    path: impl AsRef<Path>,
    geometry: Geometry,
    options: &CreateOptions,
) -> Result<Image> {
    let path = path.as_ref();
    geometry.validate()?;
    options.validate()?;

    let (footer, mut header) = dynamic_records(DiskType::Dynamic, geometry, options);
    checksum::stamp(&mut header);
    write_dynamic(path, &footer, &header, &[])?;

    debug!(
        "Created dynamic image {} ({}, {} blocks of {} bytes)",
        path.display(),
        geometry,
        header.max_bat_entries,
        header.block_size
    );
    Image::open(path, false)
}

/// Create a differencing image over `parent`
pub fn create_differencing(path: impl AsRef<Path>, parent: impl AsRef<Path>) -> Result<Image> {
    create_differencing_with(path, parent, &CreateOptions::default())
}

/// Create a differencing image over `parent` with explicit options.
///
/// The parent is opened and validated before anything is written, and lends the
/// child its geometry. The child records the parent's base name, absolute path and
/// path relative to the child's directory.
pub fn create_differencing_with(
    path: impl AsRef<Path>,
    parent: impl AsRef<Path>,
    options: &CreateOptions,
) -> Result<Image> {
    let path = path.as_ref();
    let parent_path = parent.as_ref();
    options.validate()?;

    let parent_abs = absolute(parent_path)?;
    let child_abs = absolute(path)?;
    if parent_abs == child_abs {
        return Err(Error::InvalidConfig(
            "a differencing image cannot be its own parent".to_string(),
        ));
    }

    let parent_image = Image::open(&parent_abs, true)?;
    let geometry = parent_image.geometry();
    let parent_uuid = parent_image.footer().uuid;
    let parent_timestamp = parent_image.footer().timestamp;
    parent_image.close()?;

    let child_dir = child_abs
        .parent()
        .ok_or_else(|| PlatformError::NotRelative {
            from: child_abs.clone(),
            to: parent_abs.clone(),
        })?;
    let relative = relative_path(child_dir, &parent_abs)?;

    let w2ku = encode_utf16(path_text(&parent_abs)?, Endian::Little);
    let w2ru = encode_utf16(path_text(&relative)?, Endian::Little);

    let (footer, mut header) = dynamic_records(DiskType::Differencing, geometry, options);
    header.parent_uuid = parent_uuid;
    header.parent_timestamp = parent_timestamp;
    encode_utf16_into(file_name(&parent_abs)?, Endian::Big, &mut header.parent_name)?;

    let mut data_offset = locator_area_offset(&header);
    for (slot, (code, data)) in [(PLATFORM_W2KU, &w2ku), (PLATFORM_W2RU, &w2ru)]
        .into_iter()
        .enumerate()
    {
        let data_length = data.len() as u32;
        let data_space = data_length / SECTOR_SIZE as u32 + 1;
        header.locators[slot] = ParentLocator {
            platform_code: code,
            data_space,
            data_length,
            reserved: 0,
            data_offset,
        };
        data_offset += u64::from(data_space) * SECTOR_SIZE as u64;
    }
    checksum::stamp(&mut header);

    write_dynamic(path, &footer, &header, &[w2ku, w2ru])?;

    debug!(
        "Created differencing image {} over {} ({})",
        path.display(),
        parent_abs.display(),
        relative.display()
    );
    Image::open(path, false)
}

/// Footer and unstamped header of a new dynamic or differencing image
fn dynamic_records(
    kind: DiskType,
    geometry: Geometry,
    options: &CreateOptions,
) -> (Footer, SparseHeader) {
    let sectors_per_block = options.block_size / SECTOR_SIZE as u32;
    let max_bat_entries = geometry.total_sectors().div_ceil(sectors_per_block);
    let footer = Footer::new(kind, geometry, options.creator_app);
    let header = SparseHeader::new(max_bat_entries, options.block_size);
    (footer, header)
}

/// Byte offset right after the BAT and its padding
fn locator_area_offset(header: &SparseHeader) -> u64 {
    header.table_offset
        + u64::from(table_sectors(header.max_bat_entries) + BLOCK_PADDING_SECTORS)
            * SECTOR_SIZE as u64
}

fn write_dynamic(
    path: &Path,
    footer: &Footer,
    header: &SparseHeader,
    locator_data: &[Vec<u8>],
) -> Result<()> {
    let mut file = open_file(path, OpenMode::Create)?;
    let footer_bytes = footer.to_bytes();

    file.write_all(&footer_bytes)?;
    file.write_all(&header.to_bytes())?;
    file.write_all(&vec![
        0xFFu8;
        table_sectors(header.max_bat_entries) as usize * SECTOR_SIZE
    ])?;
    write_zero_sectors(&mut file, u64::from(BLOCK_PADDING_SECTORS))?;

    if !locator_data.is_empty() {
        for (data, locator) in locator_data.iter().zip(header.locators.iter()) {
            write_locator_area(&mut file, data, locator)?;
        }
        write_zero_sectors(&mut file, u64::from(BLOCK_PADDING_SECTORS))?;
    }

    file.write_all(&footer_bytes)?;
    file.sync_all()?;
    Ok(())
}

fn write_locator_area(file: &mut File, data: &[u8], locator: &ParentLocator) -> Result<()> {
    let mut area = vec![0u8; locator.data_space as usize * SECTOR_SIZE];
    area[..data.len()].copy_from_slice(data);
    file.write_all(&area)?;
    Ok(())
}

fn path_text(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| PlatformError::NonUnicodePath(path.to_path_buf()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footer::FOOTER_SIZE;
    use crate::header::{HEADER_SIZE, DEFAULT_BLOCK_SIZE};
    use tempfile::TempDir;
    use vhdkit_platform::decode_utf16;

    const GEOM: Geometry = Geometry::new(100, 4, 17);

    #[test]
    fn test_fixed_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixed.vhd");
        let image = create_fixed(&path, GEOM).unwrap();
        assert_eq!(image.disk_type(), DiskType::Fixed);
        image.close().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 6800 * 512 + FOOTER_SIZE);
        assert_eq!(&data[6800 * 512..6800 * 512 + 8], b"conectix");
        assert!(data[..6800 * 512].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fixed_progress() {
        let dir = TempDir::new().unwrap();
        let mut reports = Vec::new();
        create_fixed_with(
            dir.path().join("fixed.vhd"),
            Geometry::new(1000, 16, 63),
            &CreateOptions::default(),
            |done, total| reports.push((done, total)),
        )
        .unwrap();

        let total = 1000 * 16 * 63;
        assert_eq!(reports.last(), Some(&(total, total)));
        assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_invalid_geometry_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.vhd");
        assert!(matches!(
            create_fixed(&path, Geometry::new(0, 4, 17)),
            Err(Error::InvalidGeometry { .. })
        ));
        assert!(matches!(
            create_sparse(&path, Geometry::new(10, 4, 0)),
            Err(Error::InvalidGeometry { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_sparse_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sparse.vhd");
        create_sparse(&path, GEOM).unwrap().close().unwrap();

        let data = std::fs::read(&path).unwrap();
        // footer + header + 1 BAT sector + 5 padding + footer
        assert_eq!(data.len(), 512 + HEADER_SIZE + 512 + 5 * 512 + 512);
        assert_eq!(&data[..8], b"conectix");
        assert_eq!(&data[512..520], b"cxsparse");
        assert!(data[1536..2048].iter().all(|&b| b == 0xFF));
        assert!(data[2048..2048 + 5 * 512].iter().all(|&b| b == 0));
        assert_eq!(&data[..512], &data[data.len() - 512..]);
    }

    #[test]
    fn test_sparse_custom_block_size() {
        let dir = TempDir::new().unwrap();
        let options = CreateOptions::new().block_size(64 * 1024);
        let image = create_sparse_with(dir.path().join("s.vhd"), GEOM, &options).unwrap();
        let header = image.sparse_header().unwrap();
        assert_eq!(header.block_size, 64 * 1024);
        assert_eq!(header.max_bat_entries, 6800u32.div_ceil(128));
    }

    #[test]
    fn test_sparse_rejects_bad_block_size() {
        let dir = TempDir::new().unwrap();
        let options = CreateOptions::new().block_size(1000);
        assert!(matches!(
            create_sparse_with(dir.path().join("s.vhd"), GEOM, &options),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_differencing_locators() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("base.vhd");
        let sub = dir.path().join("diffs");
        std::fs::create_dir(&sub).unwrap();
        let child = sub.join("child.vhd");

        let parent = create_sparse(&base, GEOM).unwrap();
        let parent_uuid = parent.footer().uuid;
        let parent_ts = parent.footer().timestamp;
        parent.close().unwrap();

        let image = create_differencing(&child, &base).unwrap();
        assert_eq!(image.geometry(), GEOM);
        let header = image.sparse_header().unwrap().clone();
        image.close().unwrap();

        assert_eq!(header.parent_uuid, parent_uuid);
        assert_eq!(header.parent_timestamp, parent_ts);
        assert_eq!(header.parent_name().unwrap(), "base.vhd");

        let data = std::fs::read(&child).unwrap();
        let read = |loc: &ParentLocator| {
            let start = loc.data_offset as usize;
            decode_utf16(&data[start..start + loc.data_length as usize], Endian::Little).unwrap()
        };

        let w2ku = header.locator(PLATFORM_W2KU).unwrap();
        let w2ru = header.locator(PLATFORM_W2RU).unwrap();
        assert_eq!(w2ku.data_offset, 1536 + 512 + 5 * 512);
        assert_eq!(
            w2ru.data_offset,
            w2ku.data_offset + u64::from(w2ku.data_space) * 512
        );
        assert_eq!(w2ku.data_space, w2ku.data_length / 512 + 1);
        assert_eq!(read(w2ku), absolute(&base).unwrap().to_str().unwrap());
        assert_eq!(
            read(w2ru),
            Path::new("..").join("base.vhd").to_str().unwrap()
        );

        let footer_at = w2ru.data_offset as usize + w2ru.data_space as usize * 512 + 5 * 512;
        assert_eq!(data.len(), footer_at + 512);
        assert_eq!(&data[footer_at..footer_at + 8], b"conectix");
    }

    #[test]
    fn test_differencing_missing_parent_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let child = dir.path().join("child.vhd");
        assert!(create_differencing(&child, dir.path().join("nope.vhd")).is_err());
        assert!(!child.exists());
    }

    #[test]
    fn test_differencing_over_itself() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("self.vhd");
        create_sparse(&path, GEOM).unwrap().close().unwrap();
        assert!(matches!(
            create_differencing(&path, &path),
            Err(Error::InvalidConfig(_))
        ));
        // The existing image is untouched
        assert!(Image::open(&path, true).is_ok());
    }

    #[test]
    fn test_default_block_size_used() {
        let dir = TempDir::new().unwrap();
        let image = create_sparse(dir.path().join("s.vhd"), GEOM).unwrap();
        assert_eq!(image.sparse_header().unwrap().block_size, DEFAULT_BLOCK_SIZE);
    }
}
