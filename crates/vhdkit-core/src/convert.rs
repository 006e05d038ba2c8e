//! Conversion between raw disk images and VHD images
//!
//! A raw image converts only when its size is a whole number of sectors that a
//! VHD geometry reproduces exactly. Data moves through the sector I/O engine in
//! chunks, with progress callbacks and cancellation between chunks.

use crate::config::CreateOptions;
use crate::create::{create_fixed_with, create_sparse_with};
use crate::error::{Error, Result};
use crate::geometry::{calculate_geometry_bytes, Geometry};
use crate::image::Image;
use crate::progress::{format_speed, Progress, ProgressCallback, Tracker};
use crate::SECTOR_SIZE;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use vhdkit_platform::{open_file, OpenMode};

/// Default chunk size for conversion (1 MB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Minimum chunk size (4 KB)
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Maximum chunk size (64 MB)
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Configuration for conversions
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Bytes moved per step, always a whole number of sectors
    chunk_size: usize,

    /// Options for the created image
    pub create: CreateOptions,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            create: CreateOptions::default(),
        }
    }
}

impl ConvertConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chunk size (clamped to the valid range, rounded down to whole sectors)
    pub fn chunk_size(mut self, size: usize) -> Self {
        let size = size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self.chunk_size = size - size % SECTOR_SIZE;
        self
    }

    /// Bytes moved per step
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_size
    }

    /// Set options for the created image
    pub fn create_options(mut self, options: CreateOptions) -> Self {
        self.create = options;
        self
    }
}

/// Result of a conversion
#[derive(Debug, Clone)]
pub struct ConvertResult {
    /// Bytes read from the source
    pub bytes_copied: u64,

    /// All-zero sectors left unwritten in a sparse target
    pub sectors_skipped: u64,

    /// Geometry of the VHD side of the conversion
    pub geometry: Geometry,

    /// Total time elapsed
    pub elapsed: Duration,

    /// Average speed in bytes per second
    pub average_speed: u64,
}

impl ConvertResult {
    /// Format average speed for display
    pub fn speed_display(&self) -> String {
        format_speed(self.average_speed)
    }
}

/// Conversion engine
pub struct Converter {
    config: ConvertConfig,
    progress_callback: Option<ProgressCallback>,
    cancel_flag: Arc<AtomicBool>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter {
    /// Create a new converter with default configuration
    pub fn new() -> Self {
        Self::with_config(ConvertConfig::default())
    }

    /// Create a new converter with custom configuration
    pub fn with_config(config: ConvertConfig) -> Self {
        Self {
            config,
            progress_callback: None,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set a progress callback
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Get a handle to cancel the conversion
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    /// Convert a raw image into a new fixed VHD
    pub fn to_vhd_fixed(
        &mut self,
        raw: impl AsRef<Path>,
        vhd: impl AsRef<Path>,
    ) -> Result<ConvertResult> {
        let (mut source, geometry) = open_raw(raw.as_ref())?;
        let mut image = create_fixed_with(vhd, geometry, &self.config.create, |_, _| {})?;
        self.import(&mut source, &mut image, false)
    }

    /// Convert a raw image into a new dynamic VHD, leaving all-zero sectors unallocated
    pub fn to_vhd_sparse(
        &mut self,
        raw: impl AsRef<Path>,
        vhd: impl AsRef<Path>,
    ) -> Result<ConvertResult> {
        let (mut source, geometry) = open_raw(raw.as_ref())?;
        let mut image = create_sparse_with(vhd, geometry, &self.config.create)?;
        self.import(&mut source, &mut image, true)
    }

    /// Dump the logical contents of a VHD, parents included, into a raw image
    pub fn to_raw(&mut self, vhd: impl AsRef<Path>, raw: impl AsRef<Path>) -> Result<ConvertResult> {
        self.cancel_flag.store(false, Ordering::SeqCst);

        let mut image = Image::open(vhd, true)?;
        let mut target = open_file(raw.as_ref(), OpenMode::Create)?;
        let total_sectors = image.total_sectors();
        let total = u64::from(total_sectors) * SECTOR_SIZE as u64;

        let mut tracker = Tracker::new(total, self.progress_callback.as_ref());
        let mut buffer = vec![0u8; self.config.chunk_size];
        let chunk_sectors = (buffer.len() / SECTOR_SIZE) as u32;
        let mut sector = 0u32;

        while sector < total_sectors {
            self.check_cancelled()?;

            let count = chunk_sectors.min(total_sectors - sector);
            let chunk = &mut buffer[..count as usize * SECTOR_SIZE];
            image.read_sectors(sector, count, chunk)?;
            target.write_all(chunk)?;

            sector += count;
            tracker.advance(chunk.len() as u64);
        }
        target.sync_all()?;

        let geometry = image.geometry();
        image.close()?;
        debug!("Exported {} bytes to {}", total, raw.as_ref().display());
        Ok(self.result(&tracker, 0, geometry))
    }

    fn import(&self, source: &mut File, image: &mut Image, skip_zeros: bool) -> Result<ConvertResult> {
        self.cancel_flag.store(false, Ordering::SeqCst);

        let total_sectors = image.total_sectors();
        let total = u64::from(total_sectors) * SECTOR_SIZE as u64;

        let mut tracker = Tracker::new(total, self.progress_callback.as_ref());
        let mut buffer = vec![0u8; self.config.chunk_size];
        let chunk_sectors = (buffer.len() / SECTOR_SIZE) as u32;
        let mut sector = 0u32;
        let mut skipped = 0u64;

        while sector < total_sectors {
            self.check_cancelled()?;

            let count = chunk_sectors.min(total_sectors - sector);
            let chunk = &mut buffer[..count as usize * SECTOR_SIZE];
            source.read_exact(chunk)?;

            if skip_zeros {
                skipped += write_nonzero_runs(image, sector, chunk)?;
            } else {
                image.write_sectors(sector, count, chunk)?;
            }

            sector += count;
            tracker.advance(chunk.len() as u64);
        }
        image.flush()?;

        debug!(
            "Imported {} bytes into {} ({} zero sectors skipped)",
            total,
            image.path().display(),
            skipped
        );
        Ok(self.result(&tracker, skipped, image.geometry()))
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel_flag.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn result(&self, tracker: &Tracker<'_>, sectors_skipped: u64, geometry: Geometry) -> ConvertResult {
        let (elapsed, average_speed) = tracker.finish();
        ConvertResult {
            bytes_copied: tracker.bytes_done(),
            sectors_skipped,
            geometry,
            elapsed,
            average_speed,
        }
    }
}

/// Convert a raw image into a new fixed VHD with default settings
pub fn convert_to_vhd_fixed(raw: impl AsRef<Path>, vhd: impl AsRef<Path>) -> Result<ConvertResult> {
    Converter::new().to_vhd_fixed(raw, vhd)
}

/// Convert a raw image into a new dynamic VHD with default settings
pub fn convert_to_vhd_sparse(
    raw: impl AsRef<Path>,
    vhd: impl AsRef<Path>,
) -> Result<ConvertResult> {
    Converter::new().to_vhd_sparse(raw, vhd)
}

/// Dump a VHD into a raw image with default settings
pub fn convert_to_raw(vhd: impl AsRef<Path>, raw: impl AsRef<Path>) -> Result<ConvertResult> {
    Converter::new().to_raw(vhd, raw)
}

/// Geometry reproducing a raw image of `raw_size` bytes exactly
pub fn raw_geometry(raw_size: u64) -> Result<Geometry> {
    let (geometry, vhd_size) = calculate_geometry_bytes(raw_size);
    if raw_size == 0 || raw_size % SECTOR_SIZE as u64 != 0 || vhd_size != raw_size {
        return Err(Error::ConversionSize { raw_size, vhd_size });
    }
    Ok(geometry)
}

fn open_raw(path: &Path) -> Result<(File, Geometry)> {
    let file = open_file(path, OpenMode::Read)?;
    let size = file.metadata()?.len();
    let geometry = raw_geometry(size)?;
    debug!("Raw image {}: {} bytes, geometry {}", path.display(), size, geometry);
    Ok((file, geometry))
}

/// Write the non-zero sectors of `chunk` starting at `first`; returns the zero sectors skipped
fn write_nonzero_runs(image: &mut Image, first: u32, chunk: &[u8]) -> Result<u64> {
    let mut skipped = 0u64;
    let mut run_start: Option<usize> = None;

    for (i, sector) in chunk.chunks_exact(SECTOR_SIZE).enumerate() {
        let zero = sector.iter().all(|&b| b == 0);
        match (zero, run_start) {
            (true, Some(start)) => {
                write_run(image, first, chunk, start, i)?;
                run_start = None;
            }
            (false, None) => run_start = Some(i),
            _ => {}
        }
        if zero {
            skipped += 1;
        }
    }
    if let Some(start) = run_start {
        write_run(image, first, chunk, start, chunk.len() / SECTOR_SIZE)?;
    }
    Ok(skipped)
}

fn write_run(image: &mut Image, first: u32, chunk: &[u8], start: usize, end: usize) -> Result<()> {
    let data = &chunk[start * SECTOR_SIZE..end * SECTOR_SIZE];
    image.write_sectors(first + start as u32, (end - start) as u32, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footer::DiskType;
    use std::sync::atomic::AtomicU64;
    use tempfile::TempDir;

    /// 100/4/17 is reachable from its own byte size
    const RAW_SECTORS: usize = 100 * 4 * 17;

    fn raw_image(dir: &TempDir) -> (std::path::PathBuf, Vec<u8>) {
        let mut data = vec![0u8; RAW_SECTORS * SECTOR_SIZE];
        for sector in [0usize, 1, 2, 500, RAW_SECTORS - 1] {
            let fill = (sector % 251) as u8 + 1;
            data[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE].fill(fill);
        }
        let path = dir.path().join("disk.img");
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    #[test]
    fn test_raw_geometry() {
        let size = (RAW_SECTORS * SECTOR_SIZE) as u64;
        assert_eq!(raw_geometry(size).unwrap(), Geometry::new(100, 4, 17));
        assert!(matches!(
            raw_geometry(size + 1),
            Err(Error::ConversionSize { .. })
        ));
        // 2049 sectors cannot be expressed as c*4*17
        assert!(matches!(
            raw_geometry(2049 * 512),
            Err(Error::ConversionSize { .. })
        ));
        assert!(raw_geometry(0).is_err());
    }

    #[test]
    fn test_config_chunk_size() {
        assert_eq!(ConvertConfig::new().chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(ConvertConfig::new().chunk_size(1).chunk_size, MIN_CHUNK_SIZE);
        assert_eq!(ConvertConfig::new().chunk_size(5000).chunk_size, 4608);
        assert_eq!(
            ConvertConfig::new().chunk_size(usize::MAX).chunk_size,
            MAX_CHUNK_SIZE
        );
    }

    #[test]
    fn test_zero_chunk_size_still_converts() {
        let dir = TempDir::new().unwrap();
        let (raw, data) = raw_image(&dir);
        let vhd = dir.path().join("disk.vhd");
        let back = dir.path().join("back.img");

        let config = ConvertConfig::new().chunk_size(0);
        assert_eq!(config.chunk_bytes(), MIN_CHUNK_SIZE);

        let mut converter = Converter::with_config(config.clone());
        converter.to_vhd_fixed(&raw, &vhd).unwrap();
        Converter::with_config(config).to_raw(&vhd, &back).unwrap();
        assert_eq!(std::fs::read(&back).unwrap(), data);
    }

    #[test]
    fn test_fixed_round_trip() {
        let dir = TempDir::new().unwrap();
        let (raw, data) = raw_image(&dir);
        let vhd = dir.path().join("disk.vhd");
        let back = dir.path().join("back.img");

        let result = convert_to_vhd_fixed(&raw, &vhd).unwrap();
        assert_eq!(result.bytes_copied, data.len() as u64);
        assert_eq!(result.sectors_skipped, 0);
        assert_eq!(
            Image::open(&vhd, true).unwrap().disk_type(),
            DiskType::Fixed
        );

        convert_to_raw(&vhd, &back).unwrap();
        assert_eq!(std::fs::read(&back).unwrap(), data);
    }

    #[test]
    fn test_sparse_skips_zero_sectors() {
        let dir = TempDir::new().unwrap();
        let (raw, data) = raw_image(&dir);
        let vhd = dir.path().join("disk.vhd");
        let back = dir.path().join("back.img");

        let config = ConvertConfig::new()
            .chunk_size(MIN_CHUNK_SIZE)
            .create_options(CreateOptions::new().block_size(64 * 512));
        let result = Converter::with_config(config).to_vhd_sparse(&raw, &vhd).unwrap();
        assert_eq!(result.sectors_skipped, (RAW_SECTORS - 5) as u64);

        let image = Image::open(&vhd, true).unwrap();
        // Sectors 0-2 share block 0, 500 is in block 7, the last sector in block 106
        assert_eq!(image.bat().unwrap().allocated_count(), 3);
        image.close().unwrap();

        convert_to_raw(&vhd, &back).unwrap();
        assert_eq!(std::fs::read(&back).unwrap(), data);
    }

    #[test]
    fn test_rejects_unreachable_size() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("odd.img");
        std::fs::write(&raw, vec![0u8; 2049 * 512]).unwrap();
        assert!(matches!(
            convert_to_vhd_fixed(&raw, dir.path().join("odd.vhd")),
            Err(Error::ConversionSize { raw_size, .. }) if raw_size == 2049 * 512
        ));
        assert!(!dir.path().join("odd.vhd").exists());
    }

    #[test]
    fn test_progress_reported() {
        let dir = TempDir::new().unwrap();
        let (raw, data) = raw_image(&dir);

        let last = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&last);
        let mut converter = Converter::with_config(ConvertConfig::new().chunk_size(64 * 1024))
            .on_progress(move |p| sink.store(p.bytes_done, Ordering::SeqCst));

        converter
            .to_vhd_sparse(&raw, dir.path().join("disk.vhd"))
            .unwrap();
        assert_eq!(last.load(Ordering::SeqCst), data.len() as u64);
    }

    #[test]
    fn test_cancel_from_callback() {
        let dir = TempDir::new().unwrap();
        let (raw, _) = raw_image(&dir);

        let converter = Converter::with_config(ConvertConfig::new().chunk_size(MIN_CHUNK_SIZE));
        let cancel = converter.cancel_handle();
        let mut converter = converter.on_progress(move |_| cancel.store(true, Ordering::SeqCst));

        assert!(matches!(
            converter.to_vhd_fixed(&raw, dir.path().join("disk.vhd")),
            Err(Error::Cancelled)
        ));
    }
}
