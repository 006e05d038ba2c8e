//! Comparing an image's logical contents with a raw image

use crate::convert::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::image::Image;
use crate::progress::{Progress, ProgressCallback, Tracker};
use crate::SECTOR_SIZE;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use vhdkit_platform::{open_file, OpenMode};

/// Outcome of a comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyResult {
    /// Bytes compared
    pub bytes_verified: u64,

    /// Sectors whose contents differ
    pub mismatches: u64,

    /// Byte offset of the first differing byte
    pub first_mismatch: Option<u64>,

    /// Total time elapsed
    pub elapsed: Duration,
}

impl VerifyResult {
    /// Whether every sector matched
    pub fn is_match(&self) -> bool {
        self.mismatches == 0
    }

    /// Turn a failed comparison into [`Error::VerificationFailed`]
    pub fn into_result(self) -> Result<Self> {
        match self.first_mismatch {
            Some(offset) => Err(Error::VerificationFailed {
                offset,
                mismatches: self.mismatches,
            }),
            None => Ok(self),
        }
    }
}

/// Sector-by-sector comparison engine
pub struct Verifier {
    chunk_size: usize,
    progress_callback: Option<ProgressCallback>,
    cancel_flag: Arc<AtomicBool>,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier {
    /// Create a verifier with the default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_callback: None,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set chunk size (clamped to the valid range, rounded down to whole sectors)
    pub fn chunk_size(mut self, size: usize) -> Self {
        let size = size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self.chunk_size = size - size % SECTOR_SIZE;
        self
    }

    /// Set a progress callback
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Get a handle to cancel the comparison
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    /// Compare `image` with the raw image at `raw`.
    ///
    /// The raw image must be exactly as large as the image's capacity.
    pub fn verify(&mut self, image: &mut Image, raw: impl AsRef<Path>) -> Result<VerifyResult> {
        self.cancel_flag.store(false, Ordering::SeqCst);

        let raw = raw.as_ref();
        let mut source = open_file(raw, OpenMode::Read)?;
        let raw_size = source.metadata()?.len();
        let total_sectors = image.total_sectors();
        let total = u64::from(total_sectors) * SECTOR_SIZE as u64;
        if raw_size != total {
            return Err(Error::ConversionSize {
                raw_size,
                vhd_size: total,
            });
        }

        let mut tracker = Tracker::new(total, self.progress_callback.as_ref());
        let mut expected = vec![0u8; self.chunk_size];
        let mut actual = vec![0u8; self.chunk_size];
        let chunk_sectors = (self.chunk_size / SECTOR_SIZE) as u32;
        let mut sector = 0u32;
        let mut mismatches = 0u64;
        let mut first_mismatch = None;

        while sector < total_sectors {
            if self.cancel_flag.load(Ordering::SeqCst) {
                return Err(Error::Cancelled);
            }

            let count = chunk_sectors.min(total_sectors - sector);
            let len = count as usize * SECTOR_SIZE;
            source.read_exact(&mut expected[..len])?;
            image.read_sectors(sector, count, &mut actual[..len])?;

            let base = u64::from(sector) * SECTOR_SIZE as u64;
            for (i, (want, got)) in expected[..len]
                .chunks_exact(SECTOR_SIZE)
                .zip(actual[..len].chunks_exact(SECTOR_SIZE))
                .enumerate()
            {
                if want == got {
                    continue;
                }
                mismatches += 1;
                if first_mismatch.is_none() {
                    let byte = want.iter().zip(got).position(|(a, b)| a != b).unwrap_or(0);
                    first_mismatch = Some(base + (i * SECTOR_SIZE + byte) as u64);
                }
            }

            sector += count;
            tracker.advance(len as u64);
        }

        let (elapsed, _) = tracker.finish();
        debug!(
            "Verified {} against {}: {} mismatching sector(s)",
            image.path().display(),
            raw.display(),
            mismatches
        );
        Ok(VerifyResult {
            bytes_verified: tracker.bytes_done(),
            mismatches,
            first_mismatch,
            elapsed,
        })
    }
}

/// Compare `image` with a raw image using default settings
pub fn verify_against_raw(image: &mut Image, raw: impl AsRef<Path>) -> Result<VerifyResult> {
    Verifier::new().verify(image, raw)
}
