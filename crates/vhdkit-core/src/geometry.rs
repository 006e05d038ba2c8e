//! CHS geometry for VHD images
//!
//! A VHD's capacity is defined by its cylinder/head/sectors-per-track triple,
//! not by the size fields in the footer. The mapping from a requested size to a
//! triple follows the fixed legacy algorithm every VHD writer uses, so that two
//! tools asked for the same size produce the same disk.

use crate::error::{Error, Result};
use crate::SECTOR_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest sector count any geometry can address (65535 x 16 x 255)
pub const MAX_GEOMETRY_SECTORS: u64 = 65535 * 16 * 255;

/// Sector count at which the algorithm switches to 255 sectors per track
const HIGH_CAPACITY_SECTORS: u64 = 65535 * 16 * 63;

/// Cylinder / head / sectors-per-track triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    /// Cylinders
    pub cyl: u16,
    /// Heads
    pub heads: u8,
    /// Sectors per track
    pub spt: u8,
}

impl Geometry {
    /// Build a geometry from its three dimensions
    pub const fn new(cyl: u16, heads: u8, spt: u8) -> Self {
        Self { cyl, heads, spt }
    }

    /// Number of sectors addressable by this geometry
    pub fn total_sectors(&self) -> u32 {
        u32::from(self.cyl) * u32::from(self.heads) * u32::from(self.spt)
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> u64 {
        u64::from(self.total_sectors()) * SECTOR_SIZE as u64
    }

    /// Reject geometries with a zero dimension
    pub fn validate(&self) -> Result<()> {
        if self.cyl == 0 || self.heads == 0 || self.spt == 0 {
            return Err(Error::InvalidGeometry {
                cyl: self.cyl,
                heads: self.heads,
                spt: self.spt,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cyl, self.heads, self.spt)
    }
}

/// Geometry for a capacity of `size_mb` MiB, with the exact capacity it achieves.
///
/// The achieved capacity is never larger than requested.
pub fn calculate_geometry(size_mb: u32) -> (Geometry, u64) {
    geometry_from_sectors(u64::from(size_mb) * 1024 * 1024 / SECTOR_SIZE as u64)
}

/// Geometry for a capacity given in bytes
pub fn calculate_geometry_bytes(size: u64) -> (Geometry, u64) {
    geometry_from_sectors(size / SECTOR_SIZE as u64)
}

/// Geometry covering at most `sectors` sectors
pub fn geometry_from_sectors(sectors: u64) -> (Geometry, u64) {
    let mut ts = sectors.min(MAX_GEOMETRY_SECTORS);

    let (spt, heads, cth) = if ts >= HIGH_CAPACITY_SECTORS {
        ts = HIGH_CAPACITY_SECTORS;
        (255u64, 16u64, ts / 255)
    } else {
        let mut spt = 17u64;
        let mut cth = ts / spt;
        let mut heads = cth.div_ceil(1024).max(4);

        if cth >= heads * 1024 || heads > 16 {
            spt = 31;
            heads = 16;
            cth = ts / spt;
        }
        if cth >= heads * 1024 {
            spt = 63;
            heads = 16;
            cth = ts / spt;
        }
        (spt, heads, cth)
    };

    // Every branch bounds cth / heads below 65536 and heads, spt below 256
    let geometry = Geometry::new((cth / heads) as u16, heads as u8, spt as u8);
    (geometry, geometry.capacity())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_disk() {
        let (g, size) = calculate_geometry(10);
        assert_eq!(g, Geometry::new(301, 4, 17));
        assert_eq!(size, 301 * 4 * 17 * 512);
    }

    #[test]
    fn test_one_mib() {
        let (g, size) = calculate_geometry(1);
        assert_eq!(g, Geometry::new(30, 4, 17));
        assert_eq!(size, 2040 * 512);
    }

    #[test]
    fn test_escalates_to_63_spt() {
        let (g, _) = calculate_geometry(2048);
        assert_eq!(g, Geometry::new(4161, 16, 63));
    }

    #[test]
    fn test_high_capacity_uses_255_spt() {
        let (g, size) = calculate_geometry(32256);
        assert_eq!(g.spt, 255);
        assert_eq!(g.heads, 16);
        assert_eq!(g.cyl, 16191);
        assert_eq!(size, HIGH_CAPACITY_SECTORS * 512);
    }

    #[test]
    fn test_clamped_to_maximum() {
        let (a, _) = calculate_geometry(u32::MAX);
        let (b, _) = calculate_geometry(200_000);
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_size_is_degenerate() {
        let (g, size) = calculate_geometry(0);
        assert_eq!(g.cyl, 0);
        assert_eq!(size, 0);
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_geometry_invariants() {
        let sizes = (1..=4096).chain((4097..=140_000).step_by(997));
        for size_mb in sizes {
            let (g, achieved) = calculate_geometry(size_mb);
            assert!((4..=16).contains(&g.heads), "heads for {size_mb}");
            assert!([17, 31, 63, 255].contains(&g.spt), "spt for {size_mb}");
            assert!(achieved <= u64::from(size_mb) * 1024 * 1024, "size for {size_mb}");
            assert_eq!(achieved, g.capacity());
        }
    }

    #[test]
    fn test_bytes_matches_mib() {
        for size_mb in [1u32, 10, 100, 500, 2048] {
            let (a, _) = calculate_geometry(size_mb);
            let (b, _) = calculate_geometry_bytes(u64::from(size_mb) * 1024 * 1024);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_validate() {
        assert!(Geometry::new(100, 4, 17).validate().is_ok());
        assert!(matches!(
            Geometry::new(100, 0, 17).validate(),
            Err(Error::InvalidGeometry { heads: 0, .. })
        ));
        assert!(Geometry::new(100, 4, 0).validate().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Geometry::new(100, 4, 17).to_string(), "100/4/17");
        assert_eq!(Geometry::new(100, 4, 17).total_sectors(), 6800);
    }
}
