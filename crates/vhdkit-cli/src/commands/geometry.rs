//! Geometry command implementation

use anyhow::{bail, Result};
use serde_json::json;

use vhdkit_core::calculate_geometry;

use super::human_size;

/// Execute the geometry command
pub fn execute(size_mb: u32, json: bool, quiet: bool) -> Result<()> {
    if size_mb == 0 {
        bail!("Size must be at least 1 MiB");
    }

    let (geometry, achieved) = calculate_geometry(size_mb);
    let requested = u64::from(size_mb) * 1024 * 1024;

    if json {
        let report = json!({
            "requested_bytes": requested,
            "geometry": geometry,
            "total_sectors": geometry.total_sectors(),
            "capacity_bytes": achieved,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println_if!(quiet, "Requested: {} ({} bytes)", human_size(requested), requested);
    println_if!(
        quiet,
        "Geometry:  {} (cylinders/heads/sectors per track)",
        geometry
    );
    println_if!(quiet, "Sectors:   {}", geometry.total_sectors());
    println_if!(quiet, "Capacity:  {} ({} bytes)", human_size(achieved), achieved);
    if achieved < requested {
        println_if!(
            quiet,
            "Shortfall: {} bytes",
            requested - achieved
        );
    }

    Ok(())
}
