//! Info command implementation

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use vhdkit_core::{Image, ImageInfo};

use super::human_size;

/// Execute the info command
pub fn execute(path: &Path, json: bool, quiet: bool) -> Result<()> {
    let image =
        Image::open(path, true).with_context(|| format!("Failed to open {}", path.display()))?;
    let info = image.info();
    image.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    print_info(&info, quiet);
    Ok(())
}

fn print_info(info: &ImageInfo, quiet: bool) {
    println_if!(quiet, "{}", style(info.path.display()).bold());
    println_if!(quiet, "  Type:           {}", info.disk_type);
    println_if!(quiet, "  Geometry:       {}", info.geometry);
    println_if!(
        quiet,
        "  Capacity:       {} ({} bytes)",
        human_size(info.capacity),
        info.capacity
    );
    println_if!(quiet, "  Current size:   {}", info.current_size);
    if info.original_size != info.current_size {
        println_if!(quiet, "  Original size:  {}", info.original_size);
    }
    println_if!(quiet, "  Created:        {}", format_timestamp(info.created));
    println_if!(quiet, "  UUID:           {}", info.uuid);
    println_if!(
        quiet,
        "  Creator:        {} {} ({})",
        info.creator_app,
        info.creator_version,
        info.creator_os
    );

    if let (Some(block_size), Some(total), Some(allocated)) =
        (info.block_size, info.total_blocks, info.allocated_blocks)
    {
        println_if!(quiet, "  Block size:     {}", human_size(u64::from(block_size)));
        println_if!(quiet, "  Blocks:         {} of {} allocated", allocated, total);
    }

    if let Some(parent_uuid) = info.parent_uuid {
        println_if!(quiet);
        println_if!(quiet, "  {}", style("Parent").bold());
        if let Some(name) = &info.parent_name {
            println_if!(quiet, "  Name:           {}", name);
        }
        if let Some(path) = &info.parent_path {
            println_if!(quiet, "  Path:           {}", path.display());
        }
        println_if!(quiet, "  UUID:           {}", parent_uuid);
        println_if!(quiet, "  Chain depth:    {}", info.chain_depth);
    }
}

/// Seconds since the Unix epoch as a UTC "YYYY-MM-DD HH:MM:SS" string
fn format_timestamp(secs: u64) -> String {
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days as i64);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
        year,
        month,
        day,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Gregorian date for a day count since 1970-01-01
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
