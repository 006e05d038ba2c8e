//! CLI command implementations

pub mod check;
pub mod config;
pub mod convert;
pub mod create;
pub mod geometry;
pub mod info;

use anyhow::{bail, Context, Result};
use console::style;
use dialoguer::Confirm;
use humansize::{format_size, BINARY};
use std::path::Path;

/// Parse a size string such as "512", "64K", "2M" or "1G" into bytes
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();
    let s = s.strip_suffix('B').unwrap_or(&s);

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('K') {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('G') {
        (n, 1024 * 1024 * 1024)
    } else {
        (s, 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid size: {}", s))?;

    num.checked_mul(multiplier)
        .with_context(|| format!("Size too large: {}", s))
}

/// Human-readable byte count
pub fn human_size(bytes: u64) -> String {
    format_size(bytes, BINARY)
}

/// Make sure `path` may be written, asking before replacing an existing file
pub fn ensure_writable(path: &Path, overwrite: bool, quiet: bool) -> Result<()> {
    if !path.exists() || overwrite {
        return Ok(());
    }

    if quiet || !console::user_attended() {
        bail!(
            "{} already exists (use --force to replace it)",
            path.display()
        );
    }

    let proceed = Confirm::new()
        .with_prompt(format!("{} already exists. Replace it?", path.display()))
        .default(false)
        .interact()?;

    if !proceed {
        bail!("Aborted by user");
    }

    eprintln!("{} Replacing {}", style("Note:").yellow(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_size_plain() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size(" 4096 ").unwrap(), 4096);
    }

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size("64K").unwrap(), 64 * 1024);
        assert_eq!(parse_size("2m").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("2MB").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_size_invalid() {
        assert!(parse_size("").is_err());
        assert!(parse_size("abc").is_err());
        assert!(parse_size("1.5M").is_err());
        assert!(parse_size("-1K").is_err());
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(2 * 1024 * 1024), "2 MiB");
    }

    #[test]
    fn test_ensure_writable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.vhd");
        assert!(ensure_writable(&path, false, true).is_ok());

        std::fs::write(&path, b"x").unwrap();
        assert!(ensure_writable(&path, true, true).is_ok());
        let err = ensure_writable(&path, false, true).unwrap_err();
        assert!(err.to_string().contains("--force"));
    }
}
