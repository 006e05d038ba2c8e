//! Create command implementation

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use console::style;
use std::fmt;
use std::path::{Path, PathBuf};

use vhdkit_core::{
    calculate_geometry, create_differencing_with, create_fixed_with, create_sparse_with,
    CreateOptions, Geometry, Image, ImageKind, SECTOR_SIZE,
};

use super::{ensure_writable, human_size, parse_size};
use crate::progress::create_progress_bar;

/// Kind of image to create
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CreateKind {
    /// Preallocated image
    Fixed,
    /// Dynamic image that grows as blocks are written
    #[value(alias = "dynamic")]
    Sparse,
    /// Dynamic image layered over a parent
    #[value(alias = "differencing")]
    Diff,
}

impl fmt::Display for CreateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateKind::Fixed => write!(f, "fixed"),
            CreateKind::Sparse => write!(f, "sparse"),
            CreateKind::Diff => write!(f, "differencing"),
        }
    }
}

/// Pick the image kind from the flag, the presence of a parent, then the config default
pub fn resolve_kind(kind: Option<CreateKind>, has_parent: bool, default: ImageKind) -> CreateKind {
    match (kind, has_parent, default) {
        (Some(kind), _, _) => kind,
        (None, true, _) => CreateKind::Diff,
        (None, false, ImageKind::Fixed) => CreateKind::Fixed,
        (None, false, ImageKind::Sparse) => CreateKind::Sparse,
    }
}

/// Arguments for the create command
pub struct CreateArgs {
    pub kind: CreateKind,
    pub path: PathBuf,
    pub size: Option<u32>,
    pub chs: Option<String>,
    pub parent: Option<PathBuf>,
    pub block_size: String,
    pub overwrite: bool,
    pub quiet: bool,
}

/// Execute the create command
pub fn execute(args: CreateArgs) -> Result<()> {
    let quiet = args.quiet;

    if args.kind == CreateKind::Diff && args.parent.is_none() {
        bail!("A differencing image needs --parent");
    }
    if args.kind != CreateKind::Diff && args.parent.is_some() {
        bail!("--parent only applies to differencing images");
    }

    let options = if args.kind == CreateKind::Fixed {
        CreateOptions::new()
    } else {
        let block_size = parse_size(&args.block_size)?;
        let block_size = u32::try_from(block_size)
            .with_context(|| format!("Block size too large: {}", args.block_size))?;
        CreateOptions::new().block_size(block_size)
    };

    ensure_writable(&args.path, args.overwrite, quiet)?;

    let image = match (args.kind, &args.parent) {
        (CreateKind::Diff, Some(parent)) => {
            println_if!(
                quiet,
                "{} Creating differencing image over {}",
                style("→").cyan(),
                parent.display()
            );
            create_differencing_with(&args.path, parent, &options)
                .with_context(|| format!("Failed to create {}", args.path.display()))?
        }
        (kind, _) => {
            let geometry = requested_geometry(args.size, args.chs.as_deref())?;
            println_if!(
                quiet,
                "{} Creating {} image with geometry {} ({})",
                style("→").cyan(),
                kind,
                geometry,
                human_size(geometry.capacity())
            );
            create_base(kind, &args.path, geometry, &options, quiet)
                .with_context(|| format!("Failed to create {}", args.path.display()))?
        }
    };

    print_summary(&image, quiet);
    image.close()?;
    Ok(())
}

fn create_base(
    kind: CreateKind,
    path: &Path,
    geometry: Geometry,
    options: &CreateOptions,
    quiet: bool,
) -> Result<Image> {
    if kind == CreateKind::Sparse {
        return Ok(create_sparse_with(path, geometry, options)?);
    }

    let pb = create_progress_bar(geometry.capacity(), "Zeroing", quiet)?;
    let image = create_fixed_with(path, geometry, options, |done, _| {
        pb.set_position(done * SECTOR_SIZE as u64);
    });
    pb.finish_and_clear();
    Ok(image?)
}

/// Geometry from `--chs`, else from `--size`
fn requested_geometry(size: Option<u32>, chs: Option<&str>) -> Result<Geometry> {
    if let Some(chs) = chs {
        return parse_chs(chs);
    }

    let size = size.context("Either --size or --chs is required")?;
    if size == 0 {
        bail!("Size must be at least 1 MiB");
    }
    let (geometry, achieved) = calculate_geometry(size);
    tracing::debug!(
        "{} MiB maps to {} ({} bytes)",
        size,
        geometry,
        achieved
    );
    Ok(geometry)
}

/// Parse "C/H/S" into a geometry
pub fn parse_chs(s: &str) -> Result<Geometry> {
    let parts: Vec<&str> = s.trim().split('/').collect();
    let [cyl, heads, spt] = parts.as_slice() else {
        bail!("Geometry must be given as C/H/S, got: {}", s);
    };

    let cyl: u16 = cyl
        .trim()
        .parse()
        .with_context(|| format!("Invalid cylinder count: {}", cyl))?;
    let heads: u8 = heads
        .trim()
        .parse()
        .with_context(|| format!("Invalid head count: {}", heads))?;
    let spt: u8 = spt
        .trim()
        .parse()
        .with_context(|| format!("Invalid sectors per track: {}", spt))?;

    let geometry = Geometry::new(cyl, heads, spt);
    geometry.validate()?;
    Ok(geometry)
}

fn print_summary(image: &Image, quiet: bool) {
    let info = image.info();
    let name = vhdkit_platform::file_name(image.path()).unwrap_or("image");

    println_if!(quiet);
    println_if!(
        quiet,
        "{} Created {} ({})",
        style("Success:").green().bold(),
        style(name).bold(),
        info.disk_type
    );
    println_if!(quiet, "  Geometry: {}", info.geometry);
    println_if!(quiet, "  Capacity: {}", human_size(info.capacity));
    if let Some(block_size) = info.block_size {
        println_if!(quiet, "  Block size: {}", human_size(u64::from(block_size)));
    }
    if let Some(parent) = &info.parent_path {
        println_if!(quiet, "  Parent: {}", parent.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chs() {
        assert_eq!(parse_chs("100/4/17").unwrap(), Geometry::new(100, 4, 17));
        assert_eq!(parse_chs(" 1024 / 16 / 63 ").unwrap(), Geometry::new(1024, 16, 63));
    }

    #[test]
    fn test_parse_chs_invalid() {
        assert!(parse_chs("100/4").is_err());
        assert!(parse_chs("100/4/17/1").is_err());
        assert!(parse_chs("a/4/17").is_err());
        assert!(parse_chs("100/300/17").is_err());
        assert!(parse_chs("0/4/17").is_err());
    }

    #[test]
    fn test_resolve_kind() {
        assert_eq!(
            resolve_kind(Some(CreateKind::Fixed), true, ImageKind::Sparse),
            CreateKind::Fixed
        );
        assert_eq!(resolve_kind(None, true, ImageKind::Fixed), CreateKind::Diff);
        assert_eq!(resolve_kind(None, false, ImageKind::Fixed), CreateKind::Fixed);
        assert_eq!(resolve_kind(None, false, ImageKind::Sparse), CreateKind::Sparse);
    }

    #[test]
    fn test_requested_geometry() {
        assert!(requested_geometry(None, None).is_err());
        assert!(requested_geometry(Some(0), None).is_err());
        let g = requested_geometry(Some(64), None).unwrap();
        assert!(g.capacity() <= 64 * 1024 * 1024);
        assert_eq!(
            requested_geometry(Some(64), Some("100/4/17")).unwrap(),
            Geometry::new(100, 4, 17)
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(CreateKind::Diff.to_string(), "differencing");
        assert_eq!(CreateKind::Sparse.to_string(), "sparse");
    }
}
