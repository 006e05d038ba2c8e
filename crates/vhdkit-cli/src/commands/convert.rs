//! Convert command implementation
//!
//! Moves data between raw images and VHDs, with an optional comparison pass.

use anyhow::{bail, Context, Result};
use console::style;
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vhdkit_core::{
    format_duration, is_vhd, ConvertConfig, ConvertResult, Converter, CreateOptions, Error, Image,
    Progress, Verifier,
};

use super::{ensure_writable, human_size, parse_size};
use crate::progress::{create_progress_bar, forward_cancel};

/// Arguments for the convert command
pub struct ConvertArgs {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub sparse: bool,
    pub to_raw: bool,
    pub verify: bool,
    pub chunk_size: String,
    pub block_size: String,
    pub overwrite: bool,
    pub cancel_flag: Arc<AtomicBool>,
    pub quiet: bool,
}

/// Execute the convert command
pub fn execute(args: ConvertArgs) -> Result<()> {
    let quiet = args.quiet;

    if !args.input.exists() {
        bail!("Input not found: {}", args.input.display());
    }
    if args.to_raw && !is_vhd(&args.input) {
        bail!("{} is not a VHD image", args.input.display());
    }
    if !args.to_raw && is_vhd(&args.input) {
        bail!(
            "{} is already a VHD image (use --to-raw to export it)",
            args.input.display()
        );
    }

    let output = output_path(&args.input, args.output.as_deref(), args.to_raw);
    if vhdkit_platform::absolute(&output)? == vhdkit_platform::absolute(&args.input)? {
        bail!("Output would overwrite the input: {}", output.display());
    }
    ensure_writable(&output, args.overwrite, quiet)?;
    let existed = output.exists();

    let config = convert_config(&args)?;
    let target = if args.to_raw {
        "raw image"
    } else if args.sparse {
        "sparse VHD"
    } else {
        "fixed VHD"
    };

    println_if!(
        quiet,
        "{} Converting {} to {} {}",
        style("→").cyan(),
        args.input.display(),
        target,
        output.display()
    );

    let pb = create_progress_bar(0, "Converting", quiet)?;
    let mut converter = Converter::with_config(config).on_progress(progress_updater(&pb));

    let done = Arc::new(AtomicBool::new(false));
    let watcher = forward_cancel(
        Arc::clone(&args.cancel_flag),
        converter.cancel_handle(),
        Arc::clone(&done),
    );

    let result = if args.to_raw {
        converter.to_raw(&args.input, &output)
    } else if args.sparse {
        converter.to_vhd_sparse(&args.input, &output)
    } else {
        converter.to_vhd_fixed(&args.input, &output)
    };

    done.store(true, Ordering::SeqCst);
    let _ = watcher.join();
    pb.finish_and_clear();

    let result = match result {
        Ok(result) => result,
        Err(Error::Cancelled) => {
            if !existed {
                remove_partial(&output);
            }
            println_if!(quiet, "{}", style("Conversion cancelled.").yellow());
            bail!("Conversion cancelled by user");
        }
        Err(e) => {
            if !existed {
                remove_partial(&output);
            }
            return Err(e).with_context(|| format!("Failed to convert {}", args.input.display()));
        }
    };

    print_result(&result, &output, quiet);

    if args.verify {
        let (vhd, raw) = if args.to_raw {
            (&args.input, &output)
        } else {
            (&output, &args.input)
        };
        verify(vhd, raw, &args, quiet)?;
    }

    Ok(())
}

/// Default output path: the input with a `.vhd` or `.img` extension
fn output_path(input: &Path, output: Option<&Path>, to_raw: bool) -> PathBuf {
    match output {
        Some(path) => path.to_path_buf(),
        None => input.with_extension(if to_raw { "img" } else { "vhd" }),
    }
}

fn convert_config(args: &ConvertArgs) -> Result<ConvertConfig> {
    let chunk_size = parse_size(&args.chunk_size)?;
    let chunk_size = usize::try_from(chunk_size)
        .with_context(|| format!("Chunk size too large: {}", args.chunk_size))?;

    let mut config = ConvertConfig::new().chunk_size(chunk_size);
    if args.sparse {
        let block_size = parse_size(&args.block_size)?;
        let block_size = u32::try_from(block_size)
            .with_context(|| format!("Block size too large: {}", args.block_size))?;
        config = config.create_options(CreateOptions::new().block_size(block_size));
    }
    Ok(config)
}

fn progress_updater(pb: &ProgressBar) -> impl Fn(&Progress) + Send + Sync + 'static {
    let pb = pb.clone();
    move |progress: &Progress| {
        pb.set_length(progress.total_bytes);
        pb.set_position(progress.bytes_done);
    }
}

fn verify(vhd: &Path, raw: &Path, args: &ConvertArgs, quiet: bool) -> Result<()> {
    println_if!(quiet, "{} Verifying...", style("→").cyan());

    let mut image = Image::open(vhd, true)
        .with_context(|| format!("Failed to reopen {}", vhd.display()))?;
    let pb = create_progress_bar(0, "Verifying", quiet)?;
    let mut verifier = Verifier::new().on_progress(progress_updater(&pb));

    let done = Arc::new(AtomicBool::new(false));
    let watcher = forward_cancel(
        Arc::clone(&args.cancel_flag),
        verifier.cancel_handle(),
        Arc::clone(&done),
    );
    let result = verifier.verify(&mut image, raw);
    done.store(true, Ordering::SeqCst);
    let _ = watcher.join();
    pb.finish_and_clear();
    image.close()?;

    let result = result?.into_result()?;
    println_if!(
        quiet,
        "{} {} verified in {}",
        style("Success:").green().bold(),
        human_size(result.bytes_verified),
        format_duration(result.elapsed.as_secs())
    );
    Ok(())
}

fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!("Could not remove partial output {}: {}", path.display(), e);
    }
}

fn print_result(result: &ConvertResult, output: &Path, quiet: bool) {
    println_if!(
        quiet,
        "{} Wrote {}",
        style("Success:").green().bold(),
        output.display()
    );
    println_if!(quiet, "  Geometry: {}", result.geometry);
    println_if!(quiet, "  Copied: {}", human_size(result.bytes_copied));
    if result.sectors_skipped > 0 {
        println_if!(
            quiet,
            "  Zero sectors skipped: {}",
            result.sectors_skipped
        );
    }
    println_if!(
        quiet,
        "  Time: {} ({})",
        format_duration(result.elapsed.as_secs()),
        result.speed_display()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_default() {
        assert_eq!(
            output_path(Path::new("disk.img"), None, false),
            PathBuf::from("disk.vhd")
        );
        assert_eq!(
            output_path(Path::new("disk.vhd"), None, true),
            PathBuf::from("disk.img")
        );
        assert_eq!(
            output_path(Path::new("disk"), None, false),
            PathBuf::from("disk.vhd")
        );
    }

    #[test]
    fn test_output_path_explicit() {
        assert_eq!(
            output_path(Path::new("a.img"), Some(Path::new("b.vhd")), false),
            PathBuf::from("b.vhd")
        );
    }

    fn args(sparse: bool, chunk: &str, block: &str) -> ConvertArgs {
        ConvertArgs {
            input: PathBuf::from("in.img"),
            output: None,
            sparse,
            to_raw: false,
            verify: false,
            chunk_size: chunk.to_string(),
            block_size: block.to_string(),
            overwrite: false,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            quiet: true,
        }
    }

    #[test]
    fn test_convert_config() {
        assert!(convert_config(&args(true, "4M", "512K")).is_ok());
        assert!(convert_config(&args(false, "bogus", "2M")).is_err());
        assert!(convert_config(&args(true, "1M", "bogus")).is_err());
        // Block size is ignored for fixed targets
        assert!(convert_config(&args(false, "1M", "bogus")).is_ok());
    }
}
