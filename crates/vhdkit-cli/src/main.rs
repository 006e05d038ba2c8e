//! vhdkit - create, convert and inspect VHD disk images
//!
//! # Usage
//!
//! ```bash
//! # Create a 512 MiB dynamic image
//! vhdkit create disk.vhd --type sparse --size 512
//!
//! # Create a differencing image on top of it
//! vhdkit create snapshot.vhd --parent disk.vhd
//!
//! # Convert a raw image to a dynamic VHD and check the result
//! vhdkit convert disk.img --sparse --verify
//!
//! # Show image details
//! vhdkit info disk.vhd
//! ```

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use clap_mangen::Man;
use console::style;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vhdkit_core::Settings;

/// Conditionally println based on quiet mode
macro_rules! println_if {
    ($quiet:expr) => {
        if !$quiet {
            println!();
        }
    };
    ($quiet:expr, $($arg:tt)*) => {
        if !$quiet {
            println!($($arg)*);
        }
    };
}

mod commands;
mod progress;

/// vhdkit - create, convert and inspect VHD disk images
#[derive(Parser)]
#[command(name = "vhdkit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (overrides the default location)
    #[arg(long, global = true, env = "VHDKIT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new image
    Create {
        /// Path of the new image
        path: PathBuf,

        /// Image type (default: differencing with --parent, otherwise from config)
        #[arg(short = 't', long = "type", value_enum)]
        kind: Option<commands::create::CreateKind>,

        /// Capacity in MiB (fixed and sparse images)
        #[arg(short, long, conflicts_with_all = ["chs", "parent"])]
        size: Option<u32>,

        /// Explicit geometry as C/H/S (fixed and sparse images)
        #[arg(long, value_name = "C/H/S", conflicts_with = "parent")]
        chs: Option<String>,

        /// Parent image (differencing images)
        #[arg(short, long)]
        parent: Option<PathBuf>,

        /// Data block size of sparse and differencing images (e.g., 2M, 512K)
        #[arg(short, long)]
        block_size: Option<String>,

        /// Replace an existing file without asking
        #[arg(short, long)]
        force: bool,
    },

    /// Convert between raw and VHD images
    Convert {
        /// Input image
        input: PathBuf,

        /// Output image (default: input with a .vhd or .img extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Create a sparse (dynamic) VHD instead of a fixed one
        #[arg(short, long, conflicts_with = "to_raw")]
        sparse: bool,

        /// Convert a VHD into a raw image
        #[arg(short = 'r', long)]
        to_raw: bool,

        /// Compare the output with the input after converting
        #[arg(long)]
        verify: bool,

        /// Bytes moved per step (e.g., 1M, 4M)
        #[arg(long)]
        chunk_size: Option<String>,

        /// Replace an existing output file without asking
        #[arg(short, long)]
        force: bool,
    },

    /// Show details of an image
    Info {
        /// Image to inspect
        image: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Check an image for inconsistencies
    Check {
        /// Image to check
        image: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the geometry chosen for a capacity
    Geometry {
        /// Capacity in MiB
        size: u32,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: Option<commands::config::ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Generate man pages
    Mangen {
        /// Output directory for man pages
        #[arg(short, long, default_value = ".")]
        out_dir: String,
    },
}

fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{} {}", style("Error:").red().bold(), panic_info);
    }));

    if let Err(e) = run() {
        eprintln!("{} {}", style("Error:").red().bold(), e);

        for cause in e.chain().skip(1) {
            eprintln!("  {} {}", style("Caused by:").yellow(), cause);
        }

        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(Settings::config_path);
    let settings = Settings::load_from_path(config_path.clone());
    let quiet = cli.quiet || settings.behavior.quiet;

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if quiet {
        EnvFilter::new("off")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Create {
            path,
            kind,
            size,
            chs,
            parent,
            block_size,
            force,
        } => commands::create::execute(commands::create::CreateArgs {
            kind: commands::create::resolve_kind(kind, parent.is_some(), settings.create.image_type),
            path,
            size,
            chs,
            parent,
            block_size: block_size.unwrap_or_else(|| settings.create.block_size.clone()),
            overwrite: force || settings.behavior.overwrite,
            quiet,
        }),
        Commands::Convert {
            input,
            output,
            sparse,
            to_raw,
            verify,
            chunk_size,
            force,
        } => {
            let cancel_flag = install_cancel_handler(quiet)?;
            commands::convert::execute(commands::convert::ConvertArgs {
                input,
                output,
                sparse,
                to_raw,
                verify: verify || settings.convert.verify,
                chunk_size: chunk_size.unwrap_or_else(|| settings.convert.chunk_size.clone()),
                block_size: settings.create.block_size.clone(),
                overwrite: force || settings.behavior.overwrite,
                cancel_flag,
                quiet,
            })
        }
        Commands::Info { image, json } => commands::info::execute(&image, json, quiet),
        Commands::Check { image, json } => commands::check::execute(&image, json, quiet),
        Commands::Geometry { size, json } => commands::geometry::execute(size, json, quiet),
        Commands::Config { action } => commands::config::execute(
            action.unwrap_or_default(),
            config_path,
            quiet,
        ),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
        Commands::Mangen { out_dir } => {
            let cmd = Cli::command();
            let out_path = std::path::Path::new(&out_dir);
            std::fs::create_dir_all(out_path)?;

            let man = Man::new(cmd.clone());
            let mut buffer = Vec::new();
            man.render(&mut buffer)?;
            std::fs::write(out_path.join("vhdkit.1"), buffer)?;
            println_if!(quiet, "Generated: {}/vhdkit.1", out_dir);

            for subcommand in cmd.get_subcommands() {
                let name = subcommand.get_name();
                if subcommand.is_hide_set()
                    || name == "completions"
                    || name == "mangen"
                    || name == "help"
                {
                    continue;
                }

                let man = Man::new(subcommand.clone());
                let mut buffer = Vec::new();
                man.render(&mut buffer)?;
                let filename = format!("vhdkit-{}.1", name);
                std::fs::write(out_path.join(&filename), buffer)?;
                println_if!(quiet, "Generated: {}/{}", out_dir, filename);
            }

            println_if!(
                quiet,
                "\nInstall with: sudo cp {}/*.1 /usr/local/share/man/man1/",
                out_dir
            );
            Ok(())
        }
    }
}

/// Ctrl+C sets the returned flag; a second Ctrl+C exits immediately
fn install_cancel_handler(quiet: bool) -> Result<std::sync::Arc<std::sync::atomic::AtomicBool>> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            if !quiet {
                eprintln!("\n{}", style("Forced exit").red().bold());
            }
            std::process::exit(130);
        }
        if !quiet {
            eprintln!(
                "\n{}",
                style("Cancelling... Press Ctrl+C again to force exit").yellow()
            );
        }
    })?;
    Ok(cancelled)
}
