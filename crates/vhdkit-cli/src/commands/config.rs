//! Configuration file management command

use anyhow::{Context, Result};
use clap::Subcommand;
use console::style;
use std::path::PathBuf;
use vhdkit_core::Settings;

/// Config subcommands
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Print the path of the configuration file
    Path,
    /// Write a configuration file with default values
    Init,
}

impl Default for ConfigAction {
    fn default() -> Self {
        ConfigAction::Show { json: false }
    }
}

/// Execute the config command
pub fn execute(action: ConfigAction, config_path: Option<PathBuf>, quiet: bool) -> Result<()> {
    match action {
        ConfigAction::Path => {
            if let Some(path) = &config_path {
                println_if!(quiet, "{}", path.display());
            } else if !quiet {
                eprintln!("{}", style("Could not determine config path").yellow());
            }
            Ok(())
        }
        ConfigAction::Init => init_config(config_path, quiet),
        ConfigAction::Show { json } => show_config(config_path, json, quiet),
    }
}

/// Initialize a new configuration file with default values
fn init_config(config_path: Option<PathBuf>, quiet: bool) -> Result<()> {
    let path = config_path.context("Could not determine configuration directory")?;

    if path.exists() {
        if !quiet {
            eprintln!(
                "{} Configuration file already exists at: {}",
                style("Warning:").yellow(),
                path.display()
            );
            eprintln!("Use a text editor to modify it, or delete it to re-initialize.");
        }
        return Ok(());
    }

    let saved_path = Settings::default()
        .save_to_path(Some(path))
        .context("Failed to save configuration file")?;

    println_if!(
        quiet,
        "{} Created configuration file at: {}",
        style("Success:").green(),
        saved_path.display()
    );
    println_if!(quiet);
    println_if!(quiet, "Default settings:");
    println_if!(quiet);
    for line in Settings::default_config_string().lines() {
        println_if!(quiet, "  {}", line);
    }

    Ok(())
}

/// Show the current configuration
fn show_config(config_path: Option<PathBuf>, json: bool, quiet: bool) -> Result<()> {
    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let settings = Settings::load_from_path(config_path.clone());

    if json {
        let json_output = serde_json::to_string_pretty(&settings)
            .context("Failed to serialize settings to JSON")?;
        println!("{}", json_output);
        return Ok(());
    }

    if quiet {
        return Ok(());
    }

    println!("{}", style("vhdkit Configuration").bold());
    println!();

    if let Some(path) = &config_path {
        if config_exists {
            println!("  {} {}", style("Config file:").dim(), path.display());
        } else {
            println!(
                "  {} {} {}",
                style("Config file:").dim(),
                path.display(),
                style("(not found, using defaults)").yellow()
            );
        }
    }
    println!();

    println!("{}", style("[create]").cyan());
    println!("  image_type = \"{}\"", settings.create.image_type);
    println!("  block_size = \"{}\"", settings.create.block_size);
    println!();

    println!("{}", style("[convert]").cyan());
    println!("  chunk_size = \"{}\"", settings.convert.chunk_size);
    println!("  verify = {}", settings.convert.verify);
    println!();

    println!("{}", style("[behavior]").cyan());
    println!("  quiet = {}", settings.behavior.quiet);
    println!("  overwrite = {}", settings.behavior.overwrite);

    if !config_exists {
        println!();
        println!(
            "{}",
            style("Run 'vhdkit config init' to create a configuration file.").dim()
        );
    }

    Ok(())
}
