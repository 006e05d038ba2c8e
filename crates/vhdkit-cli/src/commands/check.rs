//! Check command implementation

use anyhow::{Context, Result};
use console::style;
use serde_json::json;
use std::path::Path;

use vhdkit_core::Image;

/// Execute the check command
///
/// Findings are reported but never fail the command; an image that cannot be
/// opened does.
pub fn execute(path: &Path, json: bool, quiet: bool) -> Result<()> {
    let mut image =
        Image::open(path, true).with_context(|| format!("Failed to open {}", path.display()))?;
    let findings = image.check()?;
    image.close()?;

    if json {
        let report = json!({
            "path": path,
            "clean": findings.is_empty(),
            "findings": findings,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if findings.is_empty() {
        println_if!(
            quiet,
            "{} {} has no inconsistencies",
            style("✓").green().bold(),
            path.display()
        );
        return Ok(());
    }

    println_if!(
        quiet,
        "{} {} finding(s) in {}",
        style("Warning:").yellow().bold(),
        findings.len(),
        path.display()
    );
    for finding in &findings {
        println_if!(quiet, "  - {}", finding);
    }

    Ok(())
}
