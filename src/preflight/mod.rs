//! Preflight checks for build inputs.
//!
//! Validates that every package archive and the init program are present
//! before any package is decoded, so a missing download is reported up front
//! instead of after minutes of decompression.
//!
//! # Example
//!
//! ```rust,ignore
//! use initrd_builder::config::load_build_config;
//! use initrd_builder::preflight::check_build_inputs;
//! use std::path::Path;
//!
//! let config = load_build_config(Path::new("initrd.toml"))?;
//! check_build_inputs(&config)?;
//! ```

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::{BuildConfig, InitSource};

/// Describe what is wrong with an input file, if anything.
fn file_problem(path: &Path) -> Option<String> {
    match path.metadata() {
        Err(_) => Some(format!("  {} (not found)", path.display())),
        Ok(md) if !md.is_file() => Some(format!("  {} (not a regular file)", path.display())),
        Ok(_) => None,
    }
}

/// Check everything a build manifest refers to.
///
/// # Returns
///
/// * `Ok(())` if every package and the init file are regular files
/// * `Err` listing every missing input
pub fn check_build_inputs(config: &BuildConfig) -> Result<()> {
    let mut problems: Vec<String> = config
        .packages
        .iter()
        .filter_map(|pkg| file_problem(&pkg.path))
        .collect();

    if let InitSource::File(path) = &config.init.source {
        if let Some(problem) = file_problem(path) {
            problems.push(format!("{} [init program]", problem));
        }
    }

    if !problems.is_empty() {
        bail!("Missing build inputs:\n{}", problems.join("\n"));
    }

    Ok(())
}
