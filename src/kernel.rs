//! Kernel image extraction.
//!
//! Distribution kernel packages install the image next to their modules,
//! under a directory named after the exact kernel release
//! (`usr/lib/modules/6.9.1-arch1-1/vmlinuz`). The release is not known
//! before the packages are unpacked, so the image is located with a wildcard
//! lookup on the finished tree.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::tree::{Tree, WILDCARD};

/// Where a distribution's kernel package puts its files.
pub trait KernelInstallConfig {
    /// Directory holding one subdirectory per kernel release
    /// (e.g. "usr/lib/modules" or "lib/modules").
    fn module_install_path(&self) -> &str;

    /// Kernel image name inside the release directory (e.g. "vmlinuz").
    fn kernel_filename(&self) -> &str;
}

/// Lookup pattern for the kernel image, e.g. `usr/lib/modules/*/vmlinuz`.
pub fn kernel_pattern(layout: &dyn KernelInstallConfig) -> String {
    format!(
        "{}/{}/{}",
        layout.module_install_path().trim_matches('/'),
        WILDCARD,
        layout.kernel_filename()
    )
}

/// Find the kernel image in `tree`.
///
/// Exactly one release directory is expected; a tree without a kernel is an
/// error.
pub fn locate_kernel<'t>(tree: &'t Tree, layout: &dyn KernelInstallConfig) -> Result<&'t [u8]> {
    let pattern = kernel_pattern(layout);
    tree.read(&pattern)
        .with_context(|| format!("Failed to locate kernel image '{}'", pattern))
}

/// Write a located kernel image to `dest`, returning its size.
pub fn write_kernel(image: &[u8], dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    fs::write(dest, image)
        .with_context(|| format!("Failed to write kernel image: {}", dest.display()))?;

    Ok(image.len() as u64)
}
