//! Initramfs build pipeline.
//!
//! Merges every package of a [`BuildConfig`] into one tree, adds `/init`,
//! writes the cpio archive and copies the kernel image out next to it.
//!
//! ```text
//! packages ──▶ TreeBuilder ──freeze──▶ Tree ──▶ cpio writer ──▶ initrd
//!                   ▲                    │
//!                 init                   └──▶ wildcard read ──▶ vmlinuz
//! ```
//!
//! The build is all or nothing. The kernel is located before anything is
//! written, the archive goes to a temporary file that is only renamed into
//! place once complete, and a failed kernel write removes the archive again.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::archive::{LoadStats, PackageReader};
use crate::config::{BuildConfig, INIT_PATH};
use crate::cpio::write_tree;
use crate::kernel::{locate_kernel, write_kernel};
use crate::preflight::check_build_inputs;
use crate::tree::{Tree, TreeBuilder};

/// Summary of a finished build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub packages: usize,
    /// Nodes in the tree, root included.
    pub entries: usize,
    /// Tar entries dropped because the tree cannot represent them.
    pub skipped: usize,
    pub initrd_path: PathBuf,
    pub initrd_size: u64,
    pub initrd_sha256: String,
    pub kernel_path: PathBuf,
    pub kernel_size: u64,
}

/// Run a complete build.
pub fn build(config: &BuildConfig) -> Result<BuildReport> {
    check_build_inputs(config)?;

    let (tree, totals) = assemble_tree(config)?;

    let image = locate_kernel(&tree, config)?;

    info!("Creating ramdisk...");
    let initrd_path = config.initrd_path();
    let (initrd_size, initrd_sha256) = write_initrd(&tree, &initrd_path)?;
    info!(path = %initrd_path.display(), bytes = initrd_size, sha256 = %initrd_sha256, "ramdisk written");

    info!("Extracting kernel...");
    let kernel_path = config.kernel_path();
    let kernel_size = match write_kernel(image, &kernel_path) {
        Ok(size) => size,
        Err(e) => {
            let _ = fs::remove_file(&initrd_path);
            return Err(e);
        }
    };
    info!(path = %kernel_path.display(), bytes = kernel_size, "kernel written");

    Ok(BuildReport {
        packages: config.packages.len(),
        entries: tree.len(),
        skipped: totals.skipped,
        initrd_path,
        initrd_size,
        initrd_sha256,
        kernel_path,
        kernel_size,
    })
}

/// Merge all packages and the init program into a frozen tree.
pub fn assemble_tree(config: &BuildConfig) -> Result<(Tree, LoadStats)> {
    info!("Installing packages...");
    let mut builder = TreeBuilder::new();
    let mut totals = LoadStats::default();

    for pkg in &config.packages {
        let mut reader = PackageReader::open(&pkg.path)
            .with_context(|| format!("Failed to open package: {}", pkg.path.display()))?;
        let stats = reader
            .load_into(&mut builder, |entry| !pkg.excludes(entry.normalized_path()))
            .with_context(|| format!("Failed to install package: {}", pkg.path.display()))?;
        info!(package = reader.name(), entries = stats.inserted, "installed");

        totals.inserted += stats.inserted;
        totals.filtered += stats.filtered;
        totals.skipped += stats.skipped;
    }

    let init = config.init.load()?;
    builder
        .add_file(INIT_PATH, init, config.init.mode, config.init.mtime)
        .context("Failed to add init program")?;

    Ok((builder.freeze(), totals))
}

/// Serialize `tree` to `dest` atomically, returning its size and sha256.
pub fn write_initrd(tree: &Tree, dest: &Path) -> Result<(u64, String)> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let file_name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "initrd".to_string());
    let tmp = dir.join(format!(".{file_name}.tmp"));

    // tmp shares the destination directory, so the rename never crosses filesystems
    let result = write_archive_file(tree, &tmp).and_then(|written| {
        fs::rename(&tmp, dest)
            .with_context(|| format!("Failed to move {} into place", dest.display()))?;
        Ok(written)
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_archive_file(tree: &Tree, path: &Path) -> Result<(u64, String)> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = HashingWriter::new(BufWriter::new(file));

    let size = write_tree(tree, &mut out)
        .with_context(|| format!("Failed to write cpio archive: {}", path.display()))?;

    let (inner, digest) = out.finish();
    let file = inner
        .into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {}", path.display()))?;

    Ok((size, digest))
}

/// Writer that hashes everything passing through it.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> (W, String) {
        let digest = self.hasher.finalize();
        let hex = digest.iter().map(|b| format!("{b:02x}")).collect();
        (self.inner, hex)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpio::read_archive;
    use tempfile::TempDir;

    #[test]
    fn write_initrd_is_atomic_and_hashed() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("out/initrd");

        let mut builder = TreeBuilder::new();
        builder.add_file("init", b"#!/bin/sh\n".to_vec(), 0o777, 0).unwrap();
        let tree = builder.freeze();

        let (size, sha) = write_initrd(&tree, &dest).unwrap();
        let bytes = fs::read(&dest).unwrap();
        assert_eq!(size, bytes.len() as u64);
        assert_eq!(size % 512, 0);

        let expected: String = Sha256::digest(&bytes)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        assert_eq!(sha, expected);
        assert!(!temp.path().join("out/.initrd.tmp").exists());

        let entries = read_archive(bytes.as_slice()).unwrap();
        assert_eq!(entries[1].path, "init");
    }

    #[test]
    fn failed_archive_write_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        // a directory in the way makes the final rename fail
        let dest = temp.path().join("initrd");
        fs::create_dir_all(dest.join("busy")).unwrap();

        let tree = TreeBuilder::new().freeze();
        assert!(write_initrd(&tree, &dest).is_err());
        assert!(!temp.path().join(".initrd.tmp").exists());
        assert!(dest.join("busy").is_dir());
    }
}
