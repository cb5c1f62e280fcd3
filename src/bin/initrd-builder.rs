use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context, Result};
use initrd_builder::config::load_build_config;
use initrd_builder::cpio::CpioReader;
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "Usage:\n  initrd-builder build <manifest.toml>\n  initrd-builder list <initrd>\n  initrd-builder extract <initrd> <archive-path> <output>"
}

fn main() -> Result<()> {
    setup_tracing();
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [build, manifest] if build == "build" => build_initrd(Path::new(manifest)),
        [list, initrd] if list == "list" => list_initrd(Path::new(initrd)),
        [extract, initrd, path, output] if extract == "extract" => {
            extract_file(Path::new(initrd), path, Path::new(output))
        }
        _ => bail!(usage()),
    }
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .compact()
        .init();
}

fn build_initrd(manifest: &Path) -> Result<()> {
    let config = load_build_config(manifest)?;
    let report = initrd_builder::build(&config)
        .with_context(|| format!("building initramfs from '{}'", manifest.display()))?;

    println!(
        "{}: {} entries from {} packages, {} bytes, sha256 {}",
        report.initrd_path.display(),
        report.entries,
        report.packages,
        report.initrd_size,
        report.initrd_sha256
    );
    if report.skipped > 0 {
        println!("  {} unsupported tar entries skipped", report.skipped);
    }
    println!(
        "{}: {} bytes",
        report.kernel_path.display(),
        report.kernel_size
    );
    Ok(())
}

fn open_archive(initrd: &Path) -> Result<CpioReader<BufReader<File>>> {
    let file = File::open(initrd)
        .with_context(|| format!("opening cpio archive '{}'", initrd.display()))?;
    Ok(CpioReader::new(BufReader::new(file)))
}

fn list_initrd(initrd: &Path) -> Result<()> {
    for entry in open_archive(initrd)? {
        let entry = entry.with_context(|| format!("reading '{}'", initrd.display()))?;
        println!(
            "{:06o} {:>10} {:>10} {}",
            entry.header.mode, entry.header.filesize, entry.header.mtime, entry.path
        );
    }
    Ok(())
}

fn extract_file(initrd: &Path, wanted: &str, output: &Path) -> Result<()> {
    let wanted = wanted.trim_start_matches("./").trim_matches('/');
    for entry in open_archive(initrd)? {
        let entry = entry.with_context(|| format!("reading '{}'", initrd.display()))?;
        if entry.path == wanted {
            fs::write(output, &entry.data)
                .with_context(|| format!("writing '{}'", output.display()))?;
            println!("{} -> {} ({} bytes)", entry.path, output.display(), entry.data.len());
            return Ok(());
        }
    }
    bail!("'{}' not found in '{}'", wanted, initrd.display())
}
