//! Build manifest.
//!
//! A build is described by a TOML file listing the packages to merge (in
//! order), the init program, and where outputs go:
//!
//! ```toml
//! package_dir = "tmp/pkg"
//! output_dir = "tmp"
//!
//! [init]
//! path = "init.sh"
//!
//! [[package]]
//! file = "filesystem.pkg.tar.zst"
//! exclude = [".PKGINFO", ".MTREE", ".BUILDINFO"]
//!
//! [[package]]
//! file = "linux.pkg.tar.zst"
//! ```
//!
//! Relative paths are resolved against the manifest's directory, and
//! package files against `package_dir`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::kernel::KernelInstallConfig;

pub const DEFAULT_PACKAGE_DIR: &str = "pkg";
pub const DEFAULT_OUTPUT_DIR: &str = "out";
pub const DEFAULT_INITRD_NAME: &str = "initrd";
pub const DEFAULT_KERNEL_NAME: &str = "vmlinuz";
pub const DEFAULT_MODULES_ROOT: &str = "usr/lib/modules";

/// Archive path of the init program.
pub const INIT_PATH: &str = "init";
pub const DEFAULT_INIT_MODE: u32 = 0o777;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestToml {
    package_dir: Option<String>,
    output_dir: Option<String>,
    initrd_name: Option<String>,
    kernel_name: Option<String>,
    modules_root: Option<String>,
    init: InitToml,
    #[serde(rename = "package", default)]
    packages: Vec<PackageToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InitToml {
    path: Option<String>,
    contents: Option<String>,
    mode: Option<u32>,
    mtime: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageToml {
    file: String,
    #[serde(default)]
    exclude: Vec<String>,
}

/// Where the init program comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitSource {
    /// Read from a host file.
    File(PathBuf),
    /// Given inline in the manifest.
    Inline(String),
}

#[derive(Debug, Clone)]
pub struct InitSpec {
    pub source: InitSource,
    pub mode: u32,
    pub mtime: u64,
}

impl InitSpec {
    /// Bytes of the init program.
    pub fn load(&self) -> Result<Vec<u8>> {
        match &self.source {
            InitSource::Inline(text) => Ok(text.as_bytes().to_vec()),
            InitSource::File(path) => fs::read(path)
                .with_context(|| format!("Failed to read init program: {}", path.display())),
        }
    }
}

/// One package archive to merge.
#[derive(Debug, Clone)]
pub struct PackageSpec {
    pub path: PathBuf,
    /// Normalized archive paths to leave out.
    pub exclude: Vec<String>,
}

impl PackageSpec {
    pub fn excludes(&self, normalized_path: &str) -> bool {
        self.exclude.iter().any(|excluded| excluded == normalized_path)
    }
}

/// A fully resolved build manifest.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub package_dir: PathBuf,
    pub output_dir: PathBuf,
    pub initrd_name: String,
    pub kernel_name: String,
    pub modules_root: String,
    pub init: InitSpec,
    pub packages: Vec<PackageSpec>,
}

impl BuildConfig {
    pub fn initrd_path(&self) -> PathBuf {
        self.output_dir.join(&self.initrd_name)
    }

    pub fn kernel_path(&self) -> PathBuf {
        self.output_dir.join(&self.kernel_name)
    }
}

impl KernelInstallConfig for BuildConfig {
    fn module_install_path(&self) -> &str {
        &self.modules_root
    }

    fn kernel_filename(&self) -> &str {
        &self.kernel_name
    }
}

/// Load a manifest from disk.
pub fn load_build_config(manifest: &Path) -> Result<BuildConfig> {
    let text = fs::read_to_string(manifest)
        .with_context(|| format!("reading build manifest '{}'", manifest.display()))?;
    let base_dir = manifest.parent().unwrap_or_else(|| Path::new("."));
    parse_build_config(&text, base_dir)
        .with_context(|| format!("parsing build manifest '{}'", manifest.display()))
}

/// Parse manifest text, resolving relative paths against `base_dir`.
pub fn parse_build_config(text: &str, base_dir: &Path) -> Result<BuildConfig> {
    let parsed: ManifestToml = toml::from_str(text)?;

    let package_dir = resolve(
        base_dir,
        parsed.package_dir.as_deref().unwrap_or(DEFAULT_PACKAGE_DIR),
    );
    let output_dir = resolve(
        base_dir,
        parsed.output_dir.as_deref().unwrap_or(DEFAULT_OUTPUT_DIR),
    );
    let initrd_name = file_name_field("initrd_name", parsed.initrd_name, DEFAULT_INITRD_NAME)?;
    let kernel_name = file_name_field("kernel_name", parsed.kernel_name, DEFAULT_KERNEL_NAME)?;
    if initrd_name == kernel_name {
        bail!("initrd_name and kernel_name must differ (both are '{}')", initrd_name);
    }

    let modules_root = parsed
        .modules_root
        .unwrap_or_else(|| DEFAULT_MODULES_ROOT.to_string())
        .trim_matches('/')
        .to_string();
    if modules_root.is_empty() {
        bail!("modules_root must not be empty");
    }

    let source = match (parsed.init.path, parsed.init.contents) {
        (Some(path), None) => InitSource::File(resolve(base_dir, &path)),
        (None, Some(contents)) => InitSource::Inline(contents),
        (Some(_), Some(_)) => bail!("[init] takes either 'path' or 'contents', not both"),
        (None, None) => bail!("[init] needs a 'path' or 'contents'"),
    };
    let init = InitSpec {
        source,
        mode: parsed.init.mode.unwrap_or(DEFAULT_INIT_MODE),
        mtime: parsed.init.mtime.unwrap_or(0),
    };

    if parsed.packages.is_empty() {
        bail!("manifest lists no [[package]] entries");
    }
    let packages = parsed
        .packages
        .into_iter()
        .map(|pkg| PackageSpec {
            path: resolve(&package_dir, &pkg.file),
            exclude: pkg
                .exclude
                .into_iter()
                .map(|path| path.trim_start_matches("./").trim_matches('/').to_string())
                .collect(),
        })
        .collect();

    Ok(BuildConfig {
        package_dir,
        output_dir,
        initrd_name,
        kernel_name,
        modules_root,
        init,
        packages,
    })
}

fn resolve(base_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn file_name_field(field: &str, value: Option<String>, default: &str) -> Result<String> {
    let value = value.unwrap_or_else(|| default.to_string());
    if value.is_empty() || value.contains('/') || value == "." || value == ".." {
        bail!("{} must be a plain file name, got '{}'", field, value);
    }
    Ok(value)
}
