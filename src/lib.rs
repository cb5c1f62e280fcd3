//! Initramfs assembly from Linux distribution packages.
//!
//! This crate turns a list of package archives (Arch Linux `.pkg.tar.zst`,
//! plain or compressed tarballs) plus an init program into a single newc
//! cpio archive that a kernel can unpack as its initial root filesystem,
//! and pulls the kernel image out of the same packages.
//!
//! - **Archive reader** - streams tar entries out of (compressed) packages
//! - **Virtual tree** - merges all packages into one in-memory filesystem
//! - **cpio serializer** - writes the tree as a byte-exact newc archive
//! - **Build pipeline** - manifest, preflight checks, outputs
//!
//! # Architecture
//!
//! ```text
//! initrd-builder (this crate)
//!     │
//!     ├── archive   PackageReader: tar (+ zstd / xz / gzip) -> PackageEntry
//!     ├── tree      TreeBuilder -> Tree: merge-on-insert, wildcard read
//!     ├── cpio      write_tree / read_archive: newc "070701"
//!     ├── kernel    <modules_root>/*/<kernel_name> extraction
//!     └── initrd    config + preflight -> initrd + vmlinuz
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use initrd_builder::config::load_build_config;
//! use std::path::Path;
//!
//! let config = load_build_config(Path::new("initrd.toml"))?;
//! let report = initrd_builder::build(&config)?;
//! println!("{} ({} bytes)", report.initrd_path.display(), report.initrd_size);
//! ```

pub mod archive;
pub mod config;
pub mod cpio;
pub mod error;
pub mod initrd;
pub mod kernel;
pub mod preflight;
pub mod tree;

pub use error::{Error, Result};
pub use initrd::{assemble_tree, build, BuildReport};
pub use kernel::KernelInstallConfig;
pub use tree::{Tree, TreeBuilder};
