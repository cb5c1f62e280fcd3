//! Package archive reader.
//!
//! Decodes a (possibly compressed) tar stream into [`PackageEntry`] values
//! and merges them into a [`TreeBuilder`]. Only directories, regular files
//! and symlinks make it into the tree. Device nodes, hard links, fifos and
//! any other entry type come back as [`EntryKind::Unsupported`] and are
//! skipped with a warning.
//!
//! # Example
//!
//! ```rust,ignore
//! use initrd_builder::archive::PackageReader;
//! use initrd_builder::tree::TreeBuilder;
//! use std::path::Path;
//!
//! let mut builder = TreeBuilder::new();
//! let mut reader = PackageReader::open(Path::new("pkg/busybox.pkg.tar.zst"))?;
//! let stats = reader.load_into(&mut builder, |_| true)?;
//! println!("{} entries installed", stats.inserted);
//! ```

pub mod compression;

pub use compression::Compression;

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use tar::EntryType;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::tree::TreeBuilder;

/// What a tar entry turned into, with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File(Vec<u8>),
    /// Symlink with its target text.
    Symlink(String),
    /// Device nodes, hard links, fifos and anything else the tree ignores.
    Unsupported(EntryType),
}

/// One flattened tar entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    /// Path as stored in the archive.
    pub path: String,
    pub kind: EntryKind,
    /// Permission bits only.
    pub mode: u32,
    pub mtime: u64,
}

impl PackageEntry {
    /// Path without leading `./` or `/` and without trailing separators.
    pub fn normalized_path(&self) -> &str {
        let mut path = self.path.as_str();
        loop {
            if let Some(rest) = path.strip_prefix("./") {
                path = rest;
            } else if let Some(rest) = path.strip_prefix('/') {
                path = rest;
            } else {
                break;
            }
        }
        path.trim_end_matches('/')
    }
}

/// Counters for one package merged into a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub inserted: usize,
    pub filtered: usize,
    pub skipped: usize,
}

/// Single-pass reader over one package archive.
pub struct PackageReader<'a> {
    name: String,
    archive: tar::Archive<Box<dyn Read + 'a>>,
}

impl PackageReader<'static> {
    /// Open a package file, choosing the codec from its extension.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::new(&name, BufReader::new(file), Compression::from_path(path))
    }
}

impl<'a> PackageReader<'a> {
    /// Read a tar stream from `reader`; `name` is used in diagnostics.
    pub fn new<R: BufRead + 'a>(name: &str, reader: R, compression: Compression) -> Result<Self> {
        let decoder = compression.decoder(reader)?;
        Ok(Self {
            name: name.to_string(),
            archive: tar::Archive::new(decoder),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lazily decode the archive's entries.
    ///
    /// The underlying stream is consumed as the iterator advances; it can
    /// only be walked once.
    pub fn entries(&mut self) -> Result<Entries<'_, 'a>> {
        Ok(Entries {
            inner: self.archive.entries()?,
        })
    }

    /// Merge every entry accepted by `keep` into `builder`.
    pub fn load_into<F>(&mut self, builder: &mut TreeBuilder, mut keep: F) -> Result<LoadStats>
    where
        F: FnMut(&PackageEntry) -> bool,
    {
        let name = self.name.clone();
        let mut stats = LoadStats::default();

        for entry in self.entries()? {
            let entry = entry?;
            if !keep(&entry) {
                stats.filtered += 1;
                continue;
            }

            let PackageEntry {
                path,
                kind,
                mode,
                mtime,
            } = entry;
            match kind {
                EntryKind::Directory => builder.add_dir(&path, mode, mtime)?,
                EntryKind::File(data) => builder.add_file(&path, data, mode, mtime)?,
                EntryKind::Symlink(target) => builder.add_symlink(&path, &target, mode, mtime)?,
                EntryKind::Unsupported(entry_type) => {
                    warn!(package = %name, path = %path, ?entry_type, "skipping unsupported tar entry");
                    stats.skipped += 1;
                    continue;
                }
            }
            stats.inserted += 1;
        }

        debug!(
            package = %name,
            inserted = stats.inserted,
            filtered = stats.filtered,
            skipped = stats.skipped,
            "loaded package"
        );
        Ok(stats)
    }
}

/// Iterator returned by [`PackageReader::entries`].
pub struct Entries<'r, 'a> {
    inner: tar::Entries<'r, Box<dyn Read + 'a>>,
}

impl Iterator for Entries<'_, '_> {
    type Item = Result<PackageEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.next()?;
        Some(entry.map_err(Into::into).and_then(convert))
    }
}

fn convert<R: Read>(mut entry: tar::Entry<'_, R>) -> Result<PackageEntry> {
    let path = utf8_path(entry.path_bytes().into_owned())?;
    let header = entry.header();
    let entry_type = header.entry_type();
    let mode = header.mode()? & 0o7777;
    let mtime = header.mtime()?;

    let kind = match entry_type {
        EntryType::Directory => EntryKind::Directory,
        // old-style archives mark directories with a trailing slash only
        EntryType::Regular if path.ends_with('/') => EntryKind::Directory,
        EntryType::Regular | EntryType::Continuous => {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            EntryKind::File(data)
        }
        EntryType::Symlink => match entry.link_name_bytes() {
            Some(target) => EntryKind::Symlink(utf8_path(target.into_owned())?),
            None => {
                return Err(Error::MalformedArchive {
                    offset: entry.raw_header_position(),
                    message: format!("symlink '{}' has no target", path),
                })
            }
        },
        other => EntryKind::Unsupported(other),
    };

    Ok(PackageEntry {
        path,
        kind,
        mode,
        mtime,
    })
}

/// Archive paths must be UTF-8 to be stored in the tree unchanged.
fn utf8_path(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| Error::InvalidPath {
        path: String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    enum Fixture<'f> {
        Dir(&'f str),
        File(&'f str, &'f [u8]),
        Symlink(&'f str, &'f str),
        HardLink(&'f str, &'f str),
        Fifo(&'f str),
    }

    fn build_tar(entries: &[Fixture]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for entry in entries {
            let mut header = tar::Header::new_gnu();
            header.set_mtime(1_700_000_000);
            header.set_uid(0);
            header.set_gid(0);
            match entry {
                Fixture::Dir(path) => {
                    header.set_entry_type(EntryType::Directory);
                    header.set_mode(0o755);
                    header.set_size(0);
                    header.set_cksum();
                    builder.append_data(&mut header, path, std::io::empty()).unwrap();
                }
                Fixture::File(path, data) => {
                    header.set_entry_type(EntryType::Regular);
                    header.set_mode(0o100644);
                    header.set_size(data.len() as u64);
                    header.set_cksum();
                    builder.append_data(&mut header, path, *data).unwrap();
                }
                Fixture::Symlink(path, target) | Fixture::HardLink(path, target) => {
                    let kind = if matches!(entry, Fixture::Symlink(..)) {
                        EntryType::Symlink
                    } else {
                        EntryType::Link
                    };
                    header.set_entry_type(kind);
                    header.set_mode(0o777);
                    header.set_size(0);
                    builder.append_link(&mut header, path, target).unwrap();
                }
                Fixture::Fifo(path) => {
                    header.set_entry_type(EntryType::Fifo);
                    header.set_mode(0o644);
                    header.set_size(0);
                    header.set_cksum();
                    builder.append_data(&mut header, path, std::io::empty()).unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    /// Tar with entries whose names are raw bytes.
    fn raw_name_tar(entries: &[(&[u8], EntryType, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, kind, data) in entries {
            let mut header = tar::Header::new_old();
            header.as_old_mut().name[..name.len()].copy_from_slice(name);
            header.set_entry_type(*kind);
            header.set_mode(0o644);
            header.set_size(data.len() as u64);
            header.set_mtime(1_700_000_000);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn zstd_tar(entries: &[Fixture]) -> Vec<u8> {
        zstd::stream::encode_all(build_tar(entries).as_slice(), 3).unwrap()
    }

    #[test]
    fn entries_surface_kind_mode_and_payload() {
        let tar = build_tar(&[
            Fixture::Dir("usr/bin/"),
            Fixture::File("usr/bin/busybox", b"\x7fELF"),
            Fixture::Symlink("usr/bin/sh", "busybox"),
        ]);
        let mut reader = PackageReader::new("busybox", tar.as_slice(), Compression::None).unwrap();
        let entries: Vec<_> = reader.entries().unwrap().map(|e| e.unwrap()).collect();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[0].mode, 0o755);
        assert_eq!(entries[0].mtime, 1_700_000_000);
        assert_eq!(entries[1].kind, EntryKind::File(b"\x7fELF".to_vec()));
        // type bits are stripped from the header mode
        assert_eq!(entries[1].mode, 0o644);
        assert_eq!(entries[2].kind, EntryKind::Symlink("busybox".to_string()));
    }

    #[test]
    fn unsupported_entries_are_skipped() {
        let tar = zstd_tar(&[
            Fixture::File("usr/bin/gzip", b"gzip"),
            Fixture::HardLink("usr/bin/gunzip", "usr/bin/gzip"),
            Fixture::Fifo("run/initctl"),
            Fixture::File("usr/bin/zcat", b"zcat"),
        ]);
        let mut builder = TreeBuilder::new();
        let mut reader = PackageReader::new("gzip", tar.as_slice(), Compression::Zstd).unwrap();
        let stats = reader.load_into(&mut builder, |_| true).unwrap();

        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.skipped, 2);
        let tree = builder.freeze();
        assert!(matches!(
            tree.read("usr/bin/gunzip"),
            Err(Error::LookupMiss { .. })
        ));
        assert!(matches!(tree.read("run/initctl"), Err(Error::LookupMiss { .. })));
        assert_eq!(tree.read("usr/bin/zcat").unwrap(), b"zcat");
    }

    #[test]
    fn non_utf8_names_are_rejected() {
        let tar = raw_name_tar(&[
            (b"f\xff", EntryType::Regular, b"one"),
            (b"f\xfe", EntryType::Regular, b"two"),
        ]);
        let mut builder = TreeBuilder::new();
        let mut reader = PackageReader::new("latin1", tar.as_slice(), Compression::None).unwrap();
        let err = reader.load_into(&mut builder, |_| true).unwrap_err();

        assert!(matches!(err, Error::InvalidPath { .. }));
        assert_eq!(builder.freeze().len(), 1);
    }

    #[test]
    fn symlink_without_target_is_malformed() {
        let tar = raw_name_tar(&[(b"usr/bin/sh", EntryType::Symlink, b"")]);
        let mut reader = PackageReader::new("broken", tar.as_slice(), Compression::None).unwrap();
        let err = reader.entries().unwrap().next().unwrap().unwrap_err();

        assert!(matches!(
            err,
            Error::MalformedArchive { offset: 0, ref message } if message.contains("usr/bin/sh")
        ));
    }

    #[test]
    fn filter_drops_entries() {
        let tar = build_tar(&[
            Fixture::File(".PKGINFO", b"pkgname = zlib\n"),
            Fixture::File("usr/lib/libz.so.1", b"z"),
        ]);
        let mut builder = TreeBuilder::new();
        let mut reader = PackageReader::new("zlib", tar.as_slice(), Compression::None).unwrap();
        let stats = reader
            .load_into(&mut builder, |entry| entry.normalized_path() != ".PKGINFO")
            .unwrap();

        assert_eq!(stats.filtered, 1);
        let tree = builder.freeze();
        assert!(tree.read(".PKGINFO").is_err());
        assert_eq!(tree.read("usr/lib/libz.so.1").unwrap(), b"z");
    }

    #[test]
    fn packages_merge_into_shared_directories() {
        let first = build_tar(&[
            Fixture::Dir("usr/"),
            Fixture::Dir("usr/lib/"),
            Fixture::File("usr/lib/libc.so.6", b"libc"),
        ]);
        let second = build_tar(&[
            Fixture::Dir("usr/"),
            Fixture::Dir("usr/lib/"),
            Fixture::File("usr/lib/libgcc_s.so.1", b"gcc"),
        ]);

        let mut builder = TreeBuilder::new();
        for (name, bytes) in [("glibc", &first), ("gcc-libs", &second)] {
            PackageReader::new(name, bytes.as_slice(), Compression::None)
                .unwrap()
                .load_into(&mut builder, |_| true)
                .unwrap();
        }
        let tree = builder.freeze();
        assert_eq!(tree.read("usr/lib/libc.so.6").unwrap(), b"libc");
        assert_eq!(tree.read("usr/lib/libgcc_s.so.1").unwrap(), b"gcc");
    }

    #[test]
    fn open_selects_codec_from_file_name() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("filesystem.pkg.tar.zst");
        let mut file = File::create(&path).unwrap();
        file.write_all(&zstd_tar(&[Fixture::Dir("etc/")])).unwrap();
        drop(file);

        let mut reader = PackageReader::open(&path).unwrap();
        assert_eq!(reader.name(), "filesystem.pkg.tar.zst");
        let entries: Vec<_> = reader.entries().unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(entries[0].normalized_path(), "etc");
    }

    #[test]
    fn normalized_path_strips_prefixes() {
        let entry = PackageEntry {
            path: "./usr/share/".to_string(),
            kind: EntryKind::Directory,
            mode: 0o755,
            mtime: 0,
        };
        assert_eq!(entry.normalized_path(), "usr/share");
    }
}
