//! Compression wrappers for package archives.

use std::io::{self, BufRead, Read};
use std::path::Path;

/// Stream codec wrapped around a tar archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Plain tar.
    None,
    /// Zstandard, used by Arch Linux packages (`.pkg.tar.zst`).
    Zstd,
    /// xz / LZMA2 (`.tar.xz`).
    Xz,
    /// gzip (`.tar.gz`).
    Gzip,
}

impl Compression {
    /// Pick a codec from a file name. Unknown extensions are read as plain tar.
    pub fn from_hint(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".zst") || name.ends_with(".zstd") {
            Compression::Zstd
        } else if name.ends_with(".xz") || name.ends_with(".txz") {
            Compression::Xz
        } else if name.ends_with(".gz") || name.ends_with(".tgz") {
            Compression::Gzip
        } else {
            Compression::None
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.file_name()
            .map(|name| Self::from_hint(&name.to_string_lossy()))
            .unwrap_or(Compression::None)
    }

    /// Wrap `reader` in the matching streaming decoder.
    pub fn decoder<'a, R: BufRead + 'a>(self, reader: R) -> io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => Box::new(reader),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::with_buffer(reader)?),
            Compression::Xz => Box::new(xz2::bufread::XzDecoder::new_multi_decoder(reader)),
            Compression::Gzip => Box::new(flate2::bufread::MultiGzDecoder::new(reader)),
        })
    }
}
