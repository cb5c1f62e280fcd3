//! Portable ASCII ("newc") cpio archives.
//!
//! The Linux initramfs unpacker only accepts this variant, so the layout here
//! is the compatibility contract with the bootloader:
//!
//! ```text
//! "070701" | 13 x 8 uppercase hex digits | name NUL | pad to 4 | data | pad to 4
//! ```
//!
//! Alignment is measured from the start of the archive. The last record is
//! the `TRAILER!!!` entry, and the whole stream is padded to 512 bytes.
//!
//! - [`writer`] - serializes a frozen [`Tree`](crate::tree::Tree)
//! - [`reader`] - decodes an archive back into entries

pub mod reader;
pub mod writer;

pub use reader::{read_archive, CpioEntry, CpioReader};
pub use writer::{write_tree, CpioWriter};

/// Magic of the newc format without checksums.
pub const MAGIC: &[u8; 6] = b"070701";

/// Magic of the newc format with checksums. Accepted when reading only.
pub const MAGIC_CRC: &[u8; 6] = b"070702";

/// Name of the record that terminates an archive.
pub const TRAILER_NAME: &str = "TRAILER!!!";

/// Size of a record header: magic plus thirteen 8 digit fields.
pub const HEADER_LEN: usize = 6 + 13 * 8;

/// Records are aligned to this many bytes.
pub const ALIGN: u64 = 4;

/// The finished archive is padded to a multiple of this.
pub const BLOCK_SIZE: u64 = 512;

/// Numeric fields of a newc record header, in on-disk order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub ino: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u32,
    pub filesize: u32,
    pub devmajor: u32,
    pub devminor: u32,
    pub rdevmajor: u32,
    pub rdevminor: u32,
    pub namesize: u32,
    pub check: u32,
}

impl Header {
    fn fields(&self) -> [u32; 13] {
        [
            self.ino,
            self.mode,
            self.uid,
            self.gid,
            self.nlink,
            self.mtime,
            self.filesize,
            self.devmajor,
            self.devminor,
            self.rdevmajor,
            self.rdevminor,
            self.namesize,
            self.check,
        ]
    }

    fn from_fields(f: [u32; 13]) -> Self {
        Self {
            ino: f[0],
            mode: f[1],
            uid: f[2],
            gid: f[3],
            nlink: f[4],
            mtime: f[5],
            filesize: f[6],
            devmajor: f[7],
            devminor: f[8],
            rdevmajor: f[9],
            rdevminor: f[10],
            namesize: f[11],
            check: f[12],
        }
    }

    /// Render the full header, magic included.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..6].copy_from_slice(MAGIC);
        for (i, value) in self.fields().iter().enumerate() {
            let start = 6 + i * 8;
            out[start..start + 8].copy_from_slice(format!("{value:08X}").as_bytes());
        }
        out
    }
}

/// Number of NUL bytes needed to bring `offset` up to a multiple of `align`.
pub(crate) fn padding(offset: u64, align: u64) -> u64 {
    (align - offset % align) % align
}
