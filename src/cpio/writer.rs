//! newc serializer for a frozen virtual tree.

use std::io::Write;

use tracing::debug;

use super::{padding, Header, ALIGN, BLOCK_SIZE, TRAILER_NAME};
use crate::error::{Error, Result};
use crate::tree::{Node, Tree};

const ZEROS: [u8; BLOCK_SIZE as usize] = [0; BLOCK_SIZE as usize];

/// Streaming newc writer.
///
/// Tracks the output offset itself, so `W` can be any sink, including one
/// that cannot seek. Inode numbers are assigned sequentially from 1.
pub struct CpioWriter<W: Write> {
    inner: W,
    offset: u64,
    next_ino: u64,
}

impl<W: Write> CpioWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            offset: 0,
            next_ino: 1,
        }
    }

    /// Bytes written so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Append the record for one node under its rendered `path`.
    pub fn append(&mut self, path: &str, node: &Node) -> Result<()> {
        let ino = self.next_ino;
        let header = Header {
            ino: field(path, "inode number", ino)?,
            mode: node.mode(),
            nlink: node.kind().nlink(),
            // the format only has room for 32 bit timestamps
            mtime: node.mtime() as u32,
            filesize: field(path, "file size", node.data().len() as u64)?,
            namesize: field(path, "name size", path.len() as u64 + 1)?,
            ..Default::default()
        };
        self.record(&header, path, node.data())?;
        self.next_ino += 1;
        Ok(())
    }

    /// Write the trailer record and block padding, returning the sink.
    pub fn finish(mut self) -> Result<W> {
        self.write_trailer()?;
        Ok(self.inner)
    }

    fn write_trailer(&mut self) -> Result<()> {
        let trailer = Header {
            namesize: TRAILER_NAME.len() as u32 + 1,
            ..Default::default()
        };
        self.record(&trailer, TRAILER_NAME, &[])?;
        self.pad(BLOCK_SIZE)?;
        self.inner.flush()?;
        Ok(())
    }

    fn record(&mut self, header: &Header, name: &str, data: &[u8]) -> Result<()> {
        self.write(&header.encode())?;
        self.write(name.as_bytes())?;
        self.write(&[0])?;
        self.pad(ALIGN)?;
        self.write(data)?;
        self.pad(ALIGN)
    }

    fn pad(&mut self, align: u64) -> Result<()> {
        let len = padding(self.offset, align) as usize;
        self.write(&ZEROS[..len])
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }
}

fn field(path: &str, field: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::FieldOverflow {
        path: path.to_string(),
        field,
        value,
    })
}

/// Serialize `tree` into `out` as a complete newc archive.
///
/// Records follow [`Tree::walk`] order. Returns the number of bytes written.
pub fn write_tree<W: Write>(tree: &Tree, out: W) -> Result<u64> {
    let mut writer = CpioWriter::new(out);
    tree.walk(|path, node| writer.append(path, node))?;
    let records = writer.next_ino - 1;
    writer.write_trailer()?;
    debug!(records, bytes = writer.offset, "serialized cpio archive");
    Ok(writer.offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpio::read_archive;
    use crate::tree::TreeBuilder;

    fn serialize(builder: TreeBuilder) -> Vec<u8> {
        let mut out = Vec::new();
        let written = write_tree(&builder.freeze(), &mut out).unwrap();
        assert_eq!(written, out.len() as u64);
        out
    }

    fn hex_at(bytes: &[u8], record: usize, field: usize) -> u32 {
        let start = record + 6 + field * 8;
        let text = std::str::from_utf8(&bytes[start..start + 8]).unwrap();
        u32::from_str_radix(text, 16).unwrap()
    }

    #[test]
    fn root_only_archive() {
        let out = serialize(TreeBuilder::new());
        assert_eq!(out.len(), 512);

        // root record: header + ".\0" is 112 bytes, already aligned
        assert_eq!(&out[..6], b"070701");
        assert_eq!(hex_at(&out, 0, 0), 1);
        assert_eq!(hex_at(&out, 0, 1), 0o040777);
        assert_eq!(hex_at(&out, 0, 4), 2);
        assert_eq!(hex_at(&out, 0, 11), 2);
        assert_eq!(&out[110..112], b".\0");

        let trailer = 112;
        assert_eq!(&out[trailer..trailer + 6], b"070701");
        for field in 0..13 {
            let expected = if field == 11 { 11 } else { 0 };
            assert_eq!(hex_at(&out, trailer, field), expected, "trailer field {field}");
        }
        assert_eq!(&out[trailer + 110..trailer + 121], b"TRAILER!!!\0");
        assert!(out[trailer + 121..].iter().all(|&b| b == 0));
    }

    #[test]
    fn record_order_and_bumped_mtimes() {
        let mut builder = TreeBuilder::new();
        builder.add_dir("usr", 0o755, 1000).unwrap();
        builder
            .add_file("usr/bin/sh", b"#!/bin/sh\n".to_vec(), 0o755, 2000)
            .unwrap();
        let out = serialize(builder);

        let entries = read_archive(out.as_slice()).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec![".", "usr", "usr/bin", "usr/bin/sh"]);

        let inodes: Vec<_> = entries.iter().map(|e| e.header.ino).collect();
        assert_eq!(inodes, vec![1, 2, 3, 4]);

        assert_eq!(entries[1].header.mtime, 2000);
        assert_eq!(entries[1].header.mode, 0o040755);
        assert_eq!(entries[2].header.mtime, 2000);
        assert_eq!(entries[2].header.mode, 0o040777);
        assert_eq!(entries[3].header.nlink, 1);
        assert_eq!(entries[3].data, b"#!/bin/sh\n");
    }

    #[test]
    fn payload_and_names_are_aligned_from_stream_start() {
        let mut builder = TreeBuilder::new();
        builder.add_file("a", b"12345".to_vec(), 0o644, 7).unwrap();
        builder.add_symlink("bb", "a", 0o777, 7).unwrap();
        let out = serialize(builder);

        // root: 110 + 2 = 112
        let a = 112;
        assert_eq!(&out[a + 110..a + 112], b"a\0");
        // name ends at 224, payload starts there and is padded 5 -> 8
        assert_eq!(&out[a + 112..a + 117], b"12345");
        assert_eq!(&out[a + 117..a + 120], &[0, 0, 0]);

        let bb = a + 120;
        assert_eq!(&out[bb..bb + 6], b"070701");
        assert_eq!(hex_at(&out, bb, 1), 0o120777);
        // "bb\0" ends at offset bb + 113, padded to bb + 116
        assert_eq!(&out[bb + 110..bb + 116], b"bb\0\0\0\0");
        assert_eq!(&out[bb + 116..bb + 117], b"a");
        assert_eq!(out.len() % 512, 0);
    }

    #[test]
    fn writer_streams_records_by_hand() {
        let mut builder = TreeBuilder::new();
        builder.add_file("etc/hostname", b"vm\n".to_vec(), 0o644, 9).unwrap();
        let tree = builder.freeze();
        let hostname = tree.lookup("etc/hostname").unwrap();

        let mut writer = CpioWriter::new(Vec::new());
        writer.append("etc/hostname", hostname).unwrap();
        assert_eq!(writer.offset(), 128);
        let out = writer.finish().unwrap();

        let entries = read_archive(out.as_slice()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].header.ino, 1);
        assert_eq!(entries[0].path, "etc/hostname");
        assert_eq!(entries[0].data, b"vm\n");
        assert_eq!(out.len(), 512);
    }

    #[test]
    fn mtime_is_truncated_to_32_bits() {
        let mut builder = TreeBuilder::new();
        builder.add_file("f", Vec::new(), 0o644, 0x1_0000_0005).unwrap();
        let out = serialize(builder);
        let entries = read_archive(out.as_slice()).unwrap();
        assert_eq!(entries[1].header.mtime, 5);
    }

    #[test]
    fn append_rejects_inode_past_32_bits() {
        let tree = TreeBuilder::new().freeze();
        let mut writer = CpioWriter::new(Vec::new());
        writer.next_ino = u32::MAX as u64 + 1;

        let err = writer.append(".", tree.root()).unwrap_err();
        assert!(matches!(
            err,
            Error::FieldOverflow { field: "inode number", ref path, .. } if path == "."
        ));
        // nothing is emitted for a rejected record
        assert_eq!(writer.offset(), 0);
        assert_eq!(writer.next_ino, u32::MAX as u64 + 1);
    }

    #[test]
    fn oversized_field_is_rejected() {
        let err = field("big", "file size", u32::MAX as u64 + 1).unwrap_err();
        assert!(matches!(
            err,
            Error::FieldOverflow { field: "file size", value, .. } if value == 0x1_0000_0000
        ));
        assert_eq!(field("ok", "file size", u32::MAX as u64).unwrap(), u32::MAX);
    }
}
