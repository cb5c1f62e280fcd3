//! newc decoder.
//!
//! Used by the `list` and `extract` commands and to check serialized output.

use std::io::{self, Read};

use super::{padding, Header, ALIGN, HEADER_LEN, MAGIC, MAGIC_CRC, TRAILER_NAME};
use crate::error::{Error, Result};

/// Longest name accepted, NUL included (Linux `PATH_MAX`).
const MAX_NAME_LEN: u32 = 4096;

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpioEntry {
    pub header: Header,
    pub path: String,
    pub data: Vec<u8>,
}

/// Iterator over the records of a newc stream, stopping at the trailer.
pub struct CpioReader<R: Read> {
    inner: R,
    offset: u64,
    done: bool,
}

impl<R: Read> CpioReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            done: false,
        }
    }

    fn next_entry(&mut self) -> Result<Option<CpioEntry>> {
        let start = self.offset;
        let mut raw = [0u8; HEADER_LEN];
        self.read_exact(&mut raw)?;
        if &raw[..6] != MAGIC && &raw[..6] != MAGIC_CRC {
            return Err(self.malformed(start, "bad magic"));
        }

        let mut fields = [0u32; 13];
        for (i, value) in fields.iter_mut().enumerate() {
            let digits = &raw[6 + i * 8..6 + (i + 1) * 8];
            *value = std::str::from_utf8(digits)
                .ok()
                .and_then(|text| u32::from_str_radix(text, 16).ok())
                .ok_or_else(|| self.malformed(start, "non-hex header field"))?;
        }
        let header = Header::from_fields(fields);

        if header.namesize == 0 {
            return Err(self.malformed(start, "empty name"));
        }
        if header.namesize > MAX_NAME_LEN {
            return Err(self.malformed(start, "name too long"));
        }
        let mut name = vec![0u8; header.namesize as usize];
        self.read_exact(&mut name)?;
        if name.pop() != Some(0) {
            return Err(self.malformed(start, "name is not NUL terminated"));
        }
        let path = String::from_utf8(name)
            .map_err(|_| self.malformed(start, "name is not valid UTF-8"))?;
        self.skip_padding()?;

        if path == TRAILER_NAME {
            return Ok(None);
        }

        let data = self.read_payload(header.filesize)?;
        self.skip_padding()?;

        Ok(Some(CpioEntry { header, path, data }))
    }

    fn skip_padding(&mut self) -> Result<()> {
        let mut pad = [0u8; ALIGN as usize];
        let len = padding(self.offset, ALIGN) as usize;
        self.read_exact(&mut pad[..len])
    }

    /// Read `len` bytes, growing the buffer only as data actually arrives.
    fn read_payload(&mut self, len: u32) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let read = (&mut self.inner).take(u64::from(len)).read_to_end(&mut data)?;
        self.offset += read as u64;
        if read < len as usize {
            return Err(self.malformed(self.offset, "unexpected end of archive"));
        }
        Ok(data)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(self.malformed(self.offset, "unexpected end of archive"))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn malformed(&self, offset: u64, message: &str) -> Error {
        Error::MalformedArchive {
            offset,
            message: message.to_string(),
        }
    }
}

impl<R: Read> Iterator for CpioReader<R> {
    type Item = Result<CpioEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode every record before the trailer.
pub fn read_archive<R: Read>(reader: R) -> Result<Vec<CpioEntry>> {
    CpioReader::new(reader).collect()
}
