//! Error types for tree construction, archive decoding and serialization.

use thiserror::Error;

/// Errors raised by the core of the initramfs builder.
///
/// Everything here is fatal for a build. Unsupported tar entries are not
/// errors; they are skipped by the archive reader.
#[derive(Error, Debug)]
pub enum Error {
    /// A path segment that must be a directory already exists as something else.
    #[error("path conflict at '{path}': '{segment}' is not a directory")]
    PathConflict { path: String, segment: String },

    /// A `read` found no node for the pattern.
    #[error("no entry matches '{pattern}'")]
    LookupMiss { pattern: String },

    /// The path contains a segment that would escape the archive root.
    #[error("invalid path '{path}': parent directory segments are not allowed")]
    InvalidPath { path: String },

    /// A header value does not fit in an 8 digit hex field.
    #[error("{field} of '{path}' is out of range for a newc header: {value:#x}")]
    FieldOverflow {
        path: String,
        field: &'static str,
        value: u64,
    },

    /// A cpio stream that could not be decoded.
    #[error("malformed cpio archive at offset {offset}: {message}")]
    MalformedArchive { offset: u64, message: String },

    /// Underlying read or write failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for the core modules.
pub type Result<T> = std::result::Result<T, Error>;
