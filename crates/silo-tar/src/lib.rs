//! # silo-tar
//!
//! Read-only access to the members of a tar archive without unpacking it.
//!
//! Packages are stored as tar files that can run to many gigabytes. Opening
//! an archive walks the header chain once, validating every header, and
//! records where each member's bytes begin. Members are then read through
//! [`TarMember`], a bounded `Read + Seek` view over the archive.
//!
//! Supported: POSIX ustar headers (including the name prefix field), GNU
//! `'L'` long names and GNU base-256 numeric fields, so members over 8 GiB
//! are addressable. Sparse files, PAX extended headers and long link names
//! are skipped as unsupported entries.

mod header;
mod reader;

pub use header::{header_checksum, EntryType, TarHeader, BLOCK_SIZE};
pub use reader::{TarEntry, TarMember, TarReader};

use std::io;

use thiserror::Error;

/// Errors raised while parsing an archive
#[derive(Error, Debug)]
pub enum TarError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("header at offset {offset} has no ustar magic")]
    BadMagic { offset: u64 },

    #[error("header checksum mismatch at offset {offset}: recorded {expected}, computed {actual}")]
    ChecksumMismatch {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("invalid {field} field in header at offset {offset}")]
    BadNumber { offset: u64, field: &'static str },

    #[error("archive truncated at offset {offset}: {reason}")]
    Truncated { offset: u64, reason: &'static str },

    #[error("archive corrupted at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, TarError>;
