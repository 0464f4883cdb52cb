//! 512-byte tar header blocks.

use crate::{Result, TarError};

/// Size of every tar block
pub const BLOCK_SIZE: usize = 512;

const NAME: std::ops::Range<usize> = 0..100;
const MODE: std::ops::Range<usize> = 100..108;
const UID: std::ops::Range<usize> = 108..116;
const GID: std::ops::Range<usize> = 116..124;
const SIZE: std::ops::Range<usize> = 124..136;
const MTIME: std::ops::Range<usize> = 136..148;
const CHECKSUM: std::ops::Range<usize> = 148..156;
const TYPEFLAG: usize = 156;
const LINKNAME: std::ops::Range<usize> = 157..257;
const MAGIC: std::ops::Range<usize> = 257..262;
const MAGIC_VERSION: std::ops::Range<usize> = 257..265;
const UNAME: std::ops::Range<usize> = 265..297;
const GNAME: std::ops::Range<usize> = 297..329;
const DEVMAJOR: std::ops::Range<usize> = 329..337;
const DEVMINOR: std::ops::Range<usize> = 337..345;
const PREFIX: std::ops::Range<usize> = 345..500;

/// Type flag of a header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Regular,
    HardLink,
    Symlink,
    CharSpecial,
    BlockSpecial,
    Directory,
    Fifo,
    /// GNU long name: the payload is the name of the next entry
    LongName,
    Other(u8),
}

impl EntryType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            b'0' | 0 => EntryType::Regular,
            b'1' => EntryType::HardLink,
            b'2' => EntryType::Symlink,
            b'3' => EntryType::CharSpecial,
            b'4' => EntryType::BlockSpecial,
            b'5' => EntryType::Directory,
            b'6' => EntryType::Fifo,
            b'L' => EntryType::LongName,
            other => EntryType::Other(other),
        }
    }
}

/// A parsed header and where its payload lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarHeader {
    pub name: String,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub size: u64,
    pub mtime: u64,
    pub entry_type: EntryType,
    pub linkname: String,
    pub uname: String,
    pub gname: String,
    pub devmajor: u64,
    pub devminor: u64,
    /// Byte offset of the header block in the archive
    pub header_offset: u64,
    /// Byte offset of the first payload byte
    pub data_offset: u64,
}

impl TarHeader {
    /// Parse and validate one non-zero header block found at `offset`.
    pub fn parse(block: &[u8; BLOCK_SIZE], offset: u64) -> Result<Self> {
        if &block[MAGIC] != b"ustar" {
            return Err(TarError::BadMagic { offset });
        }

        let expected = parse_octal(&block[CHECKSUM], offset, "checksum")?;
        let actual = header_checksum(block);
        if expected != actual {
            return Err(TarError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }

        let mut name = c_string(&block[NAME]);
        // POSIX ustar only; GNU headers keep timestamps in this region.
        if &block[MAGIC_VERSION] == b"ustar\x0000" {
            let prefix = c_string(&block[PREFIX]);
            if !prefix.is_empty() {
                name = format!("{}/{}", prefix, name);
            }
        }

        Ok(Self {
            name,
            mode: u32::try_from(parse_numeric(&block[MODE], offset, "mode")?)
                .map_err(|_| TarError::BadNumber { offset, field: "mode" })?,
            uid: parse_numeric(&block[UID], offset, "uid")?,
            gid: parse_numeric(&block[GID], offset, "gid")?,
            size: parse_numeric(&block[SIZE], offset, "size")?,
            mtime: parse_numeric(&block[MTIME], offset, "mtime")?,
            entry_type: EntryType::from_byte(block[TYPEFLAG]),
            linkname: c_string(&block[LINKNAME]),
            uname: c_string(&block[UNAME]),
            gname: c_string(&block[GNAME]),
            devmajor: parse_numeric(&block[DEVMAJOR], offset, "devmajor")?,
            devminor: parse_numeric(&block[DEVMINOR], offset, "devminor")?,
            header_offset: offset,
            data_offset: offset + BLOCK_SIZE as u64,
        })
    }

    /// Payload length rounded up to whole blocks
    pub fn padded_size(&self) -> u64 {
        self.size.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64
    }
}

/// Sum of all header bytes with the checksum field counted as spaces.
pub fn header_checksum(block: &[u8; BLOCK_SIZE]) -> u64 {
    let head: u64 = block[..CHECKSUM.start].iter().map(|&b| b as u64).sum();
    let tail: u64 = block[CHECKSUM.end..].iter().map(|&b| b as u64).sum();
    head + tail + 8 * b' ' as u64
}

pub fn is_zero_block(block: &[u8; BLOCK_SIZE]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Bytes up to the first NUL, lossily decoded.
fn c_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Octal ASCII, padded with NULs or spaces on either side. Empty is zero.
fn parse_octal(field: &[u8], offset: u64, name: &'static str) -> Result<u64> {
    let trimmed: &[u8] = {
        let start = field
            .iter()
            .position(|&b| b != 0 && b != b' ')
            .unwrap_or(field.len());
        let rest = &field[start..];
        let end = rest
            .iter()
            .position(|&b| b == 0 || b == b' ')
            .unwrap_or(rest.len());
        &rest[..end]
    };

    let mut value = 0u64;
    for &b in trimmed {
        if !(b'0'..=b'7').contains(&b) {
            return Err(TarError::BadNumber { offset, field: name });
        }
        value = value
            .checked_mul(8)
            .and_then(|v| v.checked_add((b - b'0') as u64))
            .ok_or(TarError::BadNumber { offset, field: name })?;
    }
    Ok(value)
}

/// Octal, or GNU base-256 when the high bit of the first byte is set.
fn parse_numeric(field: &[u8], offset: u64, name: &'static str) -> Result<u64> {
    match field.first() {
        Some(&first) if first & 0x80 != 0 => {
            // 0xff marks a negative base-256 value, which no field here allows.
            if first == 0xff {
                return Err(TarError::BadNumber { offset, field: name });
            }
            let mut value = (first & 0x7f) as u64;
            for &b in &field[1..] {
                value = value
                    .checked_mul(256)
                    .and_then(|v| v.checked_add(b as u64))
                    .ok_or(TarError::BadNumber { offset, field: name })?;
            }
            Ok(value)
        }
        _ => parse_octal(field, offset, name),
    }
}
