//! Header-chain walk and member access.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use crate::header::{is_zero_block, EntryType, TarHeader, BLOCK_SIZE};
use crate::{Result, TarError};

/// A regular-file member of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarEntry {
    pub name: String,
    /// Byte offset of the member's first byte in the archive
    pub offset: u64,
    pub size: u64,
    pub mode: u32,
    pub mtime: u64,
}

/// Parsed archive over any seekable byte source
pub struct TarReader<R> {
    inner: R,
    headers: Vec<TarHeader>,
}

impl TarReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> TarReader<R> {
    /// Walk and validate the whole header chain.
    pub fn new(mut inner: R) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        let headers = read_headers(&mut inner, len)?;
        debug!(entries = headers.len(), bytes = len, "parsed tar archive");
        Ok(Self { inner, headers })
    }

    /// Every header in archive order, long-name records folded into the
    /// entry they name.
    pub fn headers(&self) -> &[TarHeader] {
        &self.headers
    }

    /// Regular files only, in archive order.
    pub fn entries(&self) -> Vec<TarEntry> {
        self.headers
            .iter()
            .filter(|h| h.entry_type == EntryType::Regular)
            .map(|h| TarEntry {
                name: h.name.clone(),
                offset: h.data_offset,
                size: h.size,
                mode: h.mode,
                mtime: h.mtime,
            })
            .collect()
    }

    /// Regular file by name. Leading `./` and `/` are ignored on both
    /// sides. A name stored twice resolves to the later copy.
    pub fn find(&self, name: &str) -> Option<TarEntry> {
        let wanted = member_path(name);
        self.entries()
            .into_iter()
            .rev()
            .find(|e| member_path(&e.name) == wanted)
    }

    /// Bounded reader over one member's bytes.
    pub fn member(&mut self, entry: &TarEntry) -> TarMember<'_, R> {
        TarMember {
            inner: &mut self.inner,
            start: entry.offset,
            size: entry.size,
            pos: 0,
        }
    }

    /// Whole member by name. Absence is `Ok(None)`.
    pub fn read_member(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.find(name) else {
            return Ok(None);
        };
        let mut data = Vec::with_capacity(entry.size.min(64 * 1024 * 1024) as usize);
        self.member(&entry).read_to_end(&mut data)?;
        Ok(Some(data))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// A member name without its leading `./` and `/` components.
fn member_path(mut name: &str) -> &str {
    loop {
        if let Some(rest) = name.strip_prefix("./") {
            name = rest;
        } else if let Some(rest) = name.strip_prefix('/') {
            name = rest;
        } else {
            return name;
        }
    }
}

fn read_headers<R: Read + Seek>(inner: &mut R, len: u64) -> Result<Vec<TarHeader>> {
    let block_size = BLOCK_SIZE as u64;
    let mut headers = Vec::new();
    let mut offset = 0u64;
    let mut zero_blocks = 0;
    let mut long_name: Option<String> = None;
    let mut block = [0u8; BLOCK_SIZE];

    loop {
        if offset >= len {
            // One terminating zero block is tolerated; none means the
            // archive was cut short.
            if zero_blocks == 0 {
                return Err(TarError::Truncated {
                    offset,
                    reason: "missing end-of-archive blocks",
                });
            }
            break;
        }
        if offset + block_size > len {
            return Err(TarError::Truncated {
                offset,
                reason: "partial header block",
            });
        }

        inner.seek(SeekFrom::Start(offset))?;
        inner.read_exact(&mut block)?;

        if is_zero_block(&block) {
            zero_blocks += 1;
            offset += block_size;
            if zero_blocks == 2 {
                break;
            }
            continue;
        }
        if zero_blocks > 0 {
            return Err(TarError::Corrupt {
                offset,
                reason: "header after end-of-archive block",
            });
        }

        let mut header = TarHeader::parse(&block, offset)?;
        let end = header
            .data_offset
            .checked_add(header.size)
            .ok_or(TarError::Corrupt {
                offset,
                reason: "member size overflows",
            })?;
        if end > len {
            return Err(TarError::Truncated {
                offset,
                reason: "member extends past end of archive",
            });
        }

        if header.entry_type == EntryType::LongName {
            long_name = Some(read_long_name(inner, &header)?);
        } else {
            if let Some(name) = long_name.take() {
                header.name = name;
            }
            headers.push(header.clone());
        }

        offset = header.data_offset + header.padded_size();
    }

    Ok(headers)
}

/// Payload of a GNU `'L'` record: the name followed by its terminating NUL.
fn read_long_name<R: Read + Seek>(inner: &mut R, header: &TarHeader) -> Result<String> {
    if header.size > 64 * 1024 {
        return Err(TarError::Corrupt {
            offset: header.header_offset,
            reason: "long name record too large",
        });
    }
    let mut buf = vec![0u8; header.size as usize];
    inner.seek(SeekFrom::Start(header.data_offset))?;
    inner.read_exact(&mut buf)?;
    while buf.last() == Some(&0) {
        buf.pop();
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// `Read + Seek` over one member, translating positions into archive
/// offsets. Reads stop at the member's end.
pub struct TarMember<'a, R> {
    inner: &'a mut R,
    start: u64,
    size: u64,
    pos: u64,
}

impl<R> TarMember<'_, R> {
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl<R: Read + Seek> Read for TarMember<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let remaining = self.size - self.pos;
        let want = (buf.len() as u64).min(remaining) as usize;
        self.inner.seek(SeekFrom::Start(self.start + self.pos))?;
        let n = self.inner.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for TarMember<'_, R> {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let target = match from {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::End(delta) => self.size as i128 + delta as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of tar member",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}
