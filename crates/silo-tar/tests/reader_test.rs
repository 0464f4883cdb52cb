//! Integration tests for silo-tar
//!
//! Archives are assembled block by block so each test controls exactly
//! which header fields and extensions appear.

use std::fs::OpenOptions;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use silo_tar::{header_checksum, EntryType, TarError, TarReader, BLOCK_SIZE};
use tempfile::TempDir;

/// Header block with a freshly computed checksum.
fn header(name: &str, size: u64, typeflag: u8) -> [u8; BLOCK_SIZE] {
    let mut b = [0u8; BLOCK_SIZE];
    let n = name.len().min(100);
    b[..n].copy_from_slice(&name.as_bytes()[..n]);
    b[100..107].copy_from_slice(b"0000644");
    b[108..115].copy_from_slice(b"0001750");
    b[116..123].copy_from_slice(b"0001750");
    if size < 0o77777777777 {
        let field = format!("{:011o}", size);
        b[124..135].copy_from_slice(field.as_bytes());
    } else {
        b[124] = 0x80;
        b[128..136].copy_from_slice(&size.to_be_bytes());
    }
    b[136..147].copy_from_slice(b"14400000000");
    b[156] = typeflag;
    b[257..263].copy_from_slice(b"ustar ");
    b[263..265].copy_from_slice(b" \0");
    b[265..271].copy_from_slice(b"daitss");
    seal(&mut b);
    b
}

fn seal(b: &mut [u8; BLOCK_SIZE]) {
    let sum = header_checksum(b);
    b[148..156].copy_from_slice(format!("{:06o}\0 ", sum).as_bytes());
}

fn padded(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let rem = out.len() % BLOCK_SIZE;
    if rem != 0 {
        out.resize(out.len() + BLOCK_SIZE - rem, 0);
    }
    out
}

struct ArchiveBuilder {
    bytes: Vec<u8>,
}

impl ArchiveBuilder {
    fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    fn raw(mut self, block: [u8; BLOCK_SIZE]) -> Self {
        self.bytes.extend_from_slice(&block);
        self
    }

    fn file(self, name: &str, data: &[u8]) -> Self {
        let mut me = self.raw(header(name, data.len() as u64, b'0'));
        me.bytes.extend_from_slice(&padded(data));
        me
    }

    fn long_name(self, name: &str) -> Self {
        let mut payload = name.as_bytes().to_vec();
        payload.push(0);
        let mut me = self.raw(header("././@LongLink", payload.len() as u64, b'L'));
        me.bytes.extend_from_slice(&padded(&payload));
        me
    }

    fn finish(mut self) -> Vec<u8> {
        self.bytes.extend_from_slice(&[0u8; BLOCK_SIZE * 2]);
        self.bytes
    }
}

#[test]
fn test_lists_regular_files_only() {
    let bytes = ArchiveBuilder::new()
        .raw(header("pkg/", 0, b'5'))
        .file("pkg/descriptor.xml", b"<xml/>")
        .raw(header("pkg/link", 0, b'2'))
        .file("pkg/data.bin", &[7u8; 1000])
        .finish();

    let reader = TarReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.headers().len(), 4);

    let entries = reader.entries();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["pkg/descriptor.xml", "pkg/data.bin"]);
    assert_eq!(entries[0].offset, 1024);
    assert_eq!(entries[1].size, 1000);
    assert_eq!(entries[1].mode, 0o644);
}

#[test]
fn test_read_member_and_seek() {
    let bytes = ArchiveBuilder::new()
        .file("a.txt", b"hello tar world")
        .file("b.txt", b"second")
        .finish();
    let mut reader = TarReader::new(Cursor::new(bytes)).unwrap();

    assert_eq!(reader.read_member("b.txt").unwrap().unwrap(), b"second");
    assert!(reader.read_member("c.txt").unwrap().is_none());

    let entry = reader.find("a.txt").unwrap();
    let mut member = reader.member(&entry);
    member.seek(SeekFrom::Start(6)).unwrap();
    let mut buf = String::new();
    member.read_to_string(&mut buf).unwrap();
    assert_eq!(buf, "tar world");

    member.seek(SeekFrom::End(-5)).unwrap();
    let mut tail = [0u8; 10];
    let n = member.read(&mut tail).unwrap();
    assert_eq!(&tail[..n], b"world");
    assert_eq!(member.read(&mut tail).unwrap(), 0);

    assert!(member.seek(SeekFrom::Current(-100)).is_err());
    member.rewind().unwrap();
    assert_eq!(member.position(), 0);
}

#[test]
fn test_find_ignores_leading_dot_and_slash() {
    let bytes = ArchiveBuilder::new()
        .file("./E1/descriptor.xml", b"<mets/>")
        .file("/E1/content/a.txt", b"abs")
        .file("E1/plain.txt", b"plain")
        .finish();
    let mut reader = TarReader::new(Cursor::new(bytes)).unwrap();

    assert_eq!(reader.read_member("E1/descriptor.xml").unwrap().unwrap(), b"<mets/>");
    assert_eq!(reader.read_member("./E1/content/a.txt").unwrap().unwrap(), b"abs");
    assert_eq!(reader.read_member("/E1/plain.txt").unwrap().unwrap(), b"plain");
    assert_eq!(reader.find("E1/descriptor.xml").unwrap().name, "./E1/descriptor.xml");
    assert!(reader.read_member("descriptor.xml").unwrap().is_none());
}

#[test]
fn test_long_name_and_huge_binary_size_member() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("big.tar");
    let long = format!("{}/{}", "d".repeat(90), "very-long-member-name-over-one-hundred-bytes.xml");
    assert!(long.len() > 100);

    let head = ArchiveBuilder::new()
        .long_name(&long)
        .file(&long[..100], b"short");
    let huge: u64 = 8 * 1024 * 1024 * 1024 + 3;
    let head = head.raw(header("huge.bin", huge, b'0'));

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .truncate(true)
        .open(&path)
        .unwrap();
    file.write_all(&head.bytes).unwrap();
    let data_start = head.bytes.len() as u64;

    // sparse payload: only the last three bytes are written
    file.seek(SeekFrom::Start(data_start + huge - 3)).unwrap();
    file.write_all(b"END").unwrap();
    let padded_end = data_start + huge.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64;
    file.set_len(padded_end).unwrap();
    file.seek(SeekFrom::Start(padded_end)).unwrap();
    file.write_all(&[0u8; BLOCK_SIZE * 2]).unwrap();
    drop(file);

    let mut reader = TarReader::open(&path).unwrap();
    let entries = reader.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, long);
    assert_eq!(entries[1].name, "huge.bin");
    assert_eq!(entries[1].size, huge);
    assert_eq!(entries[1].offset, data_start);

    assert_eq!(reader.read_member(&long).unwrap().unwrap(), b"short");

    let big = entries[1].clone();
    let mut member = reader.member(&big);
    member.seek(SeekFrom::End(-3)).unwrap();
    let mut tail = Vec::new();
    member.read_to_end(&mut tail).unwrap();
    assert_eq!(tail, b"END");
}

#[test]
fn test_flipped_header_byte_is_checksum_mismatch() {
    let mut bytes = ArchiveBuilder::new().file("a.txt", b"data").finish();
    // inside the name field, not the checksum field
    bytes[40] ^= 0x20;

    match TarReader::new(Cursor::new(bytes)) {
        Err(TarError::ChecksumMismatch { offset, .. }) => assert_eq!(offset, 0),
        other => panic!("expected checksum mismatch, got {:?}", other.err()),
    }
}

#[test]
fn test_unknown_type_is_skipped() {
    let bytes = ArchiveBuilder::new()
        .raw(header("pax-global", 0, b'g'))
        .file("kept.txt", b"kept")
        .finish();

    let reader = TarReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.headers()[0].entry_type, EntryType::Other(b'g'));
    let names: Vec<String> = reader.entries().into_iter().map(|e| e.name).collect();
    assert_eq!(names, ["kept.txt"]);
}

#[test]
fn test_missing_magic() {
    let mut block = header("a.txt", 0, b'0');
    block[257..265].copy_from_slice(&[0u8; 8]);
    seal(&mut block);
    let bytes = ArchiveBuilder::new().raw(block).finish();

    assert!(matches!(
        TarReader::new(Cursor::new(bytes)),
        Err(TarError::BadMagic { offset: 0 })
    ));
}

#[test]
fn test_data_after_end_marker() {
    let mut bytes = ArchiveBuilder::new().file("a.txt", b"x").bytes;
    bytes.extend_from_slice(&[0u8; BLOCK_SIZE]);
    bytes.extend_from_slice(&header("late.txt", 0, b'0'));
    bytes.extend_from_slice(&[0u8; BLOCK_SIZE * 2]);

    assert!(matches!(
        TarReader::new(Cursor::new(bytes)),
        Err(TarError::Corrupt { .. })
    ));
}

#[test]
fn test_trailing_padding_after_end_marker_is_ignored() {
    let mut bytes = ArchiveBuilder::new().file("a.txt", b"x").finish();
    bytes.extend_from_slice(&[0u8; BLOCK_SIZE * 16]);
    bytes.extend_from_slice(b"junk past the record");

    let reader = TarReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.entries().len(), 1);
}

#[test]
fn test_truncated_archives() {
    let no_trailer = ArchiveBuilder::new().file("a.txt", b"x").bytes;
    assert!(matches!(
        TarReader::new(Cursor::new(no_trailer)),
        Err(TarError::Truncated { .. })
    ));

    let mut short_payload = ArchiveBuilder::new()
        .raw(header("a.txt", 4096, b'0'))
        .bytes;
    short_payload.extend_from_slice(&[1u8; 100]);
    assert!(matches!(
        TarReader::new(Cursor::new(short_payload)),
        Err(TarError::Truncated { .. })
    ));

    let partial_header = vec![1u8; 300];
    assert!(matches!(
        TarReader::new(Cursor::new(partial_header)),
        Err(TarError::Truncated { .. })
    ));
}

#[test]
fn test_reads_gnu_archive_from_tar_crate() {
    let long_path = format!("{}/descriptor.xml", "nested/".repeat(20));
    let mut builder = tar::Builder::new(Vec::new());

    let mut h = tar::Header::new_gnu();
    h.set_size(11);
    h.set_mode(0o644);
    h.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut h, &long_path, &b"descriptor!"[..]).unwrap();

    let mut h = tar::Header::new_gnu();
    h.set_size(0);
    h.set_mode(0o755);
    h.set_entry_type(tar::EntryType::Directory);
    builder.append_data(&mut h, "files/", std::io::empty()).unwrap();

    let bytes = builder.into_inner().unwrap();
    let mut reader = TarReader::new(Cursor::new(bytes)).unwrap();

    let entries = reader.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, long_path);
    assert_eq!(reader.read_member(&long_path).unwrap().unwrap(), b"descriptor!");
}

#[test]
fn test_reads_ustar_prefix_from_tar_crate() {
    let path = format!("{}/member.txt", "p".repeat(120));
    let mut builder = tar::Builder::new(Vec::new());

    let mut h = tar::Header::new_ustar();
    h.set_size(3);
    h.set_mode(0o644);
    h.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut h, &path, &b"abc"[..]).unwrap();

    let bytes = builder.into_inner().unwrap();
    let reader = TarReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.entries()[0].name, path);
}
