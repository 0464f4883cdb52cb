//! Parser for the backup client's detailed query output.
//!
//! A listing looks like:
//!
//! ```text
//!      1,124  B  07/12/2010 18:22:25    DEFAULT      A  /daitssfs/023/000/04a1/data
//!          Modified: 07/12/2010 18:22:25  Accessed: 07/12/2010 18:22:25
//! ```
//!
//! Only active (`A`) entries are kept.

use std::path::PathBuf;

use chrono::NaiveDateTime;

const DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// An active file known to the tape system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<NaiveDateTime>,
}

/// Split off `n` whitespace-separated fields; the remainder is returned
/// trimmed, so paths containing spaces survive.
fn split_fields(line: &str, n: usize) -> Option<(Vec<&str>, &str)> {
    let mut rest = line.trim_start();
    let mut fields = Vec::with_capacity(n);
    for _ in 0..n {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    Some((fields, rest.trim_end()))
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    match unit {
        "B" => Some(1),
        "KB" => Some(1024),
        "MB" => Some(1024 * 1024),
        "GB" => Some(1024 * 1024 * 1024),
        _ => None,
    }
}

/// Parse one backup entry line: size, unit, date, time, class, state, path.
fn parse_entry(line: &str) -> Option<(ListedFile, bool)> {
    let (fields, path) = split_fields(line, 6)?;
    if path.is_empty() {
        return None;
    }
    let size: f64 = fields[0].replace(',', "").parse().ok()?;
    let multiplier = unit_multiplier(fields[1])?;
    let active = match fields[5] {
        "A" => true,
        "I" => false,
        _ => return None,
    };
    let size = (size * multiplier as f64).round() as u64;
    Some((
        ListedFile {
            path: PathBuf::from(path),
            size,
            modified: None,
        },
        active,
    ))
}

fn parse_modified(line: &str) -> Option<NaiveDateTime> {
    let rest = line.trim_start().strip_prefix("Modified:")?;
    let (fields, _) = split_fields(rest, 2)?;
    let stamp = format!("{} {}", fields[0], fields[1]);
    NaiveDateTime::parse_from_str(&stamp, DATE_FORMAT).ok()
}

/// Active files from a listing, sorted by path. Unrecognised lines
/// (banners, headings, inactive versions) are skipped.
pub fn parse_listing<S: AsRef<str>>(lines: &[S]) -> Vec<ListedFile> {
    let mut files = Vec::new();
    let mut pending: Option<ListedFile> = None;

    for line in lines {
        let line = line.as_ref();
        if let Some(modified) = parse_modified(line) {
            if let Some(mut file) = pending.take() {
                file.modified = Some(modified);
                files.push(file);
            }
            continue;
        }
        if let Some((file, active)) = parse_entry(line) {
            if let Some(previous) = pending.take() {
                files.push(previous);
            }
            if active {
                pending = Some(file);
            }
        }
    }
    if let Some(file) = pending {
        files.push(file);
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}
