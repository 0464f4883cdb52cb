//! Catalog record types.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CatalogError;

/// Identity of a silo: the host it lives on and its directory.
///
/// Hostnames are case-insensitive and stored lowercased; trailing slashes
/// on the filesystem path are dropped so `/daitssfs/001/` and
/// `/daitssfs/001` name the same silo.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiloKey {
    pub hostname: String,
    pub filesystem: PathBuf,
}

impl SiloKey {
    pub fn new(hostname: &str, filesystem: impl AsRef<Path>) -> Self {
        let raw = filesystem.as_ref().to_string_lossy();
        let trimmed = raw.trim_end_matches('/');
        let filesystem = if trimmed.is_empty() && raw.starts_with('/') {
            PathBuf::from("/")
        } else {
            PathBuf::from(trimmed)
        };
        Self {
            hostname: hostname.trim().to_lowercase(),
            filesystem,
        }
    }

    /// Last component of the filesystem path, used as the silo's short name.
    pub fn short_name(&self) -> String {
        self.filesystem
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.filesystem.to_string_lossy().to_string())
    }
}

impl fmt::Display for SiloKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.filesystem.display())
    }
}

/// Lifecycle state of a silo
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiloState {
    DiskMaster,
    DiskIdling,
    TapeMaster,
}

impl SiloState {
    pub const ALL: [SiloState; 3] = [
        SiloState::DiskMaster,
        SiloState::DiskIdling,
        SiloState::TapeMaster,
    ];

    pub fn media(self) -> Media {
        match self {
            SiloState::DiskMaster | SiloState::DiskIdling => Media::Disk,
            SiloState::TapeMaster => Media::Tape,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SiloState::DiskMaster => "disk_master",
            SiloState::DiskIdling => "disk_idling",
            SiloState::TapeMaster => "tape_master",
        }
    }
}

impl fmt::Display for SiloState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiloState {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disk_master" => Ok(SiloState::DiskMaster),
            "disk_idling" => Ok(SiloState::DiskIdling),
            "tape_master" => Ok(SiloState::TapeMaster),
            other => Err(CatalogError::Invalid(format!("unknown silo state: {}", other))),
        }
    }
}

/// Storage medium that authoritatively holds a silo's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Media {
    Disk,
    Tape,
}

impl fmt::Display for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Media::Disk => f.write_str("disk"),
            Media::Tape => f.write_str("tape"),
        }
    }
}

/// Externally visible operations on a silo
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Put,
    Delete,
    Post,
}

impl Method {
    pub const ALL: [Method; 4] = [Method::Get, Method::Put, Method::Delete, Method::Post];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Put => "put",
            Method::Delete => "delete",
            Method::Post => "post",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "get" => Ok(Method::Get),
            "put" => Ok(Method::Put),
            "delete" => Ok(Method::Delete),
            "post" => Ok(Method::Post),
            other => Err(CatalogError::Invalid(format!("unknown method: {}", other))),
        }
    }
}

/// Catalog row for a silo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiloRecord {
    pub key: SiloKey,
    pub state: SiloState,
    pub forbidden: BTreeSet<Method>,
    pub retired: bool,
}

impl SiloRecord {
    /// A fresh silo: disk master, post forbidden, active.
    pub fn new(key: SiloKey) -> Self {
        Self {
            key,
            state: SiloState::DiskMaster,
            forbidden: BTreeSet::from([Method::Post]),
            retired: false,
        }
    }

    pub fn media(&self) -> Media {
        self.state.media()
    }
}

/// MD5 and SHA1 of a package, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub md5: String,
    pub sha1: String,
}

impl Checksums {
    pub fn new(md5: impl Into<String>, sha1: impl Into<String>) -> Self {
        Self {
            md5: md5.into(),
            sha1: sha1.into(),
        }
    }
}

/// Fixity status of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    Ok,
    Missing,
    Fail,
}

impl PackageStatus {
    /// Status of a fixity result compared with the checksums recorded at put.
    pub fn compare(initial: &Checksums, observed: Option<&Checksums>) -> Self {
        match observed {
            None => PackageStatus::Missing,
            Some(c) if c == initial => PackageStatus::Ok,
            Some(_) => PackageStatus::Fail,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PackageStatus::Ok => "ok",
            PackageStatus::Missing => "missing",
            PackageStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog row for a package within one silo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub silo: SiloKey,
    pub name: String,
    pub extant: bool,
    pub size: u64,
    pub content_type: String,
    pub initial: Checksums,
    pub initial_timestamp: DateTime<Utc>,
    /// Checksums from the most recent fixity check; `None` when the last
    /// check found the package missing.
    pub latest: Option<Checksums>,
    pub latest_timestamp: DateTime<Utc>,
}

impl PackageRecord {
    pub fn status(&self) -> PackageStatus {
        PackageStatus::compare(&self.initial, self.latest.as_ref())
    }
}

/// What happened to a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Put,
    Fixity,
    Delete,
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryAction::Put => f.write_str("put"),
            HistoryAction::Fixity => f.write_str("fixity"),
            HistoryAction::Delete => f.write_str("delete"),
        }
    }
}

/// Append-only event on a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub action: HistoryAction,
    /// Checksums stored (put), observed (fixity) or absent (delete, or a
    /// fixity check that found nothing)
    pub checksums: Option<Checksums>,
    pub timestamp: DateTime<Utc>,
}

/// Arguments of a completed put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPackage {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub checksums: Checksums,
}

/// Space set aside on a partition for an allocation in progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedSpace {
    pub id: u64,
    pub partition: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}
