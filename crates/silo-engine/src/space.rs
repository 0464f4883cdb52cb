//! Free-space probing per disk partition.

use std::collections::HashMap;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Maps silo directories to partitions and reports their free bytes.
pub trait SpaceProbe: Send + Sync {
    /// Identifier of the partition holding `path`.
    fn partition(&self, path: &Path) -> io::Result<PathBuf>;

    /// Bytes available to unprivileged writers on a partition.
    fn free_bytes(&self, partition: &Path) -> io::Result<u64>;
}

/// Real filesystems: partitions are mount points.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSpace;

impl SpaceProbe for FsSpace {
    /// Walk up from `path` while the device id stays the same; the last
    /// directory on the device is its mount point.
    fn partition(&self, path: &Path) -> io::Result<PathBuf> {
        let path = path.canonicalize()?;
        let device = path.metadata()?.dev();
        let mut mount = path.clone();
        for ancestor in path.ancestors().skip(1) {
            if ancestor.metadata()?.dev() != device {
                break;
            }
            mount = ancestor.to_path_buf();
        }
        Ok(mount)
    }

    fn free_bytes(&self, partition: &Path) -> io::Result<u64> {
        fs2::available_space(partition)
    }
}

/// Configured partitions for tests and dry runs.
#[derive(Debug, Default)]
pub struct FixedSpace {
    silos: HashMap<PathBuf, PathBuf>,
    free: Mutex<HashMap<PathBuf, u64>>,
}

impl FixedSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a silo directory on a partition.
    pub fn with_silo(mut self, silo: impl Into<PathBuf>, partition: impl Into<PathBuf>) -> Self {
        self.silos.insert(silo.into(), partition.into());
        self
    }

    pub fn with_free(self, partition: impl Into<PathBuf>, bytes: u64) -> Self {
        self.set_free(partition, bytes);
        self
    }

    pub fn set_free(&self, partition: impl Into<PathBuf>, bytes: u64) {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        free.insert(partition.into(), bytes);
    }
}

fn unknown(what: &str, path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no {} configured for {}", what, path.display()),
    )
}

impl SpaceProbe for FixedSpace {
    fn partition(&self, path: &Path) -> io::Result<PathBuf> {
        self.silos.get(path).cloned().ok_or_else(|| unknown("partition", path))
    }

    fn free_bytes(&self, partition: &Path) -> io::Result<u64> {
        let free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        free.get(partition).copied().ok_or_else(|| unknown("free space", partition))
    }
}
