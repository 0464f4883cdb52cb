//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Silo directories, grouped under one temporary root
//! - An isolated catalog directory and pool lock directory
//! - A tape cache root and a scratch disk
//!
//! # Usage
//!
//! ```ignore
//! use silo_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let silo = env.create_silo_dir("001").unwrap();
//!     let config = env.config();
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{CatalogBackend, Config};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Parent directory of every silo created by the test
    pub silo_root: PathBuf,
    /// Catalog environment directory
    pub catalog_dir: PathBuf,
    /// Directory holding the pool lock
    pub lock_dir: PathBuf,
    /// Tape restore cache root
    pub cache_root: PathBuf,
    /// Scratch disk for tape scans
    pub scratch_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let silo_root = root.join("silos");
        let catalog_dir = root.join("catalog");
        let lock_dir = root.join("lock");
        let cache_root = root.join("cache");
        let scratch_dir = root.join("scratch");

        for dir in [&silo_root, &catalog_dir, &lock_dir, &cache_root, &scratch_dir] {
            std::fs::create_dir_all(dir)?;
        }

        Ok(Self {
            _temp_dir: temp_dir,
            silo_root,
            catalog_dir,
            lock_dir,
            cache_root,
            scratch_dir,
            test_id,
        })
    }

    /// The temporary root every other path lives under
    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Hostname unique to this environment
    pub fn hostname(&self) -> String {
        format!("test-host-{}", self.test_id)
    }

    /// Create a silo directory under the silo root
    pub fn create_silo_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
        let path = self.silo_root.join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Create a file relative to the temporary root
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.root().join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Config pointing every path at this environment
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.catalog.path = self.catalog_dir.clone();
        cfg.catalog.backend = CatalogBackend::Memory;
        cfg.pool.hostname = Some(self.hostname());
        cfg.pool.lock_dir = self.lock_dir.clone();
        cfg.pool.lock_timeout_secs = 2;
        cfg.tape.cache_root = self.cache_root.clone();
        cfg.fixity.scratch_dir = Some(self.scratch_dir.clone());
        cfg
    }
}
