//! Silos whose packages live on tape, read through a local cache.

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use silo_catalog::{Catalog, Checksums, Clock, PackageRecord, SiloKey};
use silo_config::{log_tape_info, log_tape_warn, TapeConfig};
use silo_store::{hashpath, hashpath_parent, ContentStore, StoreError};
use silo_tape::{TapeAgent, TapeError, TapeOutcome};

use crate::lifecycle::DirectoryStatus;
use crate::reconcile::{CatalogState, FixitySource};
use crate::silo::{catalog_state, PackageCheck, Silo};
use crate::{Result, SiloError};

const CACHE_PREFIX: &str = "tape-silo-cache-";
const README: &str = "ReadMe";

/// Cache directory name for a silo: stable per host and filesystem.
pub fn cache_dir_name(key: &SiloKey) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(key.hostname.as_bytes());
    hasher.update(key.filesystem.as_os_str().as_encoded_bytes());
    let hex = hasher.finalize().to_hex();
    format!("{}{}", CACHE_PREFIX, &hex[..8])
}

/// A silo mastered on tape
pub struct TapeSilo {
    key: SiloKey,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    agent: Arc<dyn TapeAgent>,
    cache: ContentStore,
    horizon: chrono::Duration,
    timeout: Duration,
}

impl std::fmt::Debug for TapeSilo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapeSilo")
            .field("key", &self.key)
            .field("cache", &self.cache.root())
            .finish()
    }
}

impl TapeSilo {
    pub fn open(
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        agent: Arc<dyn TapeAgent>,
        key: SiloKey,
        config: &TapeConfig,
    ) -> Result<Self> {
        if !DirectoryStatus::probe(&config.cache_root).usable {
            return Err(SiloError::Configuration(format!(
                "tape cache root {} is not a writable directory",
                config.cache_root.display()
            )));
        }
        if catalog.lookup_silo(&key)?.is_none() {
            return Err(SiloError::UnknownSilo(key));
        }

        let cache = ContentStore::create(config.cache_root.join(cache_dir_name(&key)))?;
        let readme = cache.root().join(README);
        if !readme.exists() {
            fs::write(
                &readme,
                format!(
                    "Packages restored from tape for silo {}.\n\
                     Entries unused for {} days are removed on the next retrieval.\n",
                    key, config.cache_days
                ),
            )?;
        }

        Ok(Self {
            key,
            catalog,
            clock,
            agent,
            cache,
            horizon: chrono::Duration::days(config.cache_days as i64),
            timeout: config.timeout(),
        })
    }

    pub fn cache(&self) -> &ContentStore {
        &self.cache
    }

    fn cataloged(&self, name: &str) -> Result<Option<PackageRecord>> {
        Ok(self
            .catalog
            .lookup_package(&self.key, name)?
            .filter(|p| p.extant))
    }

    /// Drop cached packages nobody has read within the horizon.
    pub fn prune_cache(&self) -> Result<usize> {
        let cutoff = self.clock.now() - self.horizon;
        let mut removed = 0;
        for name in self.cache.names() {
            let name = name?;
            if self.cache.last_access(&name)? < cutoff {
                self.cache.delete(&name)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Make sure the cache holds `name`, restoring it from tape if needed.
    fn retrieve(&self, name: &str) -> Result<()> {
        if self.cache.exists(name) {
            return Ok(());
        }
        self.prune_cache()?;

        let source = self.key.filesystem.join(hashpath(name));
        let destination = self.cache.root().join(hashpath_parent(name));
        fs::create_dir_all(&destination)?;

        let run = self
            .agent
            .restore(&source, &destination, Some(self.timeout))
            .check()
            .map_err(|failed| {
                let TapeError::Failed {
                    command,
                    status,
                    output,
                    errors,
                } = failed;
                SiloError::TapeRetrieval {
                    name: name.to_string(),
                    message: format!("{} exited with status {}", command, status),
                    output,
                    errors,
                }
            })?;
        let silo = self.key.to_string();
        if run.outcome() == TapeOutcome::Warning {
            let errors = run.errors_head().join(" | ");
            log_tape_warn!(
                "restore finished with warnings",
                silo = silo.as_str(),
                package = name,
                status = run.status,
                errors = errors.as_str()
            );
        } else {
            log_tape_info!("package restored", silo = silo.as_str(), package = name);
        }

        if !self.cache.exists(name) {
            return Err(SiloError::TapeRetrieval {
                name: name.to_string(),
                message: format!(
                    "restore reported status {} but left nothing in {}",
                    run.status,
                    self.cache.root().display()
                ),
                output: run.output_head().to_vec(),
                errors: run.errors_head().to_vec(),
            });
        }
        Ok(())
    }

    fn evict(&self, name: &str) -> Result<()> {
        match self.cache.delete(name) {
            Ok(()) | Err(StoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Silo for TapeSilo {
    fn key(&self) -> &SiloKey {
        &self.key
    }

    fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if self.cataloged(name)?.is_none() {
            return Ok(None);
        }
        self.retrieve(name)?;
        Ok(self.cache.get(name)?)
    }

    fn open(&self, name: &str) -> Result<Option<File>> {
        if self.cataloged(name)?.is_none() {
            return Ok(None);
        }
        self.retrieve(name)?;
        Ok(self.cache.open(name)?)
    }

    fn data_path(&self, name: &str) -> Result<PathBuf> {
        self.package(name)?;
        self.retrieve(name)?;
        Ok(self.cache.data_path(name))
    }

    fn put(&self, _name: &str, _data: &[u8], _content_type: Option<&str>) -> Result<PackageRecord> {
        Err(SiloError::MethodNotAllowed {
            silo: self.key.clone(),
            method: silo_catalog::Method::Put,
        })
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.package(name)?;
        self.evict(name)?;
        self.catalog.record_delete(&self.key, name, self.clock.now())?;
        let silo = self.key.to_string();
        log_tape_info!("package deleted", silo = silo.as_str(), package = name);
        Ok(())
    }

    /// Catalog only: tape contents are never scanned here.
    fn check(&self, name: &str) -> Result<PackageCheck> {
        let state = catalog_state(self.catalog.as_ref(), &self.key, name)?;
        Ok(PackageCheck::of(state == CatalogState::Extant, state))
    }

    fn fixity(&self, name: &str) -> Result<Checksums> {
        self.package(name)?;
        self.retrieve(name)?;
        self.cache.checksums(name)
    }

    fn available_space(&self) -> u64 {
        0
    }

    fn fixity_source(&self) -> &dyn FixitySource {
        self
    }
}

impl FixitySource for TapeSilo {
    fn checksums(&self, name: &str) -> Result<Checksums> {
        self.fixity(name)
    }

    fn recorded_checksums(&self, name: &str) -> Result<Option<Checksums>> {
        self.retrieve(name)?;
        self.cache.recorded_checksums(name)
    }
}
