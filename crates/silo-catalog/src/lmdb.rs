//! LMDB-backed catalog for persistent, crash-safe records.
//!
//! Silos are keyed by a fixed-length digest of hostname and filesystem,
//! so key length never depends on the silo path. Package keys append the
//! name, whose length the catalog caps, and LMDB's byte ordering gives
//! name-ordered package listings per silo:
//!
//! ```text
//! silos         <silo digest>                   -> SiloRecord
//! packages      <silo digest>\0name             -> PackageRecord
//! history       <silo digest>\0name\0<seq>      -> HistoryRecord
//! reservations  <id>                            -> ReservedSpace
//! meta          counter name                    -> u64
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use heed::types::{SerdeBincode, Str};
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use tracing::debug;

use crate::{
    apply_delete, apply_fixity, apply_put, Catalog, CatalogError, Checksums, HistoryRecord,
    NewPackage, PackageRecord, ReservedSpace, Result, SiloKey, SiloRecord, validate_name,
};

const HISTORY_SEQ: &str = "history_seq";
const RESERVATION_ID: &str = "reservation_id";

/// Catalog stored in an LMDB environment
pub struct LmdbCatalog {
    env: Env,
    silos: Database<Str, SerdeBincode<SiloRecord>>,
    packages: Database<Str, SerdeBincode<PackageRecord>>,
    history: Database<Str, SerdeBincode<HistoryRecord>>,
    reservations: Database<Str, SerdeBincode<ReservedSpace>>,
    meta: Database<Str, SerdeBincode<u64>>,
}

/// Hex digits of the silo digest used as key prefix.
const SILO_DIGEST_LEN: usize = 32;

fn silo_prefix(key: &SiloKey) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(key.hostname.as_bytes());
    hasher.update(b"\0");
    hasher.update(key.filesystem.to_string_lossy().as_bytes());
    let mut digest = hasher.finalize().to_hex().to_string();
    digest.truncate(SILO_DIGEST_LEN);
    digest
}

fn package_prefix(key: &SiloKey) -> String {
    format!("{}\0", silo_prefix(key))
}

fn package_key(key: &SiloKey, name: &str) -> String {
    format!("{}{}", package_prefix(key), name)
}

fn history_prefix(key: &SiloKey, name: &str) -> String {
    format!("{}\0", package_key(key, name))
}

impl LmdbCatalog {
    /// Default LMDB map size: 1GB (expandable)
    const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

    /// Open or create a catalog environment in the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(Self::DEFAULT_MAP_SIZE)
                .max_dbs(5)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let silos = env.create_database(&mut wtxn, Some("silos"))?;
        let packages = env.create_database(&mut wtxn, Some("packages"))?;
        let history = env.create_database(&mut wtxn, Some("history"))?;
        let reservations = env.create_database(&mut wtxn, Some("reservations"))?;
        let meta = env.create_database(&mut wtxn, Some("meta"))?;
        wtxn.commit()?;

        debug!("Opened LMDB catalog at {:?}", path);

        Ok(Self {
            env,
            silos,
            packages,
            history,
            reservations,
            meta,
        })
    }

    /// Bump and return a named counter inside an open write transaction.
    fn next_id(&self, wtxn: &mut RwTxn, counter: &str) -> Result<u64> {
        let next = self.meta.get(wtxn, counter)?.unwrap_or(0) + 1;
        self.meta.put(wtxn, counter, &next)?;
        Ok(next)
    }

    fn append_history(
        &self,
        wtxn: &mut RwTxn,
        silo: &SiloKey,
        name: &str,
        event: &HistoryRecord,
    ) -> Result<()> {
        let seq = self.next_id(wtxn, HISTORY_SEQ)?;
        let key = format!("{}{:020}", history_prefix(silo, name), seq);
        self.history.put(wtxn, &key, event)?;
        Ok(())
    }

    fn update_package<F>(&self, silo: &SiloKey, name: &str, change: F) -> Result<PackageRecord>
    where
        F: FnOnce(&mut PackageRecord) -> HistoryRecord,
    {
        let mut wtxn = self.env.write_txn()?;
        let key = package_key(silo, name);
        let Some(mut record) = self.packages.get(&wtxn, &key)? else {
            return Err(CatalogError::UnknownPackage {
                silo: silo.clone(),
                name: name.to_string(),
            });
        };
        let event = change(&mut record);
        self.append_history(&mut wtxn, silo, name, &event)?;
        self.packages.put(&mut wtxn, &key, &record)?;
        wtxn.commit()?;
        Ok(record)
    }

    /// Flush the environment to disk
    pub fn sync(&self) -> Result<()> {
        self.env.force_sync()?;
        Ok(())
    }
}

impl Catalog for LmdbCatalog {
    fn create_silo(&self, key: &SiloKey) -> Result<SiloRecord> {
        let mut wtxn = self.env.write_txn()?;
        let db_key = silo_prefix(key);
        if self.silos.get(&wtxn, &db_key)?.is_some() {
            return Err(CatalogError::SiloExists(key.clone()));
        }
        let record = SiloRecord::new(key.clone());
        self.silos.put(&mut wtxn, &db_key, &record)?;
        wtxn.commit()?;
        Ok(record)
    }

    fn lookup_silo(&self, key: &SiloKey) -> Result<Option<SiloRecord>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.silos.get(&rtxn, &silo_prefix(key))?)
    }

    fn list_silos(&self, hostname: Option<&str>) -> Result<Vec<SiloRecord>> {
        let host = hostname.map(|h| h.trim().to_lowercase());
        let rtxn = self.env.read_txn()?;
        let mut result = Vec::new();
        let mut iter = self.silos.iter(&rtxn)?;
        while let Some(entry) = iter.next() {
            let (_, record) = entry?;
            if host.as_ref().map_or(true, |h| &record.key.hostname == h) {
                result.push(record);
            }
        }
        result.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(result)
    }

    fn update_silo(&self, record: &SiloRecord) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        let db_key = silo_prefix(&record.key);
        if self.silos.get(&wtxn, &db_key)?.is_none() {
            return Err(CatalogError::UnknownSilo(record.key.clone()));
        }
        self.silos.put(&mut wtxn, &db_key, record)?;
        wtxn.commit()?;
        Ok(())
    }

    fn remove_silo(&self, key: &SiloKey) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        let packages = self
            .packages
            .prefix_iter(&wtxn, &package_prefix(key))?
            .count();
        if packages > 0 {
            return Err(CatalogError::SiloInUse {
                silo: key.clone(),
                packages,
            });
        }
        if !self.silos.delete(&mut wtxn, &silo_prefix(key))? {
            return Err(CatalogError::UnknownSilo(key.clone()));
        }
        wtxn.commit()?;
        Ok(())
    }

    fn lookup_package(&self, silo: &SiloKey, name: &str) -> Result<Option<PackageRecord>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.packages.get(&rtxn, &package_key(silo, name))?)
    }

    fn all_packages(&self, silo: &SiloKey) -> Result<Vec<PackageRecord>> {
        let rtxn = self.env.read_txn()?;
        let mut result = Vec::new();
        let mut iter = self.packages.prefix_iter(&rtxn, &package_prefix(silo))?;
        while let Some(entry) = iter.next() {
            let (_, record) = entry?;
            result.push(record);
        }
        Ok(result)
    }

    fn record_put(&self, silo: &SiloKey, put: &NewPackage, at: DateTime<Utc>) -> Result<PackageRecord> {
        validate_name(&put.name)?;
        let mut wtxn = self.env.write_txn()?;
        if self.silos.get(&wtxn, &silo_prefix(silo))?.is_none() {
            return Err(CatalogError::UnknownSilo(silo.clone()));
        }
        let (record, event) = apply_put(silo, put, at);
        self.append_history(&mut wtxn, silo, &put.name, &event)?;
        self.packages
            .put(&mut wtxn, &package_key(silo, &put.name), &record)?;
        wtxn.commit()?;
        Ok(record)
    }

    fn record_fixity(
        &self,
        silo: &SiloKey,
        name: &str,
        checksums: Option<&Checksums>,
        at: DateTime<Utc>,
    ) -> Result<PackageRecord> {
        self.update_package(silo, name, |record| apply_fixity(record, checksums, at))
    }

    fn record_delete(&self, silo: &SiloKey, name: &str, at: DateTime<Utc>) -> Result<PackageRecord> {
        self.update_package(silo, name, |record| apply_delete(record, at))
    }

    fn history(&self, silo: &SiloKey, name: &str) -> Result<Vec<HistoryRecord>> {
        let rtxn = self.env.read_txn()?;
        let mut result = Vec::new();
        let mut iter = self.history.prefix_iter(&rtxn, &history_prefix(silo, name))?;
        while let Some(entry) = iter.next() {
            let (_, event) = entry?;
            result.push(event);
        }
        Ok(result)
    }

    fn create_reservation(&self, partition: &Path, size: u64, at: DateTime<Utc>) -> Result<ReservedSpace> {
        let mut wtxn = self.env.write_txn()?;
        let id = self.next_id(&mut wtxn, RESERVATION_ID)?;
        let reservation = ReservedSpace {
            id,
            partition: partition.to_path_buf(),
            size,
            created_at: at,
        };
        self.reservations
            .put(&mut wtxn, &format!("{:020}", id), &reservation)?;
        wtxn.commit()?;
        Ok(reservation)
    }

    fn list_reservations(&self) -> Result<Vec<ReservedSpace>> {
        let rtxn = self.env.read_txn()?;
        let mut result = Vec::new();
        let mut iter = self.reservations.iter(&rtxn)?;
        while let Some(entry) = iter.next() {
            let (_, reservation) = entry?;
            result.push(reservation);
        }
        Ok(result)
    }

    fn release_reservation(&self, id: u64) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;
        let removed = self.reservations.delete(&mut wtxn, &format!("{:020}", id))?;
        wtxn.commit()?;
        Ok(removed)
    }

    fn purge_reservations_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut wtxn = self.env.write_txn()?;
        let mut stale = Vec::new();
        {
            let mut iter = self.reservations.iter(&wtxn)?;
            while let Some(entry) = iter.next() {
                let (key, reservation) = entry?;
                if reservation.created_at < cutoff {
                    stale.push(key.to_string());
                }
            }
        }
        for key in &stale {
            self.reservations.delete(&mut wtxn, key)?;
        }
        wtxn.commit()?;
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;
    use tempfile::TempDir;

    fn open() -> (TempDir, LmdbCatalog) {
        let temp = TempDir::new().unwrap();
        let catalog = LmdbCatalog::open(temp.path().join("catalog")).unwrap();
        (temp, catalog)
    }

    #[test]
    fn test_silo_lifecycle() {
        let (_temp, catalog) = open();
        conformance::silo_lifecycle(&catalog);
    }

    #[test]
    fn test_silo_listing_order() {
        let (_temp, catalog) = open();
        conformance::silo_listing_order(&catalog);
    }

    #[test]
    fn test_put_fixity_delete() {
        let (_temp, catalog) = open();
        conformance::put_fixity_delete(&catalog);
    }

    #[test]
    fn test_reput_after_delete() {
        let (_temp, catalog) = open();
        conformance::reput_after_delete(&catalog);
    }

    #[test]
    fn test_package_queries() {
        let (_temp, catalog) = open();
        conformance::package_queries(&catalog);
    }

    #[test]
    fn test_reservations() {
        let (_temp, catalog) = open();
        conformance::reservations(&catalog);
    }

    #[test]
    fn test_empty_silo_removal() {
        let (_temp, catalog) = open();
        conformance::empty_silo_removal(&catalog);
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalog");
        let key = SiloKey::new("h", "/s");
        {
            let catalog = LmdbCatalog::open(&path).unwrap();
            catalog.create_silo(&key).unwrap();
            catalog
                .record_put(&key, &conformance::put("E1", "abc"), conformance::t0())
                .unwrap();
            catalog.sync().unwrap();
        }

        let catalog = LmdbCatalog::open(&path).unwrap();
        let rec = catalog.lookup_package(&key, "E1").unwrap().unwrap();
        assert_eq!(rec.initial.md5, "abc");
        assert_eq!(catalog.history(&key, "E1").unwrap().len(), 1);

        // counters continue rather than restart
        catalog
            .record_fixity(&key, "E1", None, conformance::t0())
            .unwrap();
        assert_eq!(catalog.history(&key, "E1").unwrap().len(), 2);
    }

    #[test]
    fn test_history_prefix_does_not_bleed() {
        let (_temp, catalog) = open();
        let key = SiloKey::new("h", "/s");
        catalog.create_silo(&key).unwrap();
        catalog
            .record_put(&key, &conformance::put("E1", "a"), conformance::t0())
            .unwrap();
        catalog
            .record_put(&key, &conformance::put("E10", "b"), conformance::t0())
            .unwrap();
        assert_eq!(catalog.history(&key, "E1").unwrap().len(), 1);
    }

    #[test]
    fn test_name_limits() {
        let (_temp, catalog) = open();
        conformance::name_limits(&catalog);
    }

    #[test]
    fn test_silo_keys_are_fixed_length() {
        let short = SiloKey::new("h", "/s");
        let deep = SiloKey::new("h", format!("/{}", "d".repeat(4000)));
        assert_eq!(silo_prefix(&short).len(), SILO_DIGEST_LEN);
        assert_eq!(silo_prefix(&deep).len(), SILO_DIGEST_LEN);
        assert_ne!(silo_prefix(&short), silo_prefix(&SiloKey::new("h", "/t")));
    }
}
