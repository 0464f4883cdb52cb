//! Silos whose packages live on a local disk directory.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use silo_catalog::{validate_name, Catalog, Checksums, Clock, NewPackage, PackageRecord, SiloKey};
use silo_config::{log_silo_error, log_silo_info};
use silo_store::{checksums_of, ContentStore, ObjectMeta, StoreError};

use crate::reconcile::FixitySource;
use crate::silo::{catalog_state, PackageCheck, Silo};
use crate::{Result, SiloError};

/// A disk directory registered in the catalog
#[derive(Clone)]
pub struct DiskSilo {
    key: SiloKey,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DiskSilo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskSilo").field("key", &self.key).finish()
    }
}

impl DiskSilo {
    /// Register a new silo on an existing directory.
    pub fn create(
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        hostname: &str,
        filesystem: &Path,
    ) -> Result<Self> {
        if !filesystem.is_dir() {
            return Err(SiloError::BadFilesystem(filesystem.to_path_buf()));
        }
        let key = SiloKey::new(hostname, filesystem);
        catalog.create_silo(&key)?;
        let silo = key.to_string();
        log_silo_info!("silo created", silo = silo.as_str());
        Ok(Self { key, catalog, clock })
    }

    /// Handle on a silo the catalog already knows.
    pub fn open(catalog: Arc<dyn Catalog>, clock: Arc<dyn Clock>, key: SiloKey) -> Result<Self> {
        if catalog.lookup_silo(&key)?.is_none() {
            return Err(SiloError::UnknownSilo(key));
        }
        Ok(Self { key, catalog, clock })
    }

    /// The directory as a content store, for reconciliation.
    pub fn physical_store(&self) -> Result<ContentStore> {
        ContentStore::new(&self.key.filesystem).map_err(|e| match e {
            StoreError::NotADirectory { path } => SiloError::BadFilesystem(path),
            other => other.into(),
        })
    }

    fn not_found(&self, name: &str) -> SiloError {
        SiloError::PackageNotFound {
            silo: self.key.clone(),
            name: name.to_string(),
        }
    }

    /// Store a package only if its bytes hash to `expected_md5`.
    pub fn put_checked(
        &self,
        name: &str,
        data: &[u8],
        content_type: Option<&str>,
        expected_md5: &str,
    ) -> Result<PackageRecord> {
        let (md5, _) = checksums_of(data)?;
        if !md5.eq_ignore_ascii_case(expected_md5) {
            return Err(SiloError::Md5Mismatch {
                name: name.to_string(),
                expected: expected_md5.to_string(),
                actual: md5,
            });
        }
        self.put(name, data, content_type)
    }

    /// Stream a package in. With `expected_md5`, a mismatch removes the
    /// bytes again before anything is cataloged.
    pub fn put_reader<R: Read>(
        &self,
        name: &str,
        reader: R,
        content_type: Option<&str>,
        expected_md5: Option<&str>,
    ) -> Result<PackageRecord> {
        validate_name(name)?;
        let store = self.physical_store()?;
        let meta = store
            .put_reader(name, reader, content_type, self.clock.now())
            .map_err(|e| self.store_error(name, e))?;

        if let Some(expected) = expected_md5 {
            if !meta.md5.eq_ignore_ascii_case(expected) {
                self.discard(&store, name);
                return Err(SiloError::Md5Mismatch {
                    name: name.to_string(),
                    expected: expected.to_string(),
                    actual: meta.md5,
                });
            }
        }
        self.catalog_put(&store, meta)
    }

    fn store_error(&self, name: &str, err: StoreError) -> SiloError {
        match err {
            StoreError::AlreadyExists { .. } => SiloError::ResourceExists {
                silo: self.key.clone(),
                name: name.to_string(),
            },
            other => other.into(),
        }
    }

    fn discard(&self, store: &ContentStore, name: &str) {
        if let Err(e) = store.delete(name) {
            let silo = self.key.to_string();
            let reason = e.to_string();
            log_silo_error!(
                "could not remove uncataloged package",
                silo = silo.as_str(),
                package = name,
                error = reason.as_str()
            );
        }
    }

    fn catalog_put(&self, store: &ContentStore, meta: ObjectMeta) -> Result<PackageRecord> {
        let new = NewPackage {
            name: meta.name.clone(),
            size: meta.size,
            content_type: meta.content_type.clone(),
            checksums: Checksums::new(meta.md5.clone(), meta.sha1.clone()),
        };
        match self.catalog.record_put(&self.key, &new, meta.datetime) {
            Ok(record) => {
                let silo = self.key.to_string();
                log_silo_info!(
                    "package stored",
                    silo = silo.as_str(),
                    package = meta.name.as_str(),
                    size = meta.size
                );
                Ok(record)
            }
            Err(e) => {
                self.discard(store, &meta.name);
                Err(e.into())
            }
        }
    }
}

impl Silo for DiskSilo {
    fn key(&self) -> &SiloKey {
        &self.key
    }

    fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if !self.exists(name)? {
            return Ok(None);
        }
        Ok(self.physical_store()?.get(name)?)
    }

    fn open(&self, name: &str) -> Result<Option<File>> {
        if !self.exists(name)? {
            return Ok(None);
        }
        Ok(self.physical_store()?.open(name)?)
    }

    fn data_path(&self, name: &str) -> Result<PathBuf> {
        if !self.exists(name)? {
            return Err(self.not_found(name));
        }
        Ok(self.physical_store()?.data_path(name))
    }

    fn put(&self, name: &str, data: &[u8], content_type: Option<&str>) -> Result<PackageRecord> {
        self.put_reader(name, data, content_type, None)
    }

    fn delete(&self, name: &str) -> Result<()> {
        if !self.exists(name)? {
            return Err(self.not_found(name));
        }
        self.physical_store()?.delete(name)?;
        self.catalog.record_delete(&self.key, name, self.clock.now())?;
        let silo = self.key.to_string();
        log_silo_info!("package deleted", silo = silo.as_str(), package = name);
        Ok(())
    }

    fn check(&self, name: &str) -> Result<PackageCheck> {
        let present = self.physical_store()?.exists(name);
        let cataloged = catalog_state(self.catalog.as_ref(), &self.key, name)?;
        Ok(PackageCheck::of(present, cataloged))
    }

    fn fixity(&self, name: &str) -> Result<Checksums> {
        let store = self.physical_store()?;
        if !store.exists(name) {
            return Err(self.not_found(name));
        }
        store.checksums(name)
    }

    fn available_space(&self) -> u64 {
        fs2::available_space(&self.key.filesystem).unwrap_or(0)
    }

    fn fixity_source(&self) -> &dyn FixitySource {
        self
    }
}

impl FixitySource for DiskSilo {
    fn checksums(&self, name: &str) -> Result<Checksums> {
        self.fixity(name)
    }

    fn recorded_checksums(&self, name: &str) -> Result<Option<Checksums>> {
        self.physical_store()?.recorded_checksums(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use silo_catalog::{CatalogError, ManualClock, MemoryCatalog, Method, PackageQuery, SiloState};
    use tempfile::TempDir;

    fn silo() -> (TempDir, Arc<MemoryCatalog>, DiskSilo) {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("001");
        std::fs::create_dir(&dir).unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2011, 1, 1, 0, 0, 0).unwrap()));
        let silo = DiskSilo::create(catalog.clone(), clock, "host", &dir).unwrap();
        (temp, catalog, silo)
    }

    #[test]
    fn test_create_requires_directory() {
        let temp = TempDir::new().unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let err = DiskSilo::create(
            catalog.clone(),
            Arc::new(silo_catalog::SystemClock),
            "host",
            &temp.path().join("nope"),
        )
        .unwrap_err();
        assert!(matches!(err, SiloError::BadFilesystem(_)));
        assert_eq!(err.status_code(), 400);

        let err = DiskSilo::open(catalog, Arc::new(silo_catalog::SystemClock), SiloKey::new("host", "/x"))
            .unwrap_err();
        assert!(matches!(err, SiloError::UnknownSilo(_)));
    }

    #[test]
    fn test_put_get_delete() {
        let (_temp, catalog, silo) = silo();
        let record = silo.put("E1", b"hello", Some("application/x-tar")).unwrap();
        assert_eq!(record.size, 5);
        assert_eq!(record.initial.md5, "5d41402abc4b2a76b9719d911017c592");

        assert!(silo.exists("E1").unwrap());
        assert_eq!(silo.get("E1").unwrap().unwrap(), b"hello");
        assert!(silo.data_path("E1").unwrap().is_file());
        assert_eq!(silo.names().unwrap(), ["E1"]);

        assert!(matches!(
            silo.put("E1", b"again", None),
            Err(SiloError::ResourceExists { .. })
        ));

        silo.delete("E1").unwrap();
        assert!(!silo.exists("E1").unwrap());
        assert!(silo.get("E1").unwrap().is_none());
        assert!(matches!(silo.delete("E1"), Err(SiloError::PackageNotFound { .. })));
        assert!(matches!(silo.package("E1"), Err(SiloError::PackageDeleted { .. })));

        let rows = catalog.list_packages(silo.key(), &PackageQuery::new()).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].extant);
    }

    #[test]
    fn test_put_checked_rejects_before_writing() {
        let (_temp, catalog, silo) = silo();
        let err = silo.put_checked("E1", b"hello", None, "00").unwrap_err();
        assert!(matches!(err, SiloError::Md5Mismatch { .. }));
        assert_eq!(err.status_code(), 412);
        assert!(!silo.physical_store().unwrap().exists("E1"));
        assert!(catalog.lookup_package(silo.key(), "E1").unwrap().is_none());

        silo.put_checked("E1", b"hello", None, "5D41402ABC4B2A76B9719D911017C592")
            .unwrap();
    }

    #[test]
    fn test_put_reader_mismatch_leaves_nothing_behind() {
        let (_temp, catalog, silo) = silo();
        let err = silo.put_reader("E1", &b"hello"[..], None, Some("ff")).unwrap_err();
        assert!(matches!(err, SiloError::Md5Mismatch { .. }));
        assert!(!silo.physical_store().unwrap().exists("E1"));
        assert!(catalog.lookup_package(silo.key(), "E1").unwrap().is_none());
    }

    #[test]
    fn test_overlong_name_is_refused_before_writing() {
        let (_temp, catalog, silo) = silo();
        let name = "E".repeat(600);
        let err = silo.put(&name, b"hello", None).unwrap_err();
        assert!(matches!(err, SiloError::Catalog(CatalogError::NameTooLong { len: 600, .. })));
        assert_eq!(err.status_code(), 400);
        assert!(silo.physical_store().unwrap().names().next().is_none());
        assert!(catalog.lookup_package(silo.key(), &name).unwrap().is_none());
    }

    #[test]
    fn test_incidents_surface_on_read() {
        let (_temp, catalog, silo) = silo();
        // bytes without a catalog row
        silo.physical_store().unwrap().put("alien", b"x", None).unwrap();
        assert!(matches!(silo.exists("alien"), Err(SiloError::AlienPackage { .. })));
        assert!(matches!(silo.get("alien"), Err(SiloError::AlienPackage { .. })));

        // catalog row without bytes
        silo.put("E1", b"x", None).unwrap();
        silo.physical_store().unwrap().delete("E1").unwrap();
        assert!(matches!(silo.exists("E1"), Err(SiloError::MissingPackage { .. })));

        // bytes back after a delete
        silo.put("E2", b"x", None).unwrap();
        catalog
            .record_delete(silo.key(), "E2", Utc.with_ymd_and_hms(2011, 2, 1, 0, 0, 0).unwrap())
            .unwrap();
        assert_eq!(silo.check("E2").unwrap(), PackageCheck::Ghost);
    }

    #[test]
    fn test_lifecycle_through_catalog() {
        let (_temp, _catalog, silo) = silo();
        assert!(silo.put_allowed().unwrap());
        assert!(!silo.post_allowed().unwrap());

        silo.forbid(Method::Delete).unwrap();
        assert!(!silo.delete_allowed().unwrap());
        silo.set_state(SiloState::DiskIdling).unwrap();
        assert!(!silo.put_allowed().unwrap());
        assert!(silo.get_allowed().unwrap());
        assert!(silo.record().unwrap().forbidden.is_empty());

        assert!(matches!(
            silo.allow(Method::Put),
            Err(SiloError::MethodChange { .. })
        ));
        silo.set_state(SiloState::TapeMaster).unwrap();
        assert!(matches!(
            silo.set_state(SiloState::DiskMaster),
            Err(SiloError::StateChange { .. })
        ));
        assert_eq!(
            silo.allowed_states().unwrap(),
            [SiloState::DiskIdling, SiloState::TapeMaster]
        );

        silo.retire().unwrap();
        assert_eq!(silo.allowed_methods().unwrap().into_iter().collect::<Vec<_>>(), [Method::Get]);
        silo.reactivate().unwrap();
        assert!(silo.delete_allowed().unwrap());
    }

    #[test]
    fn test_paging_newest_first() {
        let temp = TempDir::new().unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2011, 1, 1, 0, 0, 0).unwrap()));
        let silo = DiskSilo::create(catalog, clock.clone(), "host", temp.path()).unwrap();
        for name in ["E1", "E2", "E3", "X1"] {
            silo.put(name, name.as_bytes(), None).unwrap();
            clock.advance(chrono::Duration::hours(1));
        }
        assert_eq!(silo.package_count("").unwrap(), 4);
        assert_eq!(silo.package_count("E").unwrap(), 3);
        assert_eq!(silo.package_names_by_page(1, 2, "E").unwrap(), ["E3", "E2"]);
        assert_eq!(silo.package_names_by_page(2, 2, "E").unwrap(), ["E1"]);
        assert!(silo.package_names_by_page(3, 2, "E").unwrap().is_empty());
    }
}
