//! # silo-catalog
//!
//! Relational-style records for silos, packages, package history and pool
//! reservations, behind a [`Catalog`] trait with two backends:
//!
//! - [`MemoryCatalog`]: mutex-guarded maps, used in tests and one-shot tools
//! - [`LmdbCatalog`]: persistent, every multi-row update in one write
//!   transaction
//!
//! Every operation is atomic on its own. Timestamps are supplied by the
//! caller, normally from a [`Clock`].

mod clock;
mod lmdb;
mod memory;
mod query;
mod records;

pub use clock::{Clock, ManualClock, SystemClock};
pub use lmdb::LmdbCatalog;
pub use memory::MemoryCatalog;
pub use query::{PackageOrder, PackageQuery};
pub use records::{
    Checksums, HistoryAction, HistoryRecord, Media, Method, NewPackage, PackageRecord,
    PackageStatus, ReservedSpace, SiloKey, SiloRecord, SiloState,
};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("silo already registered: {0}")]
    SiloExists(SiloKey),

    #[error("no such silo: {0}")]
    UnknownSilo(SiloKey),

    #[error("no package {name} in silo {silo}")]
    UnknownPackage { silo: SiloKey, name: String },

    #[error("silo {silo} still holds {packages} package records")]
    SiloInUse { silo: SiloKey, packages: usize },

    #[error("invalid catalog value: {0}")]
    Invalid(String),

    #[error("package name is {len} bytes, longer than the {max} allowed")]
    NameTooLong { len: usize, max: usize },

    #[error("catalog corrupted: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Longest package name, in bytes, any backend accepts.
pub const MAX_NAME_LEN: usize = 255;

/// Names must be non-empty, NUL-free and at most [`MAX_NAME_LEN`] bytes.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\0') {
        return Err(CatalogError::Invalid(format!("bad package name: {:?}", name)));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CatalogError::NameTooLong {
            len: name.len(),
            max: MAX_NAME_LEN,
        });
    }
    Ok(())
}

/// Persistent record of silos, packages and reservations.
pub trait Catalog: Send + Sync {
    /// Register a silo with default state. Fails if it already exists.
    fn create_silo(&self, key: &SiloKey) -> Result<SiloRecord>;

    fn lookup_silo(&self, key: &SiloKey) -> Result<Option<SiloRecord>>;

    /// Silos ordered by hostname then filesystem, optionally for one host.
    fn list_silos(&self, hostname: Option<&str>) -> Result<Vec<SiloRecord>>;

    /// Replace the stored state, forbidden set and retired flag.
    fn update_silo(&self, record: &SiloRecord) -> Result<()>;

    /// Drop a silo row. Refused while any package row references it.
    fn remove_silo(&self, key: &SiloKey) -> Result<()>;

    fn lookup_package(&self, silo: &SiloKey, name: &str) -> Result<Option<PackageRecord>>;

    /// Every package row of a silo, deleted ones included, in name order.
    fn all_packages(&self, silo: &SiloKey) -> Result<Vec<PackageRecord>>;

    /// Record a successful put: creates the package row if needed, appends
    /// a `put` event and resets initial and latest checksums.
    fn record_put(&self, silo: &SiloKey, put: &NewPackage, at: DateTime<Utc>) -> Result<PackageRecord>;

    /// Record a fixity check. `None` means the package could not be found.
    fn record_fixity(
        &self,
        silo: &SiloKey,
        name: &str,
        checksums: Option<&Checksums>,
        at: DateTime<Utc>,
    ) -> Result<PackageRecord>;

    /// Record a delete: appends a `delete` event and clears `extant`.
    fn record_delete(&self, silo: &SiloKey, name: &str, at: DateTime<Utc>) -> Result<PackageRecord>;

    /// History of a package in insertion order.
    fn history(&self, silo: &SiloKey, name: &str) -> Result<Vec<HistoryRecord>>;

    fn create_reservation(
        &self,
        partition: &std::path::Path,
        size: u64,
        at: DateTime<Utc>,
    ) -> Result<ReservedSpace>;

    fn list_reservations(&self) -> Result<Vec<ReservedSpace>>;

    /// Remove one reservation. Returns false if it was already gone.
    fn release_reservation(&self, id: u64) -> Result<bool>;

    /// Remove reservations created before `cutoff`, returning how many.
    fn purge_reservations_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn list_packages(&self, silo: &SiloKey, query: &PackageQuery) -> Result<Vec<PackageRecord>> {
        Ok(query.apply(self.all_packages(silo)?))
    }

    fn count_packages(&self, silo: &SiloKey, query: &PackageQuery) -> Result<usize> {
        Ok(query.count(&self.all_packages(silo)?))
    }

    /// Earliest latest-fixity time among extant packages.
    fn oldest_fixity(&self, silo: &SiloKey) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .all_packages(silo)?
            .iter()
            .filter(|p| p.extant)
            .map(|p| p.latest_timestamp)
            .min())
    }
}

/// Package row and history event produced by a put.
pub(crate) fn apply_put(
    silo: &SiloKey,
    put: &NewPackage,
    at: DateTime<Utc>,
) -> (PackageRecord, HistoryRecord) {
    let record = PackageRecord {
        silo: silo.clone(),
        name: put.name.clone(),
        extant: true,
        size: put.size,
        content_type: put.content_type.clone(),
        initial: put.checksums.clone(),
        initial_timestamp: at,
        latest: Some(put.checksums.clone()),
        latest_timestamp: at,
    };
    let event = HistoryRecord {
        action: HistoryAction::Put,
        checksums: Some(put.checksums.clone()),
        timestamp: at,
    };
    (record, event)
}

pub(crate) fn apply_fixity(
    record: &mut PackageRecord,
    checksums: Option<&Checksums>,
    at: DateTime<Utc>,
) -> HistoryRecord {
    record.latest = checksums.cloned();
    record.latest_timestamp = at;
    HistoryRecord {
        action: HistoryAction::Fixity,
        checksums: checksums.cloned(),
        timestamp: at,
    }
}

pub(crate) fn apply_delete(record: &mut PackageRecord, at: DateTime<Utc>) -> HistoryRecord {
    record.extant = false;
    HistoryRecord {
        action: HistoryAction::Delete,
        checksums: None,
        timestamp: at,
    }
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every backend must share, run against each one.

    use super::*;
    use chrono::{Duration, TimeZone};
    use std::path::Path;

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2011, 6, 1, 12, 0, 0).unwrap()
    }

    pub fn put(name: &str, md5: &str) -> NewPackage {
        NewPackage {
            name: name.to_string(),
            size: 42,
            content_type: "application/x-tar".to_string(),
            checksums: Checksums::new(md5, format!("sha1-{}", md5)),
        }
    }

    pub fn silo_lifecycle(catalog: &dyn Catalog) {
        let key = SiloKey::new("Host", "/daitssfs/001/");
        let created = catalog.create_silo(&key).unwrap();
        assert_eq!(created.state, SiloState::DiskMaster);
        assert!(matches!(
            catalog.create_silo(&key),
            Err(CatalogError::SiloExists(_))
        ));

        let mut rec = catalog.lookup_silo(&SiloKey::new("host", "/daitssfs/001")).unwrap().unwrap();
        rec.state = SiloState::DiskIdling;
        rec.retired = true;
        catalog.update_silo(&rec).unwrap();
        assert_eq!(catalog.lookup_silo(&key).unwrap().unwrap(), rec);

        let missing = SiloRecord::new(SiloKey::new("host", "/nowhere"));
        assert!(matches!(
            catalog.update_silo(&missing),
            Err(CatalogError::UnknownSilo(_))
        ));
    }

    pub fn silo_listing_order(catalog: &dyn Catalog) {
        for (h, fs) in [("b", "/2"), ("a", "/9"), ("b", "/1"), ("a", "/10")] {
            catalog.create_silo(&SiloKey::new(h, fs)).unwrap();
        }
        let all: Vec<String> = catalog
            .list_silos(None)
            .unwrap()
            .iter()
            .map(|s| s.key.to_string())
            .collect();
        assert_eq!(all, ["a:/10", "a:/9", "b:/1", "b:/2"]);

        let b = catalog.list_silos(Some("B")).unwrap();
        assert_eq!(b.len(), 2);
    }

    pub fn put_fixity_delete(catalog: &dyn Catalog) {
        let key = SiloKey::new("h", "/s");
        catalog.create_silo(&key).unwrap();

        let rec = catalog.record_put(&key, &put("E1", "aaa"), t0()).unwrap();
        assert!(rec.extant);
        assert_eq!(rec.status(), PackageStatus::Ok);

        let later = t0() + Duration::days(1);
        let bad = Checksums::new("bbb", "sha1-bbb");
        let rec = catalog.record_fixity(&key, "E1", Some(&bad), later).unwrap();
        assert_eq!(rec.status(), PackageStatus::Fail);
        assert_eq!(rec.latest_timestamp, later);

        let rec = catalog.record_fixity(&key, "E1", None, later).unwrap();
        assert_eq!(rec.status(), PackageStatus::Missing);

        let rec = catalog.record_delete(&key, "E1", later).unwrap();
        assert!(!rec.extant);

        let actions: Vec<HistoryAction> = catalog
            .history(&key, "E1")
            .unwrap()
            .iter()
            .map(|h| h.action)
            .collect();
        assert_eq!(
            actions,
            [
                HistoryAction::Put,
                HistoryAction::Fixity,
                HistoryAction::Fixity,
                HistoryAction::Delete
            ]
        );

        assert!(matches!(
            catalog.record_fixity(&key, "nope", None, later),
            Err(CatalogError::UnknownPackage { .. })
        ));
        assert!(matches!(
            catalog.record_put(&SiloKey::new("h", "/other"), &put("E1", "a"), t0()),
            Err(CatalogError::UnknownSilo(_))
        ));
    }

    pub fn reput_after_delete(catalog: &dyn Catalog) {
        let key = SiloKey::new("h", "/s");
        catalog.create_silo(&key).unwrap();
        catalog.record_put(&key, &put("E1", "v1"), t0()).unwrap();
        catalog.record_delete(&key, "E1", t0()).unwrap();

        let again = t0() + Duration::hours(1);
        let rec = catalog.record_put(&key, &put("E1", "v2"), again).unwrap();
        assert!(rec.extant);
        assert_eq!(rec.initial.md5, "v2");
        assert_eq!(rec.initial_timestamp, again);
        assert_eq!(catalog.history(&key, "E1").unwrap().len(), 3);
    }

    pub fn package_queries(catalog: &dyn Catalog) {
        let key = SiloKey::new("h", "/s");
        let other = SiloKey::new("h", "/s2");
        catalog.create_silo(&key).unwrap();
        catalog.create_silo(&other).unwrap();
        for (i, name) in ["E3", "E1", "E10", "E2"].iter().enumerate() {
            catalog
                .record_put(&key, &put(name, "m"), t0() + Duration::minutes(i as i64))
                .unwrap();
        }
        catalog.record_put(&other, &put("E1", "m"), t0()).unwrap();
        catalog.record_delete(&key, "E2", t0()).unwrap();

        let names: Vec<String> = catalog
            .list_packages(&key, &PackageQuery::new())
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["E1", "E10", "E2", "E3"]);

        assert_eq!(catalog.count_packages(&key, &PackageQuery::extant_only()).unwrap(), 3);
        let newest: Vec<String> = catalog
            .list_packages(
                &key,
                &PackageQuery::extant_only()
                    .order(PackageOrder::InitialTimestampDesc)
                    .page(1, 2),
            )
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(newest, ["E10", "E1"]);

        assert_eq!(catalog.oldest_fixity(&key).unwrap(), Some(t0()));
        assert!(matches!(
            catalog.remove_silo(&key),
            Err(CatalogError::SiloInUse { packages: 4, .. })
        ));
    }

    pub fn reservations(catalog: &dyn Catalog) {
        let p1 = Path::new("/part1");
        let a = catalog.create_reservation(p1, 100, t0()).unwrap();
        let b = catalog
            .create_reservation(Path::new("/part2"), 50, t0() + Duration::hours(4))
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(catalog.list_reservations().unwrap().len(), 2);

        let purged = catalog
            .purge_reservations_before(t0() + Duration::hours(1))
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(catalog.list_reservations().unwrap(), vec![b.clone()]);

        assert!(catalog.release_reservation(b.id).unwrap());
        assert!(!catalog.release_reservation(b.id).unwrap());
        assert!(catalog.list_reservations().unwrap().is_empty());
    }

    pub fn empty_silo_removal(catalog: &dyn Catalog) {
        let key = SiloKey::new("h", "/empty");
        catalog.create_silo(&key).unwrap();
        catalog.remove_silo(&key).unwrap();
        assert!(catalog.lookup_silo(&key).unwrap().is_none());
    }

    pub fn name_limits(catalog: &dyn Catalog) {
        let deep = format!("/{}", "d".repeat(1200));
        let key = SiloKey::new("h", &deep);
        catalog.create_silo(&key).unwrap();
        assert_eq!(catalog.lookup_silo(&key).unwrap().unwrap().key, key);

        let longest = "E".repeat(MAX_NAME_LEN);
        catalog.record_put(&key, &put(&longest, "a"), t0()).unwrap();
        assert!(catalog.lookup_package(&key, &longest).unwrap().is_some());
        assert_eq!(catalog.history(&key, &longest).unwrap().len(), 1);

        let too_long = "E".repeat(600);
        let err = catalog.record_put(&key, &put(&too_long, "a"), t0()).unwrap_err();
        assert!(matches!(err, CatalogError::NameTooLong { len: 600, max: MAX_NAME_LEN }));
        assert!(matches!(
            catalog.record_put(&key, &put("bad\0name", "a"), t0()),
            Err(CatalogError::Invalid(_))
        ));
        assert!(matches!(
            catalog.record_put(&key, &put("", "a"), t0()),
            Err(CatalogError::Invalid(_))
        ));
        assert_eq!(catalog.all_packages(&key).unwrap().len(), 1);
    }
}
