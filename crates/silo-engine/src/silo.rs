//! Surface shared by disk and tape silos.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use silo_catalog::{
    Catalog, Checksums, Media, Method, PackageOrder, PackageQuery, PackageRecord, SiloKey, SiloRecord,
    SiloState,
};
use silo_config::log_silo_info;

use crate::lifecycle::{self, DirectoryStatus};
use crate::reconcile::{classify, CatalogState, FixitySource, Outcome};
use crate::report::{self, FixityReport};
use crate::{Result, SiloError};

/// Tagged result of an existence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageCheck {
    /// Stored and cataloged as extant
    Present,
    /// Neither stored nor expected
    Absent,
    /// Stored but unknown to the catalog
    Alien,
    /// Stored but cataloged as deleted
    Ghost,
    /// Cataloged as extant but not stored
    Missing,
}

impl PackageCheck {
    pub fn of(present: bool, catalog: CatalogState) -> Self {
        match classify(present, catalog) {
            Outcome::Ok if present => PackageCheck::Present,
            Outcome::Ok => PackageCheck::Absent,
            Outcome::Ghost => PackageCheck::Ghost,
            Outcome::Alien => PackageCheck::Alien,
            Outcome::Missing => PackageCheck::Missing,
        }
    }

    /// The boolean answer, or the consistency error for an incident.
    pub fn into_result(self, silo: &SiloKey, name: &str) -> Result<bool> {
        let silo = silo.clone();
        let name = name.to_string();
        match self {
            PackageCheck::Present => Ok(true),
            PackageCheck::Absent => Ok(false),
            PackageCheck::Alien => Err(SiloError::AlienPackage { silo, name }),
            PackageCheck::Ghost => Err(SiloError::GhostPackage { silo, name }),
            PackageCheck::Missing => Err(SiloError::MissingPackage { silo, name }),
        }
    }
}

/// Catalog view of one package name.
pub(crate) fn catalog_state(catalog: &dyn Catalog, silo: &SiloKey, name: &str) -> Result<CatalogState> {
    Ok(match catalog.lookup_package(silo, name)? {
        Some(p) if p.extant => CatalogState::Extant,
        Some(_) => CatalogState::Deleted,
        None => CatalogState::Unknown,
    })
}

/// A directory of packages together with its catalog rows.
///
/// Lifecycle, permission and reporting methods are provided on top of the
/// storage methods each silo kind implements. State is always re-read from
/// the catalog, so several handles on one silo stay consistent.
pub trait Silo: Send + Sync {
    fn key(&self) -> &SiloKey;

    fn catalog(&self) -> &dyn Catalog;

    /// Package bytes, or `None` when the package is not stored here.
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;

    fn open(&self, name: &str) -> Result<Option<File>>;

    /// Local path of the package bytes, retrieving them first if needed.
    fn data_path(&self, name: &str) -> Result<PathBuf>;

    fn put(&self, name: &str, data: &[u8], content_type: Option<&str>) -> Result<PackageRecord>;

    fn delete(&self, name: &str) -> Result<()>;

    fn check(&self, name: &str) -> Result<PackageCheck>;

    /// Recompute the checksums of the stored bytes.
    fn fixity(&self, name: &str) -> Result<Checksums>;

    /// Bytes free for new packages.
    fn available_space(&self) -> u64;

    /// This silo as a source for fixity verification.
    fn fixity_source(&self) -> &dyn FixitySource;

    fn exists(&self, name: &str) -> Result<bool> {
        self.check(name)?.into_result(self.key(), name)
    }

    /// Names of extant packages, in name order.
    fn names(&self) -> Result<Vec<String>> {
        Ok(self
            .catalog()
            .list_packages(self.key(), &PackageQuery::extant_only())?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }

    /// Catalog row of an extant package.
    fn package(&self, name: &str) -> Result<PackageRecord> {
        match self.catalog().lookup_package(self.key(), name)? {
            Some(p) if p.extant => Ok(p),
            Some(_) => Err(SiloError::PackageDeleted {
                silo: self.key().clone(),
                name: name.to_string(),
            }),
            None => Err(SiloError::PackageNotFound {
                silo: self.key().clone(),
                name: name.to_string(),
            }),
        }
    }

    fn record(&self) -> Result<SiloRecord> {
        self.catalog()
            .lookup_silo(self.key())?
            .ok_or_else(|| SiloError::UnknownSilo(self.key().clone()))
    }

    fn state(&self) -> Result<SiloState> {
        Ok(self.record()?.state)
    }

    fn media(&self) -> Result<Media> {
        Ok(self.record()?.media())
    }

    fn directory_status(&self) -> DirectoryStatus {
        DirectoryStatus::probe(&self.key().filesystem)
    }

    fn allowed_states(&self) -> Result<Vec<SiloState>> {
        Ok(lifecycle::allowed_states(self.state()?, self.directory_status()))
    }

    fn set_state(&self, to: SiloState) -> Result<()> {
        let mut record = self.record()?;
        let from = record.state;
        if lifecycle::change_state(&mut record, to, self.directory_status())? {
            self.catalog().update_silo(&record)?;
            let silo = self.key().to_string();
            log_silo_info!(
                "state changed",
                silo = silo.as_str(),
                from = from.as_str(),
                to = to.as_str()
            );
        }
        Ok(())
    }

    fn allow(&self, method: Method) -> Result<()> {
        let mut record = self.record()?;
        lifecycle::allow(&mut record, method)?;
        self.catalog().update_silo(&record)?;
        Ok(())
    }

    fn forbid(&self, method: Method) -> Result<()> {
        let mut record = self.record()?;
        lifecycle::forbid(&mut record, method);
        self.catalog().update_silo(&record)?;
        Ok(())
    }

    fn retire(&self) -> Result<()> {
        let mut record = self.record()?;
        record.retired = true;
        self.catalog().update_silo(&record)?;
        Ok(())
    }

    fn reactivate(&self) -> Result<()> {
        let mut record = self.record()?;
        record.retired = false;
        self.catalog().update_silo(&record)?;
        Ok(())
    }

    fn allowed_methods(&self) -> Result<BTreeSet<Method>> {
        Ok(lifecycle::effective_methods(&self.record()?))
    }

    fn get_allowed(&self) -> Result<bool> {
        Ok(self.allowed_methods()?.contains(&Method::Get))
    }

    fn put_allowed(&self) -> Result<bool> {
        Ok(self.allowed_methods()?.contains(&Method::Put))
    }

    fn delete_allowed(&self) -> Result<bool> {
        Ok(self.allowed_methods()?.contains(&Method::Delete))
    }

    fn post_allowed(&self) -> Result<bool> {
        Ok(self.allowed_methods()?.contains(&Method::Post))
    }

    /// Extant packages whose name contains `search` (all when empty).
    fn package_count(&self, search: &str) -> Result<usize> {
        let query = PackageQuery::extant_only().name_contains(search);
        Ok(self.catalog().count_packages(self.key(), &query)?)
    }

    /// One page of extant package names, newest put first.
    fn package_names_by_page(&self, page: usize, per_page: usize, search: &str) -> Result<Vec<String>> {
        let query = PackageQuery::extant_only()
            .name_contains(search)
            .order(PackageOrder::InitialTimestampDesc)
            .page(page, per_page);
        Ok(self
            .catalog()
            .list_packages(self.key(), &query)?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }

    /// History of one package, or the latest state of every extant one.
    fn fixity_report(&self, name: Option<&str>) -> Result<FixityReport> {
        match name {
            Some(name) => Ok(FixityReport::Package(report::package_report(
                self.catalog(),
                self.key(),
                name,
            )?)),
            None => Ok(FixityReport::Silo(report::silo_report(self.catalog(), self.key())?)),
        }
    }

    fn oldest_fixity(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.catalog().oldest_fixity(self.key())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_table() {
        use CatalogState::*;
        assert_eq!(PackageCheck::of(true, Extant), PackageCheck::Present);
        assert_eq!(PackageCheck::of(true, Deleted), PackageCheck::Ghost);
        assert_eq!(PackageCheck::of(true, Unknown), PackageCheck::Alien);
        assert_eq!(PackageCheck::of(false, Extant), PackageCheck::Missing);
        assert_eq!(PackageCheck::of(false, Deleted), PackageCheck::Absent);
        assert_eq!(PackageCheck::of(false, Unknown), PackageCheck::Absent);
    }

    #[test]
    fn test_incidents_become_errors() {
        let key = SiloKey::new("h", "/s");
        assert!(PackageCheck::Present.into_result(&key, "E1").unwrap());
        assert!(!PackageCheck::Absent.into_result(&key, "E1").unwrap());
        assert!(matches!(
            PackageCheck::Ghost.into_result(&key, "E1"),
            Err(SiloError::GhostPackage { .. })
        ));
        assert!(matches!(
            PackageCheck::Missing.into_result(&key, "E1"),
            Err(SiloError::MissingPackage { .. })
        ));
    }
}
