//! Fixity reports built from catalog rows and package history.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use silo_catalog::{Catalog, Checksums, HistoryAction, PackageQuery, PackageRecord, PackageStatus, SiloKey};

use crate::Result;

/// One entry in a package's fixity history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixityEvent {
    pub action: HistoryAction,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub time: DateTime<Utc>,
    pub status: PackageStatus,
}

/// Fixity checks of one package since it was last stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageFixityReport {
    pub silo: String,
    pub name: String,
    pub extant: bool,
    pub fixity_check_count: usize,
    pub first_fixity_check: Option<DateTime<Utc>>,
    pub last_fixity_check: Option<DateTime<Utc>>,
    pub fixity_checks: Vec<FixityEvent>,
}

/// Latest state of one extant package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageFixityLine {
    pub name: String,
    pub size: u64,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub status: PackageStatus,
    pub time: DateTime<Utc>,
}

impl From<&PackageRecord> for PackageFixityLine {
    fn from(p: &PackageRecord) -> Self {
        Self {
            name: p.name.clone(),
            size: p.size,
            md5: p.latest.as_ref().map(|c| c.md5.clone()),
            sha1: p.latest.as_ref().map(|c| c.sha1.clone()),
            status: p.status(),
            time: p.latest_timestamp,
        }
    }
}

/// Latest fixity of every extant package in a silo
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiloFixityReport {
    pub silo: String,
    pub hostname: String,
    pub filesystem: String,
    pub package_count: usize,
    pub first_fixity_check: Option<DateTime<Utc>>,
    pub last_fixity_check: Option<DateTime<Utc>>,
    pub fixity_checks: Vec<PackageFixityLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FixityReport {
    Package(Option<PackageFixityReport>),
    Silo(SiloFixityReport),
}

/// Replay a package's history into its current run of fixity checks.
///
/// A put starts a new run with itself as the first check; a delete empties
/// it. `None` if the silo has never held the package.
pub fn package_report(catalog: &dyn Catalog, silo: &SiloKey, name: &str) -> Result<Option<PackageFixityReport>> {
    let Some(package) = catalog.lookup_package(silo, name)? else {
        return Ok(None);
    };
    let history = catalog.history(silo, name)?;

    let mut checks: Vec<FixityEvent> = Vec::new();
    let mut initial: Option<Checksums> = None;
    for event in &history {
        match event.action {
            HistoryAction::Put => {
                initial = event.checksums.clone();
                checks.clear();
                checks.push(FixityEvent::new(
                    event.action,
                    event.checksums.as_ref(),
                    event.timestamp,
                    PackageStatus::Ok,
                ));
            }
            HistoryAction::Fixity => {
                let status = match &initial {
                    Some(initial) => PackageStatus::compare(initial, event.checksums.as_ref()),
                    None if event.checksums.is_none() => PackageStatus::Missing,
                    None => PackageStatus::Fail,
                };
                checks.push(FixityEvent::new(
                    event.action,
                    event.checksums.as_ref(),
                    event.timestamp,
                    status,
                ));
            }
            HistoryAction::Delete => checks.clear(),
        }
    }

    Ok(Some(PackageFixityReport {
        silo: silo.to_string(),
        name: name.to_string(),
        extant: package.extant,
        fixity_check_count: checks.len(),
        first_fixity_check: history.iter().map(|h| h.timestamp).min(),
        last_fixity_check: history.iter().map(|h| h.timestamp).max(),
        fixity_checks: checks,
    }))
}

impl FixityEvent {
    fn new(action: HistoryAction, checksums: Option<&Checksums>, time: DateTime<Utc>, status: PackageStatus) -> Self {
        Self {
            action,
            md5: checksums.map(|c| c.md5.clone()),
            sha1: checksums.map(|c| c.sha1.clone()),
            time,
            status,
        }
    }
}

pub fn silo_report(catalog: &dyn Catalog, silo: &SiloKey) -> Result<SiloFixityReport> {
    let packages = catalog.list_packages(silo, &PackageQuery::extant_only())?;
    let lines: Vec<PackageFixityLine> = packages.iter().map(PackageFixityLine::from).collect();
    Ok(SiloFixityReport {
        silo: silo.to_string(),
        hostname: silo.hostname.clone(),
        filesystem: silo.filesystem.display().to_string(),
        package_count: lines.len(),
        first_fixity_check: lines.iter().map(|l| l.time).min(),
        last_fixity_check: lines.iter().map(|l| l.time).max(),
        fixity_checks: lines,
    })
}

/// Pool-wide summary for one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolFixitySummary {
    pub hostname: String,
    pub package_count: usize,
    pub earliest_fixity_check: Option<DateTime<Utc>>,
    pub latest_fixity_check: Option<DateTime<Utc>>,
    pub stored_before: Option<DateTime<Utc>>,
}

/// One package in a pool-wide listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolFixityLine {
    pub name: String,
    pub location: String,
    pub size: u64,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub status: PackageStatus,
    pub fixity_time: DateTime<Utc>,
    pub stored_time: DateTime<Utc>,
}

/// Fixity across every active silo of a host.
pub struct PoolFixity<'a> {
    catalog: &'a dyn Catalog,
    hostname: String,
}

impl<'a> PoolFixity<'a> {
    pub fn new(catalog: &'a dyn Catalog, hostname: &str) -> Self {
        Self {
            catalog,
            hostname: hostname.to_lowercase(),
        }
    }

    /// Extant packages on non-retired silos, optionally only those stored
    /// before `stored_before`, ordered by name then location.
    pub fn list(&self, stored_before: Option<DateTime<Utc>>) -> Result<Vec<PoolFixityLine>> {
        let mut lines = Vec::new();
        for silo in self.catalog.list_silos(Some(&self.hostname))? {
            if silo.retired {
                continue;
            }
            let location = silo.key.short_name();
            for p in self.catalog.list_packages(&silo.key, &PackageQuery::extant_only())? {
                if stored_before.is_some_and(|cutoff| p.initial_timestamp >= cutoff) {
                    continue;
                }
                let line = PackageFixityLine::from(&p);
                lines.push(PoolFixityLine {
                    name: line.name,
                    location: location.clone(),
                    size: if line.status == PackageStatus::Missing { 0 } else { line.size },
                    md5: line.md5,
                    sha1: line.sha1,
                    status: line.status,
                    fixity_time: line.time,
                    stored_time: p.initial_timestamp,
                });
            }
        }
        lines.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.location.cmp(&b.location)));
        Ok(lines)
    }

    pub fn summary(&self, stored_before: Option<DateTime<Utc>>) -> Result<PoolFixitySummary> {
        let lines = self.list(stored_before)?;
        Ok(PoolFixitySummary {
            hostname: self.hostname.clone(),
            package_count: lines.len(),
            earliest_fixity_check: lines.iter().map(|l| l.fixity_time).min(),
            latest_fixity_check: lines.iter().map(|l| l.fixity_time).max(),
            stored_before,
        })
    }
}

fn quoted(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// CSV with a header row; every field quoted.
pub fn to_csv(lines: &[PoolFixityLine]) -> String {
    let mut out = String::from("\"name\",\"location\",\"sha1\",\"md5\",\"size\",\"fixity_time\",\"status\"\n");
    for l in lines {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{}",
            quoted(&l.name),
            quoted(&l.location),
            quoted(l.sha1.as_deref().unwrap_or("")),
            quoted(l.md5.as_deref().unwrap_or("")),
            quoted(&l.size.to_string()),
            quoted(&l.fixity_time.to_rfc3339()),
            quoted(l.status.as_str()),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use silo_catalog::{MemoryCatalog, NewPackage};

    fn t(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2011, 1, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    fn new(name: &str, md5: &str) -> NewPackage {
        NewPackage {
            name: name.to_string(),
            size: 10,
            content_type: "application/x-tar".to_string(),
            checksums: Checksums::new(md5, "sha"),
        }
    }

    #[test]
    fn test_package_report_replays_history() {
        let catalog = MemoryCatalog::new();
        let key = SiloKey::new("h", "/s/001");
        catalog.create_silo(&key).unwrap();

        assert!(package_report(&catalog, &key, "E1").unwrap().is_none());

        catalog.record_put(&key, &new("E1", "a"), t(0)).unwrap();
        catalog.record_fixity(&key, "E1", Some(&Checksums::new("a", "sha")), t(1)).unwrap();
        catalog.record_fixity(&key, "E1", Some(&Checksums::new("b", "sha")), t(2)).unwrap();
        catalog.record_fixity(&key, "E1", None, t(3)).unwrap();

        let report = package_report(&catalog, &key, "E1").unwrap().unwrap();
        let statuses: Vec<_> = report.fixity_checks.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            [PackageStatus::Ok, PackageStatus::Ok, PackageStatus::Fail, PackageStatus::Missing]
        );
        assert_eq!(report.fixity_check_count, 4);
        assert_eq!(report.first_fixity_check, Some(t(0)));
        assert_eq!(report.last_fixity_check, Some(t(3)));

        catalog.record_delete(&key, "E1", t(4)).unwrap();
        let report = package_report(&catalog, &key, "E1").unwrap().unwrap();
        assert_eq!(report.fixity_check_count, 0);
        assert!(!report.extant);

        catalog.record_put(&key, &new("E1", "c"), t(5)).unwrap();
        let report = package_report(&catalog, &key, "E1").unwrap().unwrap();
        assert_eq!(report.fixity_check_count, 1);
        assert_eq!(report.fixity_checks[0].md5.as_deref(), Some("c"));
        assert_eq!(report.last_fixity_check, Some(t(5)));
    }

    #[test]
    fn test_silo_report_covers_extant_packages() {
        let catalog = MemoryCatalog::new();
        let key = SiloKey::new("h", "/s/001");
        catalog.create_silo(&key).unwrap();
        catalog.record_put(&key, &new("E1", "a"), t(0)).unwrap();
        catalog.record_put(&key, &new("E2", "a"), t(1)).unwrap();
        catalog.record_put(&key, &new("E3", "a"), t(2)).unwrap();
        catalog.record_delete(&key, "E3", t(3)).unwrap();
        catalog.record_fixity(&key, "E2", None, t(4)).unwrap();

        let report = silo_report(&catalog, &key).unwrap();
        assert_eq!(report.package_count, 2);
        assert_eq!(report.first_fixity_check, Some(t(0)));
        assert_eq!(report.last_fixity_check, Some(t(4)));
        assert_eq!(report.fixity_checks[1].status, PackageStatus::Missing);
        assert!(report.fixity_checks[1].md5.is_none());
    }

    #[test]
    fn test_pool_fixity_skips_retired_and_filters_by_store_time() {
        let catalog = MemoryCatalog::new();
        let a = SiloKey::new("h", "/pool/001");
        let b = SiloKey::new("h", "/pool/002");
        let other = SiloKey::new("elsewhere", "/pool/003");
        for key in [&a, &b, &other] {
            catalog.create_silo(key).unwrap();
        }
        catalog.record_put(&a, &new("E1", "a"), t(0)).unwrap();
        catalog.record_put(&a, &new("E2", "a"), t(5)).unwrap();
        catalog.record_put(&b, &new("E3", "a"), t(1)).unwrap();
        catalog.record_put(&other, &new("E4", "a"), t(1)).unwrap();
        catalog.record_fixity(&b, "E3", None, t(6)).unwrap();

        let pool = PoolFixity::new(&catalog, "H");
        let all = pool.list(None).unwrap();
        let names: Vec<_> = all.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["E1", "E2", "E3"]);
        assert_eq!(all[2].size, 0);

        let early = pool.summary(Some(t(2))).unwrap();
        assert_eq!(early.package_count, 2);
        assert_eq!(early.latest_fixity_check, Some(t(6)));

        let mut rec = catalog.lookup_silo(&b).unwrap().unwrap();
        rec.retired = true;
        catalog.update_silo(&rec).unwrap();
        assert_eq!(pool.list(None).unwrap().len(), 2);
    }

    #[test]
    fn test_csv_quotes_fields() {
        let line = PoolFixityLine {
            name: "E\"1".to_string(),
            location: "001".to_string(),
            size: 0,
            md5: None,
            sha1: None,
            status: PackageStatus::Missing,
            fixity_time: t(0),
            stored_time: t(0),
        };
        let csv = to_csv(&[line]);
        let mut rows = csv.lines();
        assert_eq!(
            rows.next().unwrap(),
            "\"name\",\"location\",\"sha1\",\"md5\",\"size\",\"fixity_time\",\"status\""
        );
        assert_eq!(
            rows.next().unwrap(),
            "\"E\"\"1\",\"001\",\"\",\"\",\"0\",\"2011-01-01T00:00:00+00:00\",\"missing\""
        );
    }
}
