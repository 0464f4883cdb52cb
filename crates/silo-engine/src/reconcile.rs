//! Fixity reconciliation between a silo's directory and its catalog rows.
//!
//! [`FixityReconciler::reconcile`] diffs the two sorted name streams and
//! classifies every name:
//!
//! | on disk | catalog  | outcome |
//! |---------|----------|---------|
//! | yes     | extant   | ok      |
//! | yes     | deleted  | ghost   |
//! | yes     | unknown  | alien   |
//! | no      | extant   | missing |
//! | no      | deleted  | ok      |
//! | no      | unknown  | ok      |
//!
//! Missing packages get a fixity event with no checksums. Ghosts and aliens
//! are only reported. [`FixityReconciler::verify`] is the separate full
//! content pass.

use std::sync::Arc;

use serde::Serialize;

use silo_catalog::{Catalog, Checksums, Clock, PackageQuery, PackageRecord, PackageStatus, SiloKey};
use silo_config::logging::name_slices;
use silo_config::{log_fixity_error, log_fixity_info, log_fixity_warn, FixityConfig, GhostPolicy};
use silo_store::{ContentStore, StoreError};

use crate::diff::{MergeDiff, SortedStream};
use crate::{Result, SiloError};

/// Catalog view of one name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogState {
    Extant,
    Deleted,
    Unknown,
}

impl From<Option<bool>> for CatalogState {
    fn from(extant: Option<bool>) -> Self {
        match extant {
            Some(true) => CatalogState::Extant,
            Some(false) => CatalogState::Deleted,
            None => CatalogState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Ghost,
    Alien,
    Missing,
}

pub fn classify(present: bool, catalog: CatalogState) -> Outcome {
    match (present, catalog) {
        (true, CatalogState::Extant) => Outcome::Ok,
        (true, CatalogState::Deleted) => Outcome::Ghost,
        (true, CatalogState::Unknown) => Outcome::Alien,
        (false, CatalogState::Extant) => Outcome::Missing,
        (false, CatalogState::Deleted) | (false, CatalogState::Unknown) => Outcome::Ok,
    }
}

/// Incidents found by one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub silo: String,
    /// Distinct names seen on either side
    pub examined: usize,
    pub ghosts: Vec<String>,
    pub aliens: Vec<String>,
    pub missing: Vec<String>,
    /// Ghosts not counted as incidents under [`GhostPolicy::Benign`]
    pub tolerated_ghosts: Vec<String>,
    /// Missing packages whose fixity event the catalog refused
    pub unrecorded: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.ghosts.is_empty() && self.aliens.is_empty() && self.missing.is_empty()
    }
}

/// One package that failed content verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyFailure {
    pub name: String,
    pub reasons: Vec<String>,
}

/// Outcome of a full content pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub silo: String,
    pub checked: usize,
    pub failures: Vec<VerifyFailure>,
    pub success: bool,
}

/// Something package bytes can be re-read from for checksumming.
pub trait FixitySource {
    /// MD5 and SHA1 of the bytes as they are now.
    fn checksums(&self, name: &str) -> Result<Checksums>;

    /// Checksums stored beside the bytes, when the source keeps them.
    fn recorded_checksums(&self, _name: &str) -> Result<Option<Checksums>> {
        Ok(None)
    }
}

impl FixitySource for ContentStore {
    fn checksums(&self, name: &str) -> Result<Checksums> {
        let (md5, sha1) = self.compute_checksums(name)?;
        Ok(Checksums::new(md5, sha1))
    }

    fn recorded_checksums(&self, name: &str) -> Result<Option<Checksums>> {
        match (self.md5(name), self.sha1(name)) {
            (Ok(md5), Ok(sha1)) => Ok(Some(Checksums::new(md5, sha1))),
            (Err(StoreError::NotFound { .. }), _) | (_, Err(StoreError::NotFound { .. })) => Ok(None),
            (Err(e), _) | (_, Err(e)) => Err(e.into()),
        }
    }
}

fn fatal(context: String, err: impl std::fmt::Display) -> SiloError {
    SiloError::FatalFixity(format!("{}: {}", context, err))
}

/// Runs reconciliation and verification passes for one silo at a time.
pub struct FixityReconciler {
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    ghost_policy: GhostPolicy,
}

impl FixityReconciler {
    pub fn new(catalog: Arc<dyn Catalog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            catalog,
            clock,
            ghost_policy: GhostPolicy::default(),
        }
    }

    pub fn from_config(catalog: Arc<dyn Catalog>, clock: Arc<dyn Clock>, config: &FixityConfig) -> Self {
        Self::new(catalog, clock).with_ghost_policy(config.ghost_policy)
    }

    pub fn with_ghost_policy(mut self, policy: GhostPolicy) -> Self {
        self.ghost_policy = policy;
        self
    }

    /// Diff a silo's directory against its catalog rows.
    pub fn reconcile(&self, silo: &SiloKey, physical: &ContentStore) -> Result<ReconcileReport> {
        let mut names = physical
            .names()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| fatal(format!("cannot enumerate {}", physical.root().display()), e))?;
        names.sort();
        let rows = self
            .catalog
            .all_packages(silo)
            .map_err(|e| fatal(format!("cannot list packages of {}", silo), e))?;
        self.reconcile_streams(silo, names, rows)
    }

    /// Diff already-gathered snapshots: sorted physical names and the
    /// silo's catalog rows in name order.
    pub fn reconcile_streams<P>(
        &self,
        silo: &SiloKey,
        physical: P,
        rows: Vec<PackageRecord>,
    ) -> Result<ReconcileReport>
    where
        P: IntoIterator<Item = String>,
    {
        let mut report = ReconcileReport {
            silo: silo.to_string(),
            ..Default::default()
        };

        let on_disk = SortedStream::new(physical.into_iter().map(|name| (name, ())));
        let cataloged = SortedStream::new(rows.into_iter().map(|row| (row.name, row.extant)));

        for item in MergeDiff::new(on_disk, cataloged) {
            let (name, present, extant) = item.map_err(|e| fatal(format!("diff of {}", silo), e))?;
            report.examined += 1;
            match classify(present.is_some(), CatalogState::from(extant)) {
                Outcome::Ok => {}
                Outcome::Alien => report.aliens.push(name),
                Outcome::Ghost => match self.ghost_policy {
                    GhostPolicy::Incident => report.ghosts.push(name),
                    GhostPolicy::Benign => report.tolerated_ghosts.push(name),
                },
                Outcome::Missing => {
                    if let Err(e) = self.catalog.record_fixity(silo, &name, None, self.clock.now()) {
                        let reason = e.to_string();
                        log_fixity_warn!(
                            "could not record missing package",
                            silo = report.silo.as_str(),
                            package = name.as_str(),
                            error = reason.as_str()
                        );
                        report.unrecorded.push(name.clone());
                    }
                    report.missing.push(name);
                }
            }
        }

        log_incidents(&report.silo, "ghost", &report.ghosts);
        log_incidents(&report.silo, "alien", &report.aliens);
        log_incidents(&report.silo, "missing", &report.missing);
        log_fixity_info!(
            "reconciliation finished",
            silo = report.silo.as_str(),
            examined = report.examined,
            ghosts = report.ghosts.len(),
            aliens = report.aliens.len(),
            missing = report.missing.len(),
            tolerated_ghosts = report.tolerated_ghosts.len(),
            unrecorded = report.unrecorded.len()
        );
        Ok(report)
    }

    /// Recompute checksums of every extant package and record the results.
    ///
    /// A package that cannot be read or does not match is a failure in the
    /// report; the pass goes on. Failing to list the catalog or to retrieve
    /// from tape aborts it.
    pub fn verify(&self, silo: &SiloKey, source: &dyn FixitySource) -> Result<VerifyReport> {
        let rows = self
            .catalog
            .list_packages(silo, &PackageQuery::extant_only())
            .map_err(|e| fatal(format!("cannot list packages of {}", silo), e))?;

        let mut report = VerifyReport {
            silo: silo.to_string(),
            ..Default::default()
        };

        for row in &rows {
            report.checked += 1;
            let reasons = self.verify_one(silo, row, source)?;
            if !reasons.is_empty() {
                let joined = reasons.join("; ");
                log_fixity_error!(
                    "fixity failure",
                    silo = report.silo.as_str(),
                    package = row.name.as_str(),
                    reasons = joined.as_str()
                );
                report.failures.push(VerifyFailure {
                    name: row.name.clone(),
                    reasons,
                });
            }
        }

        report.success = report.failures.is_empty();
        log_fixity_info!(
            "verification finished",
            silo = report.silo.as_str(),
            checked = report.checked,
            failures = report.failures.len()
        );
        Ok(report)
    }

    fn verify_one(&self, silo: &SiloKey, row: &PackageRecord, source: &dyn FixitySource) -> Result<Vec<String>> {
        let observed = match source.checksums(&row.name) {
            Ok(observed) => observed,
            Err(e @ (SiloError::FatalFixity(_) | SiloError::TapeRetrieval { .. })) => return Err(e),
            Err(e) => return Ok(vec![format!("cannot read package: {}", e)]),
        };

        let mut reasons = Vec::new();
        if let Err(e) = self
            .catalog
            .record_fixity(silo, &row.name, Some(&observed), self.clock.now())
        {
            reasons.push(format!("cannot record fixity: {}", e));
        }
        if PackageStatus::compare(&row.initial, Some(&observed)) != PackageStatus::Ok {
            mismatches("catalog", &row.initial, &observed, &mut reasons);
        }
        match source.recorded_checksums(&row.name) {
            Ok(Some(recorded)) => mismatches("sidecar", &recorded, &observed, &mut reasons),
            Ok(None) => {}
            Err(e) => reasons.push(format!("cannot read sidecar checksums: {}", e)),
        }
        Ok(reasons)
    }
}

fn mismatches(against: &str, expected: &Checksums, actual: &Checksums, reasons: &mut Vec<String>) {
    if !expected.md5.eq_ignore_ascii_case(&actual.md5) {
        reasons.push(format!(
            "{} md5 mismatch - expected {} but got {}",
            against, expected.md5, actual.md5
        ));
    }
    if !expected.sha1.eq_ignore_ascii_case(&actual.sha1) {
        reasons.push(format!(
            "{} sha1 mismatch - expected {} but got {}",
            against, expected.sha1, actual.sha1
        ));
    }
}

fn log_incidents(silo: &str, kind: &str, names: &[String]) {
    for line in name_slices(names) {
        log_fixity_warn!("reconciliation incident", silo = silo, kind = kind, packages = line.as_str());
    }
}
