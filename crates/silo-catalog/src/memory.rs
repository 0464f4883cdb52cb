//! In-process catalog backend.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::{
    apply_delete, apply_fixity, apply_put, Catalog, CatalogError, Checksums, HistoryRecord,
    NewPackage, PackageRecord, ReservedSpace, Result, SiloKey, SiloRecord, validate_name,
};

#[derive(Default)]
struct State {
    silos: BTreeMap<SiloKey, SiloRecord>,
    packages: BTreeMap<(SiloKey, String), PackageRecord>,
    history: BTreeMap<(SiloKey, String), Vec<HistoryRecord>>,
    reservations: BTreeMap<u64, ReservedSpace>,
    next_reservation: u64,
}

/// Catalog held in memory behind one mutex
#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<State>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Updates are computed before insertion, so a poisoned map is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn package_key(silo: &SiloKey, name: &str) -> (SiloKey, String) {
    (silo.clone(), name.to_string())
}

impl Catalog for MemoryCatalog {
    fn create_silo(&self, key: &SiloKey) -> Result<SiloRecord> {
        let mut state = self.state();
        if state.silos.contains_key(key) {
            return Err(CatalogError::SiloExists(key.clone()));
        }
        let record = SiloRecord::new(key.clone());
        state.silos.insert(key.clone(), record.clone());
        Ok(record)
    }

    fn lookup_silo(&self, key: &SiloKey) -> Result<Option<SiloRecord>> {
        Ok(self.state().silos.get(key).cloned())
    }

    fn list_silos(&self, hostname: Option<&str>) -> Result<Vec<SiloRecord>> {
        let host = hostname.map(|h| h.trim().to_lowercase());
        Ok(self
            .state()
            .silos
            .values()
            .filter(|s| host.as_ref().map_or(true, |h| &s.key.hostname == h))
            .cloned()
            .collect())
    }

    fn update_silo(&self, record: &SiloRecord) -> Result<()> {
        let mut state = self.state();
        match state.silos.get_mut(&record.key) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(CatalogError::UnknownSilo(record.key.clone())),
        }
    }

    fn remove_silo(&self, key: &SiloKey) -> Result<()> {
        let mut state = self.state();
        let packages = state.packages.keys().filter(|(s, _)| s == key).count();
        if packages > 0 {
            return Err(CatalogError::SiloInUse {
                silo: key.clone(),
                packages,
            });
        }
        match state.silos.remove(key) {
            Some(_) => Ok(()),
            None => Err(CatalogError::UnknownSilo(key.clone())),
        }
    }

    fn lookup_package(&self, silo: &SiloKey, name: &str) -> Result<Option<PackageRecord>> {
        Ok(self.state().packages.get(&package_key(silo, name)).cloned())
    }

    fn all_packages(&self, silo: &SiloKey) -> Result<Vec<PackageRecord>> {
        Ok(self
            .state()
            .packages
            .iter()
            .filter(|((s, _), _)| s == silo)
            .map(|(_, p)| p.clone())
            .collect())
    }

    fn record_put(&self, silo: &SiloKey, put: &NewPackage, at: DateTime<Utc>) -> Result<PackageRecord> {
        validate_name(&put.name)?;
        let mut state = self.state();
        if !state.silos.contains_key(silo) {
            return Err(CatalogError::UnknownSilo(silo.clone()));
        }
        let (record, event) = apply_put(silo, put, at);
        let key = package_key(silo, &put.name);
        state.history.entry(key.clone()).or_default().push(event);
        state.packages.insert(key, record.clone());
        Ok(record)
    }

    fn record_fixity(
        &self,
        silo: &SiloKey,
        name: &str,
        checksums: Option<&Checksums>,
        at: DateTime<Utc>,
    ) -> Result<PackageRecord> {
        let mut state = self.state();
        let key = package_key(silo, name);
        let Some(mut record) = state.packages.get(&key).cloned() else {
            return Err(CatalogError::UnknownPackage {
                silo: silo.clone(),
                name: name.to_string(),
            });
        };
        let event = apply_fixity(&mut record, checksums, at);
        state.history.entry(key.clone()).or_default().push(event);
        state.packages.insert(key, record.clone());
        Ok(record)
    }

    fn record_delete(&self, silo: &SiloKey, name: &str, at: DateTime<Utc>) -> Result<PackageRecord> {
        let mut state = self.state();
        let key = package_key(silo, name);
        let Some(mut record) = state.packages.get(&key).cloned() else {
            return Err(CatalogError::UnknownPackage {
                silo: silo.clone(),
                name: name.to_string(),
            });
        };
        let event = apply_delete(&mut record, at);
        state.history.entry(key.clone()).or_default().push(event);
        state.packages.insert(key, record.clone());
        Ok(record)
    }

    fn history(&self, silo: &SiloKey, name: &str) -> Result<Vec<HistoryRecord>> {
        Ok(self
            .state()
            .history
            .get(&package_key(silo, name))
            .cloned()
            .unwrap_or_default())
    }

    fn create_reservation(&self, partition: &Path, size: u64, at: DateTime<Utc>) -> Result<ReservedSpace> {
        let mut state = self.state();
        state.next_reservation += 1;
        let reservation = ReservedSpace {
            id: state.next_reservation,
            partition: partition.to_path_buf(),
            size,
            created_at: at,
        };
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    fn list_reservations(&self) -> Result<Vec<ReservedSpace>> {
        Ok(self.state().reservations.values().cloned().collect())
    }

    fn release_reservation(&self, id: u64) -> Result<bool> {
        Ok(self.state().reservations.remove(&id).is_some())
    }

    fn purge_reservations_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state();
        let before = state.reservations.len();
        state.reservations.retain(|_, r| r.created_at >= cutoff);
        Ok(before - state.reservations.len())
    }
}
