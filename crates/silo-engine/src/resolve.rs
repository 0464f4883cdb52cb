//! Name-to-silo resolution for one host.

use std::sync::Arc;

use silo_catalog::{Catalog, Clock, SiloKey, SiloRecord, SiloState};
use silo_config::TapeConfig;
use silo_tape::TapeAgent;

use crate::{DiskSilo, Result, Silo, SiloError, TapeSilo};

/// Opens silos by their short name, picking the disk or tape
/// implementation from the silo's current state.
pub struct SiloResolver {
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    hostname: String,
    tape: Option<(Arc<dyn TapeAgent>, TapeConfig)>,
}

impl SiloResolver {
    pub fn new(catalog: Arc<dyn Catalog>, clock: Arc<dyn Clock>, hostname: &str) -> Self {
        Self {
            catalog,
            clock,
            hostname: hostname.to_lowercase(),
            tape: None,
        }
    }

    pub fn with_tape(mut self, agent: Arc<dyn TapeAgent>, config: TapeConfig) -> Self {
        self.tape = Some((agent, config));
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Silo rows of this host.
    pub fn records(&self) -> Result<Vec<SiloRecord>> {
        Ok(self.catalog.list_silos(Some(&self.hostname))?)
    }

    /// The silo whose directory's last component is `name`.
    pub fn lookup(&self, name: &str) -> Result<Box<dyn Silo>> {
        let record = self
            .records()?
            .into_iter()
            .find(|r| r.key.short_name() == name)
            .ok_or_else(|| SiloError::UnknownSilo(SiloKey::new(&self.hostname, name)))?;
        self.open_record(&record)
    }

    pub fn open(&self, key: &SiloKey) -> Result<Box<dyn Silo>> {
        let record = self
            .catalog
            .lookup_silo(key)?
            .ok_or_else(|| SiloError::UnknownSilo(key.clone()))?;
        self.open_record(&record)
    }

    fn open_record(&self, record: &SiloRecord) -> Result<Box<dyn Silo>> {
        if record.state != SiloState::TapeMaster {
            return Ok(Box::new(DiskSilo::open(
                self.catalog.clone(),
                self.clock.clone(),
                record.key.clone(),
            )?));
        }
        let (agent, config) = self.tape.as_ref().ok_or_else(|| {
            SiloError::Configuration(format!("silo {} is on tape but no tape client is configured", record.key))
        })?;
        Ok(Box::new(TapeSilo::open(
            self.catalog.clone(),
            self.clock.clone(),
            agent.clone(),
            record.key.clone(),
            config,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_catalog::{Media, MemoryCatalog, SystemClock};

    #[test]
    fn test_lookup_by_short_name() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("007");
        std::fs::create_dir(&dir).unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let clock = Arc::new(SystemClock);
        DiskSilo::create(catalog.clone(), clock.clone(), "Host", &dir).unwrap();

        let resolver = SiloResolver::new(catalog.clone(), clock, "HOST");
        let silo = resolver.lookup("007").unwrap();
        assert_eq!(silo.media().unwrap(), Media::Disk);
        assert!(matches!(resolver.lookup("008"), Err(SiloError::UnknownSilo(_))));

        silo.set_state(SiloState::DiskIdling).unwrap();
        silo.set_state(SiloState::TapeMaster).unwrap();
        assert!(matches!(resolver.lookup("007"), Err(SiloError::Configuration(_))));
    }
}
