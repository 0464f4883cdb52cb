//! Everything a command needs to reach this host's pool.

use std::sync::Arc;

use anyhow::{Context, Result};
use silo_catalog::{Catalog, Clock, LmdbCatalog, MemoryCatalog, SiloRecord, SystemClock};
use silo_config::{log_cli_debug, CatalogBackend, Config};
use silo_engine::{DiskSilo, FsSpace, PoolAllocator, SiloResolver};
use silo_tape::DsmcAgent;

pub struct Pool {
    pub config: Config,
    pub catalog: Arc<dyn Catalog>,
    pub clock: Arc<dyn Clock>,
    pub hostname: String,
}

impl Pool {
    pub fn open(config: Config) -> Result<Self> {
        let catalog: Arc<dyn Catalog> = match config.catalog.backend {
            CatalogBackend::Lmdb => Arc::new(
                LmdbCatalog::open(&config.catalog.path)
                    .with_context(|| format!("cannot open catalog at {}", config.catalog.path.display()))?,
            ),
            CatalogBackend::Memory => Arc::new(MemoryCatalog::new()),
        };
        let hostname = match &config.pool.hostname {
            Some(host) => host.to_lowercase(),
            None => local_hostname()?,
        };
        log_cli_debug!("pool opened", hostname = hostname.as_str());

        Ok(Self {
            config,
            catalog,
            clock: Arc::new(SystemClock),
            hostname,
        })
    }

    pub fn tape_agent(&self) -> DsmcAgent {
        let tape = &self.config.tape;
        let agent = DsmcAgent::new(&tape.client, tape.server.as_str()).with_default_timeout(tape.timeout());
        match &tape.owner {
            Some(owner) => agent.with_owner(owner.as_str()),
            None => agent,
        }
    }

    pub fn resolver(&self) -> SiloResolver {
        SiloResolver::new(self.catalog.clone(), self.clock.clone(), &self.hostname)
            .with_tape(Arc::new(self.tape_agent()), self.config.tape.clone())
    }

    pub fn allocator(&self) -> PoolAllocator {
        PoolAllocator::new(
            self.catalog.clone(),
            self.clock.clone(),
            Arc::new(FsSpace),
            &self.hostname,
            self.config.pool.clone(),
        )
    }

    /// Catalog row of a silo of this host, by the last path component.
    pub fn record(&self, short_name: &str) -> Result<SiloRecord> {
        self.resolver()
            .records()?
            .into_iter()
            .find(|r| r.key.short_name() == short_name)
            .with_context(|| format!("no silo named {} on {}", short_name, self.hostname))
    }

    pub fn disk_silo(&self, record: &SiloRecord) -> Result<DiskSilo> {
        Ok(DiskSilo::open(self.catalog.clone(), self.clock.clone(), record.key.clone())?)
    }
}

fn local_hostname() -> Result<String> {
    let name = nix::unistd::gethostname().context("cannot read the host name")?;
    let name = name
        .into_string()
        .map_err(|raw| anyhow::anyhow!("host name {:?} is not valid UTF-8", raw))?;
    Ok(name.to_lowercase())
}
