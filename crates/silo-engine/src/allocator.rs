//! Best-fit placement of new packages across the disk silos of a host.
//!
//! Allocation happens in two phases. Under the pool lock the allocator
//! reads each partition's free space, picks the partition that would be
//! left with the least and records a reservation for it; the caller then
//! writes outside the lock
//! and releases the reservation, whatever the write's outcome. Reservations
//! older than the expiry window are treated as abandoned.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use silo_catalog::{Catalog, Clock, Media, Method, ReservedSpace, SiloRecord};
use silo_config::{log_pool_debug, log_pool_info, log_pool_warn, PoolConfig};

use crate::lifecycle::effective_methods;
use crate::lock::PoolLock;
use crate::space::SpaceProbe;
use crate::{DiskSilo, Result, SiloError};

/// Space set aside for one write, and the silo to write to
#[derive(Debug)]
pub struct Reservation {
    pub record: ReservedSpace,
    pub silo: DiskSilo,
}

/// Candidate silos sharing one partition
struct Partition {
    free: u64,
    silos: Vec<SiloRecord>,
}

pub struct PoolAllocator {
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn SpaceProbe>,
    config: PoolConfig,
    hostname: String,
}

impl PoolAllocator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        probe: Arc<dyn SpaceProbe>,
        hostname: &str,
        config: PoolConfig,
    ) -> Self {
        Self {
            catalog,
            clock,
            probe,
            config,
            hostname: hostname.to_lowercase(),
        }
    }

    /// Disk silos of this host that currently accept puts, by partition.
    fn partitions(&self) -> Result<BTreeMap<PathBuf, Partition>> {
        let mut partitions: BTreeMap<PathBuf, Partition> = BTreeMap::new();
        for record in self.catalog.list_silos(Some(&self.hostname))? {
            if record.media() != Media::Disk || !effective_methods(&record).contains(&Method::Put) {
                continue;
            }
            let located = self
                .probe
                .partition(&record.key.filesystem)
                .and_then(|p| self.probe.free_bytes(&p).map(|free| (p, free)));
            let (partition, free) = match located {
                Ok(found) => found,
                Err(e) => {
                    let silo = record.key.to_string();
                    let reason = e.to_string();
                    log_pool_warn!(
                        "skipping silo with unknown free space",
                        silo = silo.as_str(),
                        error = reason.as_str()
                    );
                    continue;
                }
            };
            partitions
                .entry(partition)
                .or_insert_with(|| Partition {
                    free,
                    silos: Vec::new(),
                })
                .silos
                .push(record);
        }
        Ok(partitions)
    }

    /// Choose a silo with room for `size` bytes and reserve the space.
    pub fn reserve(&self, size: u64) -> Result<Reservation> {
        let _lock = PoolLock::acquire(&self.config.lock_path(), self.config.lock_timeout())?;

        // free space has to be read under the same lock as the reservations
        let partitions = self.partitions()?;
        if partitions.is_empty() {
            return Err(SiloError::NoSilosAvailable);
        }

        let now = self.clock.now();
        let cutoff = now - expiry(&self.config);
        let purged = self.catalog.purge_reservations_before(cutoff)?;
        if purged > 0 {
            log_pool_info!("expired reservations removed", count = purged);
        }

        let mut reserved: BTreeMap<PathBuf, u64> = BTreeMap::new();
        for r in self.catalog.list_reservations()? {
            if r.created_at >= cutoff {
                *reserved.entry(r.partition).or_default() += r.size;
            }
        }

        let needed = size.saturating_add(self.config.headroom_bytes);
        let best = partitions
            .iter()
            .filter_map(|(path, part)| {
                let held = reserved.get(path).copied().unwrap_or(0);
                part.free
                    .checked_sub(held)
                    .and_then(|left| left.checked_sub(needed))
                    .map(|left| (left, path, part))
            })
            .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        let Some((left, partition, part)) = best else {
            log_pool_warn!("no partition large enough", requested = size);
            return Err(SiloError::NoSilosLargeEnough { requested: size });
        };

        let record = self.catalog.create_reservation(partition, needed, now)?;
        let target = part
            .silos
            .iter()
            .min_by(|a, b| a.key.filesystem.cmp(&b.key.filesystem))
            .ok_or(SiloError::NoSilosAvailable)?;

        let silo = DiskSilo::open(self.catalog.clone(), self.clock.clone(), target.key.clone())?;
        let name = target.key.to_string();
        log_pool_debug!(
            "space reserved",
            silo = name.as_str(),
            reservation = record.id,
            size = needed,
            remaining = left
        );
        Ok(Reservation { record, silo })
    }

    /// Forget a reservation. Releasing twice is harmless.
    pub fn release(&self, reservation: &Reservation) -> Result<()> {
        self.catalog.release_reservation(reservation.record.id)?;
        Ok(())
    }

    /// Reserve, hand the silo to `write`, and release whatever it returns.
    pub fn with_reservation<T, F>(&self, size: u64, write: F) -> Result<T>
    where
        F: FnOnce(&DiskSilo) -> Result<T>,
    {
        let reservation = self.reserve(size)?;
        let outcome = write(&reservation.silo);
        let released = self.release(&reservation);
        let value = outcome?;
        released?;
        Ok(value)
    }
}

fn expiry(config: &PoolConfig) -> chrono::Duration {
    chrono::Duration::seconds(config.reservation_expiry_secs.min(i64::MAX as u64 / 1000) as i64)
}
