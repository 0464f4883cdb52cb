//! Stored packages read as tar archives.

use std::fs::File;

use silo_catalog::SiloKey;
use silo_tar::{TarEntry, TarError, TarMember, TarReader};

use crate::silo::Silo;
use crate::{Result, SiloError};

/// A package's bytes opened as a tar archive, wherever the silo keeps them
pub struct PackageArchive {
    silo: SiloKey,
    name: String,
    reader: TarReader<File>,
}

impl PackageArchive {
    /// Open `name` from `silo`. A tape silo restores it into its cache
    /// first. `None` when the silo does not hold the package.
    pub fn open(silo: &dyn Silo, name: &str) -> Result<Option<Self>> {
        let Some(file) = silo.open(name)? else {
            return Ok(None);
        };
        let key = silo.key().clone();
        let reader = TarReader::new(file).map_err(|e| archive_error(&key, name, e))?;
        Ok(Some(Self {
            silo: key,
            name: name.to_string(),
            reader,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Regular files in archive order.
    pub fn entries(&self) -> Vec<TarEntry> {
        self.reader.entries()
    }

    /// Reader over one member, if the archive has it.
    pub fn member(&mut self, path: &str) -> Option<TarMember<'_, File>> {
        let entry = self.reader.find(path)?;
        Some(self.reader.member(&entry))
    }

    /// A whole member's bytes.
    pub fn read_member(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        self.reader
            .read_member(path)
            .map_err(|e| archive_error(&self.silo, &self.name, e))
    }
}

fn archive_error(silo: &SiloKey, name: &str, source: TarError) -> SiloError {
    SiloError::Archive {
        silo: silo.clone(),
        name: name.to_string(),
        source,
    }
}
