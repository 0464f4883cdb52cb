//! Scratch disk handling for fixity scans of tape silos.
//!
//! A tape silo is scanned by restoring the whole silo directory onto a
//! scratch disk and reconciling against that copy.

use std::fs;
use std::path::Path;
use std::time::Duration;

use silo_config::{log_fixity_info, log_fixity_warn};
use silo_store::ContentStore;
use silo_tape::TapeAgent;

use crate::{Result, SiloError};

/// Restore a silo from tape into `scratch`. The client recreates the silo
/// directory under `scratch`; that copy is returned as a store.
pub fn restore_to_scratch(
    agent: &dyn TapeAgent,
    tape_path: &Path,
    scratch: &Path,
    timeout: Duration,
) -> Result<ContentStore> {
    fs::create_dir_all(scratch)?;
    let silo_dir = tape_path.file_name().ok_or_else(|| {
        SiloError::Configuration(format!("{} does not name a silo directory", tape_path.display()))
    })?;

    let source = tape_path.display().to_string();
    log_fixity_info!("restoring silo to scratch", source = source.as_str());
    let run = agent.restore(tape_path, scratch, Some(timeout));
    if run.status > 4 {
        let mut log = run.output_head().to_vec();
        log.extend(run.errors_head().iter().cloned());
        return Err(SiloError::FatalFixity(format!(
            "restore of {} into {} exited with status {}: {}",
            tape_path.display(),
            scratch.display(),
            run.status,
            log.join("; ")
        )));
    }

    let restored = ContentStore::new(scratch.join(silo_dir)).map_err(|e| {
        SiloError::FatalFixity(format!("restore of {} produced no silo: {}", tape_path.display(), e))
    })?;
    Ok(restored)
}

fn is_fanout_dir(name: &str) -> bool {
    name.len() == 3 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Remove restored fan-out directories (three hex digits) from `dir`,
/// leaving anything else alone. Returns how many were removed.
pub fn clean_scratch(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_fanout_dir(name) || !entry.file_type()?.is_dir() {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => {
                let path = entry.path().display().to_string();
                let reason = e.to_string();
                log_fixity_warn!("could not clean scratch", path = path.as_str(), error = reason.as_str());
            }
        }
    }
    Ok(removed)
}
