//! Silo lifecycle state machine.
//!
//! ```text
//!   disk_master ──▶ disk_idling ──▶ tape_master
//!        ▲              │  ▲              │
//!        └──────────────┘  └──────────────┘
//!     (directory usable)     (directory present)
//! ```
//!
//! Each state permits an inherent set of methods; operators can forbid
//! methods on top of that. Accepted state changes clear the forbidden set.

use std::collections::BTreeSet;
use std::path::Path;

use nix::unistd::{access, AccessFlags};

use silo_catalog::{Method, SiloKey, SiloRecord, SiloState};

use crate::{Result, SiloError};

/// Methods a state supports before any operator restriction.
pub fn inherent_methods(state: SiloState) -> BTreeSet<Method> {
    match state {
        SiloState::DiskMaster => BTreeSet::from([Method::Get, Method::Put, Method::Delete]),
        SiloState::DiskIdling => BTreeSet::from([Method::Get]),
        SiloState::TapeMaster => BTreeSet::from([Method::Get, Method::Delete]),
    }
}

/// Methods currently permitted: inherent minus forbidden, and only get once
/// the silo is retired.
pub fn effective_methods(record: &SiloRecord) -> BTreeSet<Method> {
    inherent_methods(record.state)
        .into_iter()
        .filter(|m| !record.retired || *m == Method::Get)
        .filter(|m| !record.forbidden.contains(m))
        .collect()
}

/// What the silo's directory currently looks like on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryStatus {
    pub present: bool,
    /// Readable and writable by this process
    pub usable: bool,
}

impl DirectoryStatus {
    pub const USABLE: Self = Self {
        present: true,
        usable: true,
    };
    pub const MISSING: Self = Self {
        present: false,
        usable: false,
    };

    pub fn probe(path: &Path) -> Self {
        let present = path.is_dir();
        let usable =
            present && access(path, AccessFlags::R_OK | AccessFlags::W_OK | AccessFlags::X_OK).is_ok();
        Self { present, usable }
    }
}

/// Why `from -> to` is refused, or `None` if it is permitted.
fn refusal(from: SiloState, to: SiloState, dir: DirectoryStatus) -> Option<&'static str> {
    use SiloState::*;
    match (from, to) {
        _ if from == to => None,
        (DiskMaster, DiskIdling) => None,
        (DiskIdling, TapeMaster) => None,
        (DiskIdling, DiskMaster) if dir.usable => None,
        (DiskIdling, DiskMaster) => Some("silo directory is missing or not readable and writable"),
        (TapeMaster, DiskIdling) if dir.present => None,
        (TapeMaster, DiskIdling) => Some("silo directory is not present"),
        (TapeMaster, DiskMaster) => Some("a tape master must idle on disk before mastering on disk"),
        (DiskMaster, TapeMaster) => Some("a disk master must idle before moving to tape"),
        _ => Some("not a legal transition"),
    }
}

/// States reachable from `state` right now, the current one included,
/// sorted by name.
pub fn allowed_states(state: SiloState, dir: DirectoryStatus) -> Vec<SiloState> {
    let mut states: Vec<SiloState> = SiloState::ALL
        .into_iter()
        .filter(|to| refusal(state, *to, dir).is_none())
        .collect();
    states.sort_by_key(|s| s.as_str());
    states
}

/// Move a record to a new state. Returns whether anything changed; a
/// request for the current state is a no-op and keeps the forbidden set.
pub fn change_state(record: &mut SiloRecord, to: SiloState, dir: DirectoryStatus) -> Result<bool> {
    if record.state == to {
        return Ok(false);
    }
    if let Some(reason) = refusal(record.state, to, dir) {
        return Err(state_error(&record.key, record.state, to, reason));
    }
    record.state = to;
    record.forbidden.clear();
    Ok(true)
}

fn state_error(silo: &SiloKey, from: SiloState, to: SiloState, reason: &str) -> SiloError {
    SiloError::StateChange {
        silo: silo.clone(),
        from,
        to,
        reason: reason.to_string(),
    }
}

/// Lift an operator restriction. Only methods the state supports can be allowed.
pub fn allow(record: &mut SiloRecord, method: Method) -> Result<()> {
    if !inherent_methods(record.state).contains(&method) {
        return Err(SiloError::MethodChange {
            silo: record.key.clone(),
            state: record.state,
            method,
        });
    }
    record.forbidden.remove(&method);
    Ok(())
}

/// Add an operator restriction.
pub fn forbid(record: &mut SiloRecord, method: Method) {
    record.forbidden.insert(method);
}
