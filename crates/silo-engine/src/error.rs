//! Error taxonomy for silo operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use silo_catalog::{CatalogError, Method, SiloKey, SiloState};
use silo_store::StoreError;
use silo_tar::TarError;

/// Broad family of a [`SiloError`], for callers that react by kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing or invalid settings, unknown silos, unusable directories
    Configuration,
    /// Disk and catalog disagree about a package
    Consistency,
    /// Illegal lifecycle change or method request
    StateTransition,
    /// The pool cannot place a package
    Allocation,
    /// A stored archive is malformed
    ArchiveFormat,
    /// Fixity checking could not run at all
    Fixity,
    /// The tape client failed
    ExternalProcess,
    /// Local filesystem or catalog failure
    Storage,
}

#[derive(Error, Debug)]
pub enum SiloError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no silo registered as {0}")]
    UnknownSilo(SiloKey),

    #[error("{} is not a usable silo directory", .0.display())]
    BadFilesystem(PathBuf),

    #[error("silo {silo} cannot move from {from} to {to}: {reason}")]
    StateChange {
        silo: SiloKey,
        from: SiloState,
        to: SiloState,
        reason: String,
    },

    #[error("silo {silo} in state {state} cannot allow {method}")]
    MethodChange {
        silo: SiloKey,
        state: SiloState,
        method: Method,
    },

    #[error("{method} is not supported by silo {silo}")]
    MethodNotAllowed { silo: SiloKey, method: Method },

    #[error("package {name} already exists in silo {silo}")]
    ResourceExists { silo: SiloKey, name: String },

    #[error("package {name} not found in silo {silo}")]
    PackageNotFound { silo: SiloKey, name: String },

    #[error("package {name} was deleted from silo {silo}")]
    PackageDeleted { silo: SiloKey, name: String },

    #[error("MD5 mismatch for {name}: expected {expected}, computed {actual}")]
    Md5Mismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("alien package {name} on disk in silo {silo} but not in the catalog")]
    AlienPackage { silo: SiloKey, name: String },

    #[error("ghost package {name} on disk in silo {silo} but recorded as deleted")]
    GhostPackage { silo: SiloKey, name: String },

    #[error("missing package {name}: cataloged in silo {silo} but not on disk")]
    MissingPackage { silo: SiloKey, name: String },

    #[error("no silo has room for {requested} bytes")]
    NoSilosLargeEnough { requested: u64 },

    #[error("no silos are available for writing")]
    NoSilosAvailable,

    #[error("could not lock the pool within {timeout_secs} seconds")]
    CouldNotLockPool { timeout_secs: u64 },

    #[error("fatal fixity error: {0}")]
    FatalFixity(String),

    #[error("tape retrieval failed for {name}: {message}")]
    TapeRetrieval {
        name: String,
        message: String,
        output: Vec<String>,
        errors: Vec<String>,
    },

    #[error("package {name} in silo {silo} is not a readable archive: {source}")]
    Archive {
        silo: SiloKey,
        name: String,
        #[source]
        source: TarError,
    },
}

impl SiloError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SiloError::Configuration(_) | SiloError::UnknownSilo(_) | SiloError::BadFilesystem(_) => {
                ErrorClass::Configuration
            }
            SiloError::AlienPackage { .. }
            | SiloError::GhostPackage { .. }
            | SiloError::MissingPackage { .. }
            | SiloError::Md5Mismatch { .. } => ErrorClass::Consistency,
            SiloError::StateChange { .. }
            | SiloError::MethodChange { .. }
            | SiloError::MethodNotAllowed { .. }
            | SiloError::ResourceExists { .. } => ErrorClass::StateTransition,
            SiloError::NoSilosLargeEnough { .. }
            | SiloError::NoSilosAvailable
            | SiloError::CouldNotLockPool { .. } => ErrorClass::Allocation,
            SiloError::Archive { .. } => ErrorClass::ArchiveFormat,
            SiloError::FatalFixity(_) => ErrorClass::Fixity,
            SiloError::TapeRetrieval { .. } => ErrorClass::ExternalProcess,
            SiloError::Io(_)
            | SiloError::Store(_)
            | SiloError::Catalog(_)
            | SiloError::PackageNotFound { .. }
            | SiloError::PackageDeleted { .. } => ErrorClass::Storage,
        }
    }

    /// HTTP status an outer request layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            SiloError::StateChange { .. } | SiloError::MethodChange { .. } => 409,
            SiloError::NoSilosLargeEnough { .. } => 413,
            SiloError::NoSilosAvailable | SiloError::MethodNotAllowed { .. } => 405,
            SiloError::ResourceExists { .. } => 403,
            SiloError::Md5Mismatch { .. } => 412,
            SiloError::BadFilesystem(_)
            | SiloError::Catalog(CatalogError::Invalid(_))
            | SiloError::Catalog(CatalogError::NameTooLong { .. }) => 400,
            SiloError::PackageNotFound { .. } | SiloError::PackageDeleted { .. } => 404,
            SiloError::MissingPackage { .. } => 410,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, SiloError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_errors_map_to_distinct_statuses() {
        assert_eq!(SiloError::NoSilosLargeEnough { requested: 1 }.status_code(), 413);
        assert_eq!(SiloError::NoSilosAvailable.status_code(), 405);
        assert_eq!(SiloError::CouldNotLockPool { timeout_secs: 1 }.status_code(), 500);
        assert_eq!(SiloError::NoSilosAvailable.class(), ErrorClass::Allocation);
    }

    #[test]
    fn test_consistency_classes() {
        let silo = SiloKey::new("h", "/s");
        let err = SiloError::AlienPackage {
            silo: silo.clone(),
            name: "E1".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Consistency);
        assert!(err.to_string().contains("alien package E1"));

        let err = SiloError::StateChange {
            silo,
            from: SiloState::DiskMaster,
            to: SiloState::TapeMaster,
            reason: "not a legal transition".to_string(),
        };
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.class(), ErrorClass::StateTransition);
    }
}
