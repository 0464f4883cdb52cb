//! # silo-tape
//!
//! Wrapper around the external tape backup client.
//!
//! Every invocation yields a [`TapeRun`]: the client's integer status plus
//! everything it printed. Nothing here raises on client failure. Callers
//! classify the status with [`TapeOutcome`] and decide what to do:
//!
//! | status | outcome |
//! |--------|---------|
//! | 0–4    | success |
//! | 5–8    | warning, results usable |
//! | > 8    | fatal |
//!
//! Statuses 253–255 are synthesised locally for an unknown exit, a client
//! that could not be started, and a timeout.

mod dsmc;
mod listing;

pub use dsmc::DsmcAgent;
pub use listing::{parse_listing, ListedFile};

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// The client ran past its timeout and was terminated
pub const STATUS_TIMEOUT: i32 = 255;
/// The client could not be started
pub const STATUS_SPAWN_FAILED: i32 = 254;
/// The client ended without an exit code
pub const STATUS_UNKNOWN: i32 = 253;

/// Lines of client output carried into error messages
pub const REPORT_LINES: usize = 40;

/// How a tape client status should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeOutcome {
    Success,
    Warning,
    Fatal,
}

impl TapeOutcome {
    pub fn from_status(status: i32) -> Self {
        match status {
            0..=4 => TapeOutcome::Success,
            5..=8 => TapeOutcome::Warning,
            _ => TapeOutcome::Fatal,
        }
    }
}

/// Errors for callers that want a fatal run as a `Result`
#[derive(Error, Debug)]
pub enum TapeError {
    #[error("tape command `{command}` failed with status {status}")]
    Failed {
        command: String,
        status: i32,
        output: Vec<String>,
        errors: Vec<String>,
    },
}

/// One finished tape client invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapeRun {
    /// Command line as run, for logs
    pub command: String,
    pub status: i32,
    /// Standard output, one entry per line
    pub output: Vec<String>,
    /// Standard error, one entry per line
    pub errors: Vec<String>,
}

impl TapeRun {
    pub fn outcome(&self) -> TapeOutcome {
        TapeOutcome::from_status(self.status)
    }

    pub fn output_head(&self) -> &[String] {
        &self.output[..self.output.len().min(REPORT_LINES)]
    }

    pub fn errors_head(&self) -> &[String] {
        &self.errors[..self.errors.len().min(REPORT_LINES)]
    }

    /// Fail on a fatal status, keeping the first lines of output.
    pub fn check(self) -> Result<TapeRun, TapeError> {
        if self.outcome() == TapeOutcome::Fatal {
            return Err(TapeError::Failed {
                output: self.output_head().to_vec(),
                errors: self.errors_head().to_vec(),
                command: self.command,
                status: self.status,
            });
        }
        Ok(self)
    }
}

/// Result of a listing: the run, and files parsed from it when it succeeded
#[derive(Debug, Clone)]
pub struct TapeListing {
    pub run: TapeRun,
    pub files: Vec<ListedFile>,
}

/// Operations the tape system offers
pub trait TapeAgent: Send + Sync {
    /// Back up a directory tree.
    fn save(&self, path: &Path, timeout: Option<Duration>) -> TapeRun;

    /// List the active backed-up files under a directory.
    fn list(&self, path: &Path, timeout: Option<Duration>) -> TapeListing;

    /// Restore everything under `source` into `destination`.
    fn restore(&self, source: &Path, destination: &Path, timeout: Option<Duration>) -> TapeRun;
}
