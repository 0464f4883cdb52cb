//! Structured logging for silopool components.
//!
//! Every event carries a `component` field so operators can filter pool
//! allocation, silo, tape and fixity traffic independently.
//!
//! # Usage
//!
//! ```ignore
//! use silo_config::{log_fixity_warn, log_pool_info};
//!
//! log_pool_info!("Reserved space", partition = "/daitssfs", size = 1024u64);
//! log_fixity_warn!("Alien packages found", silo = "/daitssfs/001", count = 3usize);
//! ```

use std::str::FromStr;

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const POOL: &'static str = "POOL";
    pub const SILO: &'static str = "SILO";
    pub const TAPE: &'static str = "TAPE";
    pub const FIXITY: &'static str = "FIXITY";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

// === POOL logging macros ===

#[macro_export]
macro_rules! log_pool_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "POOL", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_pool_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "POOL", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_pool_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "POOL", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_pool_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "POOL", $($key = $value,)* $msg)
    };
}

// === SILO logging macros ===

#[macro_export]
macro_rules! log_silo_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "SILO", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_silo_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "SILO", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_silo_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "SILO", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_silo_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "SILO", $($key = $value,)* $msg)
    };
}

// === TAPE logging macros ===

#[macro_export]
macro_rules! log_tape_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "TAPE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_tape_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "TAPE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_tape_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "TAPE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_tape_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "TAPE", $($key = $value,)* $msg)
    };
}

// === FIXITY logging macros ===

#[macro_export]
macro_rules! log_fixity_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "FIXITY", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_fixity_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "FIXITY", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_fixity_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "FIXITY", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_fixity_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "FIXITY", $($key = $value,)* $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CLI", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CLI", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup. `RUST_LOG` wins when set.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Join names in groups of five, one string per group, for log lines that
/// list many packages.
pub fn name_slices<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    names
        .chunks(5)
        .map(|chunk| {
            chunk
                .iter()
                .map(|n| n.as_ref())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::POOL, "POOL");
        assert_eq!(Component::FIXITY, "FIXITY");
        assert_eq!(Component::TAPE, "TAPE");
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_name_slices_groups_of_five() {
        let names: Vec<String> = (0..12).map(|i| format!("E{}", i)).collect();
        let slices = name_slices(&names);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0], "E0, E1, E2, E3, E4");
        assert_eq!(slices[2], "E10, E11");
    }

    #[test]
    fn test_macros_expand() {
        crate::log_pool_info!("allocation", partition = "/tmp", size = 10u64);
        crate::log_fixity_warn!("aliens", silo = "/tmp/silo", count = 2usize);
        crate::log_cli_debug!("parsed args");
    }
}
