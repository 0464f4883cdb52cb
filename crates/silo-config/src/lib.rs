//! # silo-config
//!
//! Configuration for the silopool storage service.
//!
//! Loads configuration from:
//! 1. `~/.silopool/config.toml` (global)
//! 2. `.silopool/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! There is no process-wide configuration instance. Callers load a
//! [`Config`] once and hand the relevant section to each constructor.

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub pool: PoolConfig,
    pub tape: TapeConfig,
    pub fixity: FixityConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        let project_path = Path::new(".silopool/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let project_config = Self::from_file(project_path)?;
            config.merge(project_config);
        }

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load a single config file without consulting the standard locations.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.silopool/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".silopool/config.toml"))
    }

    /// Merge a project config over this one. Only values that differ from
    /// the defaults replace what is already loaded.
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();

        if other.catalog.path != defaults.catalog.path {
            self.catalog.path = other.catalog.path;
        }
        if other.catalog.backend != defaults.catalog.backend {
            self.catalog.backend = other.catalog.backend;
        }
        if other.pool.hostname.is_some() {
            self.pool.hostname = other.pool.hostname;
        }
        if other.pool.lock_dir != defaults.pool.lock_dir {
            self.pool.lock_dir = other.pool.lock_dir;
        }
        if other.pool.lock_timeout_secs != defaults.pool.lock_timeout_secs {
            self.pool.lock_timeout_secs = other.pool.lock_timeout_secs;
        }
        if other.pool.headroom_bytes != defaults.pool.headroom_bytes {
            self.pool.headroom_bytes = other.pool.headroom_bytes;
        }
        if other.pool.reservation_expiry_secs != defaults.pool.reservation_expiry_secs {
            self.pool.reservation_expiry_secs = other.pool.reservation_expiry_secs;
        }
        if other.tape.client != defaults.tape.client {
            self.tape.client = other.tape.client;
        }
        if other.tape.server != defaults.tape.server {
            self.tape.server = other.tape.server;
        }
        if other.tape.owner.is_some() {
            self.tape.owner = other.tape.owner;
        }
        if other.tape.cache_root != defaults.tape.cache_root {
            self.tape.cache_root = other.tape.cache_root;
        }
        if other.tape.cache_days != defaults.tape.cache_days {
            self.tape.cache_days = other.tape.cache_days;
        }
        if other.tape.timeout_secs != defaults.tape.timeout_secs {
            self.tape.timeout_secs = other.tape.timeout_secs;
        }
        if other.fixity.ghost_policy != defaults.fixity.ghost_policy {
            self.fixity.ghost_policy = other.fixity.ghost_policy;
        }
        if other.fixity.scratch_dir.is_some() {
            self.fixity.scratch_dir = other.fixity.scratch_dir;
        }
        if other.logging.level != defaults.logging.level {
            self.logging.level = other.logging.level;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = std::env::var("SILOPOOL_CATALOG") {
            self.catalog.path = PathBuf::from(path);
        }
        if let Ok(host) = std::env::var("SILOPOOL_HOSTNAME") {
            self.pool.hostname = Some(host);
        }
        if let Ok(dir) = std::env::var("SILOPOOL_LOCK_DIR") {
            self.pool.lock_dir = PathBuf::from(dir);
        }
        if let Ok(server) = std::env::var("SILOPOOL_TAPE_SERVER") {
            self.tape.server = server;
        }
        if let Ok(root) = std::env::var("SILOPOOL_CACHE_ROOT") {
            self.tape.cache_root = PathBuf::from(root);
        }
        if let Ok(level) = std::env::var("SILOPOOL_LOG") {
            if level.parse::<logging::LogLevel>().is_err() {
                return Err(ConfigError::Invalid {
                    key: "SILOPOOL_LOG",
                    value: level,
                });
            }
            self.logging.level = level;
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

/// Which catalog backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogBackend {
    Lmdb,
    Memory,
}

/// Catalog location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// LMDB environment directory
    pub path: PathBuf,
    pub backend: CatalogBackend,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/silopool/catalog"),
            backend: CatalogBackend::Lmdb,
        }
    }
}

/// Pool allocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Host whose silos make up the pool (None = this machine)
    pub hostname: Option<String>,
    /// Directory holding the pool lock file
    pub lock_dir: PathBuf,
    pub lock_timeout_secs: u64,
    /// Extra bytes reserved on top of every request
    pub headroom_bytes: u64,
    /// Reservations older than this are purged during allocation
    pub reservation_expiry_secs: u64,
}

impl PoolConfig {
    pub fn lock_path(&self) -> PathBuf {
        self.lock_dir.join("pool.lock")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn reservation_expiry(&self) -> Duration {
        Duration::from_secs(self.reservation_expiry_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            lock_dir: PathBuf::from("/var/lib/silopool"),
            lock_timeout_secs: 30,
            headroom_bytes: 256 * 1024,
            reservation_expiry_secs: 3 * 60 * 60,
        }
    }
}

/// Tape client and restore cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TapeConfig {
    /// Path to the tape backup client executable
    pub client: PathBuf,
    /// Tape server name passed to the client
    pub server: String,
    /// Owner the restores are performed on behalf of
    pub owner: Option<String>,
    /// Directory under which per-silo restore caches are created
    pub cache_root: PathBuf,
    /// Days a restored object stays in the cache after its last access
    pub cache_days: u64,
    pub timeout_secs: u64,
}

impl TapeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_horizon(&self) -> Duration {
        Duration::from_secs(self.cache_days * 24 * 60 * 60)
    }
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            client: PathBuf::from("/usr/bin/dsmc"),
            server: String::new(),
            owner: None,
            cache_root: PathBuf::from("/var/cache/silopool"),
            cache_days: 2,
            timeout_secs: 3600,
        }
    }
}

/// How the reconciler treats packages on disk that the catalog says were deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GhostPolicy {
    /// Ghosts are reported as incidents alongside aliens and missing packages
    #[default]
    Incident,
    /// Ghosts are counted but not reported as incidents
    Benign,
}

/// Fixity reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixityConfig {
    pub ghost_policy: GhostPolicy,
    /// Scratch disk used when scanning tape-resident silos
    pub scratch_dir: Option<PathBuf>,
    pub restore_timeout_secs: u64,
}

impl FixityConfig {
    pub fn restore_timeout(&self) -> Duration {
        Duration::from_secs(self.restore_timeout_secs)
    }
}

impl Default for FixityConfig {
    fn default() -> Self {
        Self {
            ghost_policy: GhostPolicy::Incident,
            scratch_dir: None,
            restore_timeout_secs: 16 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// error, warn, info, debug or trace
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
