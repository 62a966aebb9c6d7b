//! Certkeeper configuration
//!
//! Configuration is read from a TOML file. Every field has a default, so an
//! empty file (or no file at all) yields a runnable configuration that talks
//! to the Let's Encrypt staging environment.
//!
//! ```toml
//! listen = "0.0.0.0:8085"
//! storage_dir = "./store"
//! certs_dir = "./certs"
//!
//! [acme]
//! staging = false
//! request_timeout_secs = 5
//!
//! [scheduler]
//! interval_secs = 1800
//! batch_size = 10
//! start_at_hour = 3
//! ```

mod acme;
mod error;
mod scheduler;

pub use acme::{AcmeConfig, LETS_ENCRYPT_PRODUCTION, LETS_ENCRYPT_STAGING};
pub use error::ConfigError;
pub use scheduler::{SchedulerConfig, MIN_INTERVAL_SECS};

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Root configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Admin interface listen address
    pub listen: SocketAddr,

    /// Directory holding the key-value store
    pub storage_dir: PathBuf,

    /// Directory receiving issued keys and certificates
    pub certs_dir: PathBuf,

    /// ACME client settings
    pub acme: AcmeConfig,

    /// Scheduler settings
    pub scheduler: SchedulerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            storage_dir: PathBuf::from("./store"),
            certs_dir: PathBuf::from("./certs"),
            acme: AcmeConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8085))
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        trace!(path = %path.display(), "Reading configuration file");

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("storage_dir", "must not be empty"));
        }
        if self.certs_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("certs_dir", "must not be empty"));
        }
        self.acme.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}
