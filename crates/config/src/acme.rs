//! ACME protocol settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Let's Encrypt production directory
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// ACME client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcmeConfig {
    /// Use the Let's Encrypt staging environment
    pub staging: bool,

    /// Explicit directory URL; overrides `staging` when set
    pub directory_url: Option<String>,

    /// Upper bound for a single request to the ACME server
    pub request_timeout_secs: u64,

    /// Upper bound for challenge validation and certificate retrieval polling
    pub validation_timeout_secs: u64,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            staging: true,
            directory_url: None,
            request_timeout_secs: default_request_timeout(),
            validation_timeout_secs: default_validation_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    5
}

fn default_validation_timeout() -> u64 {
    120
}

impl AcmeConfig {
    /// The directory URL the client should talk to
    pub fn directory(&self) -> &str {
        match &self.directory_url {
            Some(url) => url,
            None if self.staging => LETS_ENCRYPT_STAGING,
            None => LETS_ENCRYPT_PRODUCTION,
        }
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Polling budget for validation and certificate retrieval
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "acme.request_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.validation_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "acme.validation_timeout_secs",
                "must be greater than zero",
            ));
        }

        let parsed = url::Url::parse(self.directory())
            .map_err(|e| ConfigError::invalid("acme.directory_url", e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "acme.directory_url",
                format!("unsupported scheme '{}'", parsed.scheme()),
            ));
        }

        Ok(())
    }
}
