//! Top-level error type

use thiserror::Error;

use crate::acme::{AcmeError, LifecycleError, StorageError};

/// Errors surfaced by the lifecycle manager
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Request rejected at the admin boundary
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ManagerError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }
}
