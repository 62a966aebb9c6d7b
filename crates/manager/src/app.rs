//! Shared application state
//!
//! Built once at startup and handed to both the admin router and the
//! scheduler task.

use std::sync::Arc;

use certkeeper_config::SchedulerConfig;
use certkeeper_store::KvStore;

use crate::acme::{AccountStore, CertificateStorage, DomainStore, IssuanceScheduler, ProtocolAdapter};
use crate::error::ManagerError;
use crate::metrics::Metrics;

/// Handles shared by the admin interface and the scheduler
#[derive(Clone)]
pub struct AppState {
    pub accounts: AccountStore,
    pub domains: DomainStore,
    pub adapter: Arc<dyn ProtocolAdapter>,
    pub scheduler: Arc<IssuanceScheduler>,
    pub metrics: Metrics,
}

impl AppState {
    /// Wire the stores, adapter and scheduler over one key-value store
    pub fn new(
        kv: Arc<KvStore>,
        adapter: Arc<dyn ProtocolAdapter>,
        certificates: Arc<CertificateStorage>,
        scheduler: SchedulerConfig,
    ) -> Result<Self, ManagerError> {
        let accounts = AccountStore::new(Arc::clone(&kv));
        let domains = DomainStore::new(kv);
        let metrics = Metrics::new()?;

        let scheduler = IssuanceScheduler::new(
            Arc::clone(&adapter),
            accounts.clone(),
            domains.clone(),
            certificates,
            metrics.clone(),
        )
        .with_config(scheduler);

        Ok(Self {
            accounts,
            domains,
            adapter,
            scheduler: Arc::new(scheduler),
            metrics,
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
