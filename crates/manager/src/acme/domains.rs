//! Domain record store
//!
//! Records live under `domain_<name>` as JSON. Creation is an atomic
//! insert-new inside a single write transaction, so two concurrent creators
//! of the same name cannot both succeed.

use std::sync::Arc;

use tracing::{debug, info, warn};

use certkeeper_store::{KvStore, StoreError};

use super::error::StorageError;
use super::records::{DomainRecord, IssueStatus};

/// Key prefix shared by all domain entries
pub const DOMAIN_PREFIX: &str = "domain_";

/// Store key for `domain`
pub fn domain_key(domain: &str) -> String {
    format!("{DOMAIN_PREFIX}{domain}")
}

/// Persistent per-domain issuance records
#[derive(Debug, Clone)]
pub struct DomainStore {
    kv: Arc<KvStore>,
}

impl DomainStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// Create a record; fails if one already exists for the domain
    pub fn create(&self, record: &DomainRecord) -> Result<(), StorageError> {
        let key = domain_key(&record.domain);
        let value = serde_json::to_vec(record)?;

        self.kv
            .update(|txn| txn.insert_new(&key, &value))
            .map_err(|e| match e {
                StoreError::KeyExists(_) => StorageError::DomainExists(record.domain.clone()),
                other => StorageError::Store(other),
            })?;

        info!(
            domain = %record.domain,
            account = %record.account_mail,
            "Created issuance record"
        );
        Ok(())
    }

    /// Unconditionally overwrite the record for its domain
    pub fn put(&self, record: &DomainRecord) -> Result<(), StorageError> {
        let key = domain_key(&record.domain);
        let value = serde_json::to_vec(record)?;
        Ok(self.kv.update(|txn| txn.set(&key, &value))?)
    }

    /// Overwrite the record only if its key still exists
    ///
    /// Returns `false` when the record was deleted in the meantime; nothing is
    /// written in that case.
    pub fn update_existing(&self, record: &DomainRecord) -> Result<bool, StorageError> {
        let key = domain_key(&record.domain);
        let value = serde_json::to_vec(record)?;
        self.kv.update(|txn| {
            if !txn.contains_key(&key)? {
                return Ok::<_, StorageError>(false);
            }
            txn.set(&key, &value)?;
            Ok(true)
        })
    }

    /// Load the record for `domain`
    pub fn get(&self, domain: &str) -> Result<DomainRecord, StorageError> {
        let key = domain_key(domain);
        let bytes = self
            .kv
            .view(|txn| txn.get(&key))
            .map_err(StorageError::from)?
            .ok_or_else(|| StorageError::DomainNotFound(domain.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Remove the record for `domain`; removing a missing record is a no-op
    pub fn delete(&self, domain: &str) -> Result<(), StorageError> {
        let key = domain_key(domain);
        self.kv
            .update(|txn| txn.delete(&key))
            .map_err(StorageError::from)?;
        info!(domain = %domain, "Deleted issuance record");
        Ok(())
    }

    /// Up to `limit` records accepted by `filter`, in store key order
    ///
    /// Each entry carries the store key it was read from. Values that fail
    /// to decode are logged and skipped.
    pub fn scan(
        &self,
        limit: usize,
        filter: impl Fn(&DomainRecord) -> bool,
    ) -> Result<Vec<(DomainRecord, String)>, StorageError> {
        self.kv.view(|txn| {
            let mut selected = Vec::with_capacity(limit);
            for (key, value) in txn.scan_prefix(DOMAIN_PREFIX)? {
                if selected.len() >= limit {
                    break;
                }
                match serde_json::from_slice::<DomainRecord>(&value) {
                    Ok(record) if filter(&record) => selected.push((record, key)),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(key = %key, error = %e, "Skipping undecodable domain record");
                    }
                }
            }
            debug!(selected = selected.len(), limit, "Scanned domain records");
            Ok(selected)
        })
    }

    /// Up to `limit` records that are not yet `available`
    pub fn scan_due(&self, limit: usize) -> Result<Vec<(DomainRecord, String)>, StorageError> {
        self.scan(limit, |record| record.status != IssueStatus::Available)
    }

    /// All records in store key order
    pub fn list(&self) -> Result<Vec<DomainRecord>, StorageError> {
        self.kv.view(|txn| {
            txn.scan_prefix(DOMAIN_PREFIX)?
                .into_iter()
                .map(|(_, value)| serde_json::from_slice(&value).map_err(StorageError::from))
                .collect()
        })
    }
}
