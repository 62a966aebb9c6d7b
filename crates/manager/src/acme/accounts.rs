//! Account store
//!
//! Accounts live under `account_<primary mail>` as JSON.

use std::sync::Arc;

use tracing::{debug, info};

use certkeeper_store::KvStore;

use super::error::StorageError;
use super::records::Account;

/// Key prefix shared by all account entries
pub const ACCOUNT_PREFIX: &str = "account_";

/// Store key for the account identified by `mail`
pub fn account_key(mail: &str) -> String {
    format!("{ACCOUNT_PREFIX}{mail}")
}

/// Persistent account registry
#[derive(Debug, Clone)]
pub struct AccountStore {
    kv: Arc<KvStore>,
}

impl AccountStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// Store or overwrite an account under its primary contact
    pub fn put(&self, account: &Account) -> Result<(), StorageError> {
        let mail = account.primary_mail();
        if mail.is_empty() {
            return Err(StorageError::AccountNotFound(
                "account has no contact address".to_string(),
            ));
        }

        let key = account_key(mail);
        let value = serde_json::to_vec(account)?;
        self.kv
            .update(|txn| txn.set(&key, &value))
            .map_err(StorageError::from)?;

        info!(mail = %mail, account_url = %account.account_url, "Saved ACME account");
        Ok(())
    }

    /// Load the account keyed by `mail`
    pub fn get(&self, mail: &str) -> Result<Account, StorageError> {
        let key = account_key(mail);
        let bytes = self
            .kv
            .view(|txn| txn.get(&key))
            .map_err(StorageError::from)?
            .ok_or_else(|| StorageError::AccountNotFound(mail.to_string()))?;

        let account: Account = serde_json::from_slice(&bytes)?;
        debug!(mail = %mail, "Loaded ACME account");
        Ok(account)
    }

    /// All accounts with their key material removed
    pub fn list_redacted(&self) -> Result<Vec<Account>, StorageError> {
        self.kv.view(|txn| {
            txn.scan_prefix(ACCOUNT_PREFIX)?
                .into_iter()
                .map(|(_, value)| {
                    serde_json::from_slice::<Account>(&value)
                        .map(|account| account.redacted())
                        .map_err(StorageError::from)
                })
                .collect()
        })
    }
}
