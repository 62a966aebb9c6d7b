//! Transactional key-value store
//!
//! An ordered key-value table on top of an embedded SQLite database, used by
//! certkeeper to persist accounts and domain issuance records.
//!
//! # Transactions
//!
//! - [`KvStore::view`] runs a closure against a consistent read view.
//! - [`KvStore::update`] runs a closure inside an immediate write transaction.
//!   Writes become visible (and durable) only if the closure returns `Ok`;
//!   otherwise the transaction is rolled back. Write transactions are
//!   serialized, so a read-then-write inside one `update` call is atomic with
//!   respect to other writers.
//!
//! # Durability
//!
//! The database runs in WAL mode with `synchronous = FULL`, so a committed
//! transaction survives a crash and an interrupted one leaves no trace.
//!
//! ```text
//! storage_dir/
//! ├── certkeeper.db       # kv(key TEXT PRIMARY KEY, value BLOB)
//! └── certkeeper.db-wal   # Write-ahead log
//! ```

mod error;

pub use error::StoreError;

use std::fs;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, trace};

/// Database file name inside the storage directory
pub const DATABASE_FILE: &str = "certkeeper.db";

/// How long a statement waits on a lock held by another connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Ordered, transactional key-value store
#[derive(Debug)]
pub struct KvStore {
    conn: Mutex<Connection>,
}

impl KvStore {
    /// Open (or create) a store rooted at `dir`
    ///
    /// Creates the directory with restrictive permissions (0700 on Unix) and
    /// the key-value table if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened or initialized.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
        }

        let path = dir.join(DATABASE_FILE);
        let conn = Connection::open(&path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }

        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        info!(
            storage_path = %path.display(),
            journal_mode = %journal_mode,
            entries = store.count()?,
            "Opened key-value store"
        );
        Ok(store)
    }

    /// Create a store that lives only in memory
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` against a read view of the store
    pub fn view<T, E>(&self, f: impl FnOnce(&ReadTxn<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let guard = self.conn.lock();
        let tx = guard
            .unchecked_transaction()
            .map_err(|e| E::from(StoreError::from(e)))?;
        let txn = ReadTxn { conn: &tx };
        f(&txn)
    }

    /// Run `f` inside a write transaction
    ///
    /// The transaction commits only when `f` returns `Ok`. A failed commit is
    /// returned as an error and leaves the store unchanged.
    pub fn update<T, E>(&self, f: impl FnOnce(&mut WriteTxn<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut guard = self.conn.lock();
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| E::from(StoreError::from(e)))?;

        let (value, changes) = {
            let mut txn = WriteTxn {
                conn: &tx,
                changes: 0,
            };
            let value = f(&mut txn)?;
            (value, txn.changes)
        };

        if changes == 0 {
            return Ok(value);
        }

        tx.commit().map_err(|e| E::from(StoreError::from(e)))?;
        trace!(changes, "Committed write transaction");
        Ok(value)
    }

    /// Number of stored keys
    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY NOT NULL,
            value BLOB NOT NULL
        ) WITHOUT ROWID",
        [],
    )?;
    debug!("Key-value schema ready");
    Ok(())
}

fn get(conn: &Connection, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    Ok(conn
        .prepare_cached("SELECT value FROM kv WHERE key = ?1")?
        .query_row([key], |row| row.get(0))
        .optional()?)
}

/// Read view handed to [`KvStore::view`]
pub struct ReadTxn<'a> {
    conn: &'a Connection,
}

impl ReadTxn<'_> {
    /// Get the value stored under `key`
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        get(self.conn, key)
    }

    /// All entries whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key")?;
        let mut rows = stmt.query([prefix])?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, row.get(1)?));
        }
        Ok(entries)
    }
}

/// Write transaction handed to [`KvStore::update`]
pub struct WriteTxn<'a> {
    conn: &'a Connection,
    /// Statements that modified a row
    changes: usize,
}

impl WriteTxn<'_> {
    /// Get the value under `key`, including writes made in this transaction
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        get(self.conn, key)
    }

    /// Whether `key` currently holds a value
    pub fn contains_key(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .prepare_cached("SELECT 1 FROM kv WHERE key = ?1")?
            .exists([key])?)
    }

    /// Write `value` under `key`, replacing any previous value
    pub fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.changes += self
            .conn
            .prepare_cached(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?
            .execute(params![key, value])?;
        Ok(())
    }

    /// Write `value` under `key`; fails if `key` already holds a value
    pub fn insert_new(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let inserted = self
            .conn
            .prepare_cached(
                "INSERT INTO kv (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING",
            )?
            .execute(params![key, value])?;
        if inserted == 0 {
            return Err(StoreError::KeyExists(key.to_string()));
        }
        self.changes += inserted;
        Ok(())
    }

    /// Remove `key`; deleting a missing key is not an error
    pub fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        self.changes += self
            .conn
            .prepare_cached("DELETE FROM kv WHERE key = ?1")?
            .execute([key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn get_owned(store: &KvStore, key: &str) -> Option<Vec<u8>> {
        store.view(|txn| txn.get(key)).unwrap()
    }

    #[test]
    fn test_set_and_get() {
        let store = KvStore::in_memory().unwrap();

        store
            .update(|txn| txn.set("domain_a.com", b"one"))
            .unwrap();

        assert_eq!(get_owned(&store, "domain_a.com"), Some(b"one".to_vec()));
        assert_eq!(get_owned(&store, "domain_b.com"), None);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_failed_transaction_discards_writes() {
        let store = KvStore::in_memory().unwrap();

        let result = store.update(|txn| {
            txn.set("key", b"value")?;
            Err::<(), _>(StoreError::KeyExists("abort".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_insert_new_rejects_existing_key() {
        let store = KvStore::in_memory().unwrap();

        store
            .update(|txn| txn.insert_new("domain_foo.com", b"first"))
            .unwrap();

        let second = store.update(|txn| txn.insert_new("domain_foo.com", b"second"));
        assert!(matches!(second, Err(StoreError::KeyExists(key)) if key == "domain_foo.com"));

        assert_eq!(get_owned(&store, "domain_foo.com"), Some(b"first".to_vec()));
    }

    #[test]
    fn test_write_txn_sees_own_writes() {
        let store = KvStore::in_memory().unwrap();

        store
            .update(|txn| {
                txn.set("k", b"v")?;
                assert_eq!(txn.get("k")?, Some(b"v".to_vec()));
                txn.delete("k")?;
                assert!(!txn.contains_key("k")?);
                Ok::<_, StoreError>(())
            })
            .unwrap();

        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_scan_prefix_in_key_order() {
        let store = KvStore::in_memory().unwrap();

        store
            .update(|txn| {
                txn.set("domain_c.com", b"c")?;
                txn.set("account_a@x.com", b"acc")?;
                txn.set("domain_a.com", b"a")?;
                txn.set("domain_b.com", b"b")?;
                txn.set("domaix", b"other")
            })
            .unwrap();

        let keys: Vec<String> = store
            .view(|txn| {
                Ok::<_, StoreError>(
                    txn.scan_prefix("domain_")?
                        .into_iter()
                        .map(|(key, _)| key)
                        .collect(),
                )
            })
            .unwrap();

        assert_eq!(keys, vec!["domain_a.com", "domain_b.com", "domain_c.com"]);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = KvStore::open(temp_dir.path()).unwrap();
            store
                .update(|txn| {
                    txn.set("account_a@x.com", b"{\"k\":1}")?;
                    txn.set("domain_foo.com", &[0u8, 159, 146, 150])
                })
                .unwrap();
            store.update(|txn| txn.delete("account_a@x.com")).unwrap();
        }

        let reopened = KvStore::open(temp_dir.path()).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        assert_eq!(
            get_owned(&reopened, "domain_foo.com"),
            Some(vec![0u8, 159, 146, 150])
        );
        assert!(temp_dir.path().join(DATABASE_FILE).exists());
    }

    #[test]
    fn test_rejected_commit_leaves_store_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::open(temp_dir.path()).unwrap();
        store.update(|txn| txn.set("domain_foo.com", b"old")).unwrap();

        // A second connection installs a constraint the store must honor
        let other = Connection::open(temp_dir.path().join(DATABASE_FILE)).unwrap();
        other
            .execute_batch(
                "CREATE TRIGGER reject_new BEFORE UPDATE ON kv
                 WHEN CAST(NEW.value AS TEXT) = 'new'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let result = store.update(|txn| {
            txn.set("domain_bar.com", b"bar")?;
            txn.set("domain_foo.com", b"new")
        });

        assert!(matches!(result, Err(StoreError::Database(_))));
        assert_eq!(get_owned(&store, "domain_foo.com"), Some(b"old".to_vec()));
        assert_eq!(get_owned(&store, "domain_bar.com"), None);
    }
}
