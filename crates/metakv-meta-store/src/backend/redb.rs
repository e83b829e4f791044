//! Persistent backend over redb.
//!
//! redb admits one write transaction at a time, so read-write transactions
//! are serialized by the database and never report a conflict. Reads go
//! through MVCC read transactions. The scan ceiling is enforced here to
//! give callers the same paging contract as a remote store.
//!
//! `begin` blocks while another write transaction is open and redb offers
//! no way to give up early. The wait counts against the deadline: a writer
//! that only gets the lock after its deadline fails with `Timeout` and
//! rolls back, but the thread still waits for the lock first.

use super::{BackendResult, Deadline, KeyValue, KvRead, KvTxn, TxnBackend, check_scan_limit};
use ::redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use metakv_common::{BackendError, RedbBackendConfig};
use std::fmt::Display;
use std::ops::Bound;
use std::time::Duration;
use tracing::{info, warn};

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("metakv");

fn storage(e: impl Display) -> BackendError {
    BackendError::storage(e.to_string())
}

fn scan_table<T>(table: &T, start: &[u8], end: &[u8], limit: usize) -> BackendResult<Vec<KeyValue>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut result = Vec::new();
    if limit == 0 {
        return Ok(result);
    }
    let upper = if end.is_empty() {
        Bound::Unbounded
    } else {
        Bound::Excluded(end)
    };
    for entry in table
        .range::<&[u8]>((Bound::Included(start), upper))
        .map_err(storage)?
    {
        let (key, value) = entry.map_err(storage)?;
        result.push(KeyValue::new(key.value(), value.value()));
        if result.len() >= limit {
            break;
        }
    }
    Ok(result)
}

/// Persistent transactional backend backed by redb
pub struct RedbBackend {
    db: Database,
    max_scan_limit: usize,
}

impl RedbBackend {
    /// Open (or create) the redb database at the configured path.
    pub fn open(config: &RedbBackendConfig) -> BackendResult<Self> {
        let path = config.path.as_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }
        let db = Database::create(path).map_err(storage)?;

        // Create the table eagerly so later read txns don't fail
        let write_txn = db.begin_write().map_err(storage)?;
        {
            let _t = write_txn.open_table(TABLE).map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;

        info!("Opened redb backend at {:?}", path);
        Ok(Self {
            db,
            max_scan_limit: config.max_scan_limit,
        })
    }
}

impl TxnBackend for RedbBackend {
    type Snapshot = RedbSnapshot;
    type Txn = RedbTxn;

    fn begin(&self, timeout: Duration) -> BackendResult<RedbTxn> {
        let deadline = Deadline::after(timeout);
        let txn = self.db.begin_write().map_err(storage)?;
        if let Err(e) = deadline.check() {
            warn!("redb write lock acquired after deadline ({:?})", timeout);
            return Err(e);
        }
        Ok(RedbTxn {
            txn,
            deadline,
            max_scan_limit: self.max_scan_limit,
        })
    }

    fn snapshot(&self, timeout: Duration) -> BackendResult<RedbSnapshot> {
        let deadline = Deadline::after(timeout);
        let txn = self.db.begin_read().map_err(storage)?;
        Ok(RedbSnapshot {
            txn,
            deadline,
            max_scan_limit: self.max_scan_limit,
        })
    }

    fn max_scan_limit(&self) -> usize {
        self.max_scan_limit
    }
}

/// Read-only snapshot of a [`RedbBackend`]
pub struct RedbSnapshot {
    txn: ReadTransaction,
    deadline: Deadline,
    max_scan_limit: usize,
}

impl KvRead for RedbSnapshot {
    fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        self.deadline.check()?;
        let table = self.txn.open_table(TABLE).map_err(storage)?;
        Ok(table.get(key).map_err(storage)?.map(|v| v.value().to_vec()))
    }

    fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> BackendResult<Vec<KeyValue>> {
        self.deadline.check()?;
        check_scan_limit(limit, self.max_scan_limit)?;
        let table = self.txn.open_table(TABLE).map_err(storage)?;
        scan_table(&table, start, end, limit)
    }
}

/// Read-write transaction on a [`RedbBackend`]; aborted on drop
pub struct RedbTxn {
    txn: WriteTransaction,
    deadline: Deadline,
    max_scan_limit: usize,
}

impl KvRead for RedbTxn {
    fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        self.deadline.check()?;
        let table = self.txn.open_table(TABLE).map_err(storage)?;
        let value = table.get(key).map_err(storage)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> BackendResult<Vec<KeyValue>> {
        self.deadline.check()?;
        check_scan_limit(limit, self.max_scan_limit)?;
        let table = self.txn.open_table(TABLE).map_err(storage)?;
        scan_table(&table, start, end, limit)
    }
}

impl KvTxn for RedbTxn {
    fn put(&mut self, key: &[u8], value: &[u8]) -> BackendResult<()> {
        self.deadline.check()?;
        let mut table = self.txn.open_table(TABLE).map_err(storage)?;
        table.insert(key, value).map_err(storage)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> BackendResult<()> {
        self.deadline.check()?;
        let mut table = self.txn.open_table(TABLE).map_err(storage)?;
        table.remove(key).map_err(storage)?;
        Ok(())
    }

    fn commit(self) -> BackendResult<()> {
        self.deadline.check()?;
        self.txn.commit().map_err(storage)
    }
}
