//! Fault-injecting backend wrapper for tests

use super::memory::{MemoryBackend, MemorySnapshot, MemoryTxn};
use super::{BackendResult, KeyValue, KvRead, KvTxn, TxnBackend};
use metakv_common::BackendError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Wraps a [`MemoryBackend`] and fails `begin` or `commit` on demand.
#[derive(Clone, Default)]
pub struct FaultyBackend {
    inner: MemoryBackend,
    fail_begin: Arc<AtomicBool>,
    fail_commit: Arc<AtomicBool>,
}

impl FaultyBackend {
    pub fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn fail_begin(&self, fail: bool) {
        self.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }
}

impl TxnBackend for FaultyBackend {
    type Snapshot = MemorySnapshot;
    type Txn = FaultyTxn;

    fn begin(&self, timeout: Duration) -> BackendResult<FaultyTxn> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("injected begin failure"));
        }
        Ok(FaultyTxn {
            txn: self.inner.begin(timeout)?,
            fail_commit: Arc::clone(&self.fail_commit),
        })
    }

    fn snapshot(&self, timeout: Duration) -> BackendResult<MemorySnapshot> {
        self.inner.snapshot(timeout)
    }

    fn max_scan_limit(&self) -> usize {
        self.inner.max_scan_limit()
    }
}

pub struct FaultyTxn {
    txn: MemoryTxn,
    fail_commit: Arc<AtomicBool>,
}

impl KvRead for FaultyTxn {
    fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        self.txn.get(key)
    }

    fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> BackendResult<Vec<KeyValue>> {
        self.txn.scan(start, end, limit)
    }
}

impl KvTxn for FaultyTxn {
    fn put(&mut self, key: &[u8], value: &[u8]) -> BackendResult<()> {
        self.txn.put(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> BackendResult<()> {
        self.txn.delete(key)
    }

    fn commit(self) -> BackendResult<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("injected commit failure"));
        }
        self.txn.commit()
    }
}
