//! In-process MVCC backend
//!
//! Every key keeps a short chain of committed versions so that snapshots
//! and transactions read a single point in time. Commits are optimistic:
//! a transaction fails with `Conflict` if any key it wrote, or read with
//! `get`, was committed by someone else after the transaction started.
//! Like the distributed stores it stands in for, it cannot hold a
//! zero-length value and caps the size of a single scan.

use super::{
    BackendResult, Deadline, KeyValue, KvRead, KvTxn, TxnBackend, check_scan_limit, in_range,
};
use metakv_common::{BackendError, MemoryBackendConfig};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One committed version of a key. `None` marks a delete.
#[derive(Clone, Debug)]
struct Version {
    commit_ts: u64,
    value: Option<Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    /// Version chains, oldest first
    data: BTreeMap<Vec<u8>, Vec<Version>>,
    /// Timestamp of the latest commit
    ts: u64,
    /// Read timestamps of open snapshots and transactions
    active: BTreeMap<u64, usize>,
    /// Keys whose pruning waits for readers older than the commit timestamp
    deferred: BTreeMap<u64, Vec<Vec<u8>>>,
}

impl Inner {
    fn visible(&self, key: &[u8], ts: u64) -> Option<&Vec<u8>> {
        self.data
            .get(key)
            .and_then(|chain| chain.iter().rev().find(|v| v.commit_ts <= ts))
            .and_then(|v| v.value.as_ref())
    }

    fn latest_commit(&self, key: &[u8]) -> u64 {
        self.data
            .get(key)
            .and_then(|chain| chain.last())
            .map_or(0, |v| v.commit_ts)
    }

    fn register(&mut self) -> u64 {
        *self.active.entry(self.ts).or_insert(0) += 1;
        self.ts
    }

    fn unregister(&mut self, ts: u64) {
        if let Some(count) = self.active.get_mut(&ts) {
            *count -= 1;
            if *count == 0 {
                self.active.remove(&ts);
                self.prune_released();
            }
        }
    }

    /// Oldest timestamp any open reader may still observe
    fn horizon(&self) -> u64 {
        self.active.keys().next().copied().unwrap_or(self.ts)
    }

    /// Prune keys whose deferred commits are now at or below the horizon.
    fn prune_released(&mut self) {
        let pinned = self.deferred.split_off(&self.horizon().saturating_add(1));
        let ready = std::mem::replace(&mut self.deferred, pinned);
        for key in ready.into_values().flatten() {
            self.prune(&key);
        }
    }

    /// Prune `key` now, and again once readers pinning its history close.
    fn prune_or_defer(&mut self, key: &[u8], commit_ts: u64) {
        self.prune(key);
        let pinned = self
            .data
            .get(key)
            .is_some_and(|chain| chain.len() > 1 || chain[0].value.is_none());
        if pinned {
            self.deferred.entry(commit_ts).or_default().push(key.to_vec());
        }
    }

    /// Drop versions of `key` no open reader can observe any more.
    fn prune(&mut self, key: &[u8]) {
        let horizon = self.horizon();
        let Some(chain) = self.data.get_mut(key) else {
            return;
        };
        let keep_from = chain
            .iter()
            .rposition(|v| v.commit_ts <= horizon)
            .unwrap_or(0);
        chain.drain(..keep_from);
        if chain.len() == 1 && chain[0].value.is_none() && chain[0].commit_ts <= horizon {
            self.data.remove(key);
        }
    }
}

/// In-process transactional backend
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<RwLock<Inner>>,
    config: MemoryBackendConfig,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend with the default scan ceiling
    pub fn new() -> Self {
        Self::with_config(MemoryBackendConfig::default())
    }

    /// Create an empty backend
    pub fn with_config(config: MemoryBackendConfig) -> Self {
        info!(
            "Created in-memory backend (max_scan_limit={})",
            config.max_scan_limit
        );
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            config,
        }
    }

    /// Number of live keys at the latest commit
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner
            .data
            .keys()
            .filter(|k| inner.visible(k, inner.ts).is_some())
            .count()
    }

    /// Check if no live key exists
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn open_view(&self, timeout: Duration) -> BackendResult<ReadView> {
        let deadline = Deadline::after(timeout);
        deadline.check()?;
        let read_ts = self.inner.write().register();
        Ok(ReadView {
            inner: Arc::clone(&self.inner),
            read_ts,
            released: false,
            deadline,
            max_scan_limit: self.config.max_scan_limit,
        })
    }
}

impl TxnBackend for MemoryBackend {
    type Snapshot = MemorySnapshot;
    type Txn = MemoryTxn;

    fn begin(&self, timeout: Duration) -> BackendResult<MemoryTxn> {
        let view = self.open_view(timeout)?;
        debug!("begin: read_ts={}", view.read_ts);
        Ok(MemoryTxn {
            view,
            writes: BTreeMap::new(),
            reads: Mutex::new(BTreeSet::new()),
        })
    }

    fn snapshot(&self, timeout: Duration) -> BackendResult<MemorySnapshot> {
        Ok(MemorySnapshot {
            view: self.open_view(timeout)?,
        })
    }

    fn max_scan_limit(&self) -> usize {
        self.config.max_scan_limit
    }
}

/// Registered point-in-time view, released on drop
struct ReadView {
    inner: Arc<RwLock<Inner>>,
    read_ts: u64,
    released: bool,
    deadline: Deadline,
    max_scan_limit: usize,
}

impl ReadView {
    fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        self.deadline.check()?;
        Ok(self.inner.read().visible(key, self.read_ts).cloned())
    }

    /// Scan committed data, overlaid with `pending` writes.
    fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
        pending: &BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    ) -> BackendResult<Vec<KeyValue>> {
        self.deadline.check()?;
        check_scan_limit(limit, self.max_scan_limit)?;

        let inner = self.inner.read();
        let mut committed = inner
            .data
            .range(start.to_vec()..)
            .take_while(|(k, _)| in_range(k, start, end))
            .map(|(k, _)| (k, inner.visible(k, self.read_ts)))
            .peekable();
        let mut buffered = pending
            .range(start.to_vec()..)
            .take_while(|(k, _)| in_range(k, start, end))
            .map(|(k, v)| (k, v.as_ref()))
            .peekable();

        // Ordered merge; a pending write shadows the committed version.
        let mut result = Vec::new();
        while result.len() < limit {
            let order = match (committed.peek(), buffered.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((ck, _)), Some((bk, _))) => ck.cmp(bk),
            };
            let next = match order {
                Ordering::Less => committed.next(),
                Ordering::Greater => buffered.next(),
                Ordering::Equal => {
                    committed.next();
                    buffered.next()
                }
            };
            if let Some((key, Some(value))) = next {
                result.push(KeyValue::new(key.clone(), value.clone()));
            }
        }
        Ok(result)
    }
}

impl Drop for ReadView {
    fn drop(&mut self) {
        if !self.released {
            self.inner.write().unregister(self.read_ts);
        }
    }
}

/// Read-only snapshot of a [`MemoryBackend`]
pub struct MemorySnapshot {
    view: ReadView,
}

impl KvRead for MemorySnapshot {
    fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        self.view.get(key)
    }

    fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> BackendResult<Vec<KeyValue>> {
        self.view.scan(start, end, limit, &BTreeMap::new())
    }
}

/// Optimistic read-write transaction on a [`MemoryBackend`]
pub struct MemoryTxn {
    view: ReadView,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// Keys read with `get`, validated at commit
    reads: Mutex<BTreeSet<Vec<u8>>>,
}

impl KvRead for MemoryTxn {
    fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        if let Some(pending) = self.writes.get(key) {
            self.view.deadline.check()?;
            return Ok(pending.clone());
        }
        self.reads.lock().insert(key.to_vec());
        self.view.get(key)
    }

    fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> BackendResult<Vec<KeyValue>> {
        self.view.scan(start, end, limit, &self.writes)
    }
}

impl KvTxn for MemoryTxn {
    fn put(&mut self, key: &[u8], value: &[u8]) -> BackendResult<()> {
        self.view.deadline.check()?;
        if value.is_empty() {
            return Err(BackendError::EmptyValue {
                key: String::from_utf8_lossy(key).into_owned(),
            });
        }
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> BackendResult<()> {
        self.view.deadline.check()?;
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    fn commit(mut self) -> BackendResult<()> {
        self.view.deadline.check()?;
        if self.writes.is_empty() {
            return Ok(());
        }

        let mut inner = self.view.inner.write();
        let read_ts = self.view.read_ts;
        let reads = self.reads.lock();
        for key in self.writes.keys().chain(reads.iter()) {
            if inner.latest_commit(key) > read_ts {
                return Err(BackendError::Conflict {
                    key: String::from_utf8_lossy(key).into_owned(),
                });
            }
        }

        // Our own read point no longer pins old versions.
        inner.unregister(read_ts);
        self.view.released = true;

        inner.ts += 1;
        let commit_ts = inner.ts;
        for (key, value) in &self.writes {
            inner.data.entry(key.clone()).or_default().push(Version {
                commit_ts,
                value: value.clone(),
            });
        }
        for key in self.writes.keys() {
            inner.prune_or_defer(key, commit_ts);
        }
        debug!(
            "commit: read_ts={}, commit_ts={}, writes={}",
            read_ts,
            commit_ts,
            self.writes.len()
        );
        Ok(())
    }
}
