//! Transaction execution
//!
//! Every mutation of the store runs as one backend transaction: begin,
//! check predicates, resolve prefix deletes, apply deletes then puts,
//! commit. Dropping the transaction on any earlier error rolls it back, so
//! a failed call never leaves partial state. Nothing is retried here.

use crate::backend::{KvRead, KvTxn, TxnBackend, prefix_end};
use crate::path::KeyPath;
use crate::predicates::{self, Predicate};
use crate::scan;
use metakv_common::{Error, Result, TxnStage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Log a warning if `start` is older than `threshold`.
///
/// Returns whether the threshold was exceeded.
pub fn check_elapse_and_warn(start: Instant, threshold: Duration, message: &str) -> bool {
    let elapsed = start.elapsed();
    if elapsed > threshold {
        warn!("{}: slow operation, took {:?} (threshold {:?})", message, elapsed, threshold);
        return true;
    }
    false
}

/// Backend-level writes of one transaction.
///
/// Keys are namespaced backend keys and values are already encoded.
#[derive(Debug, Default)]
pub struct TxnOps {
    pub puts: Vec<(Vec<u8>, Vec<u8>)>,
    pub deletes: Vec<Vec<u8>>,
    /// Prefixes whose current keys are deleted inside the transaction
    pub delete_prefixes: Vec<Vec<u8>>,
}

impl TxnOps {
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty() && self.delete_prefixes.is_empty()
    }
}

fn read_error(err: Error) -> Error {
    match err {
        Error::Backend(source) => Error::transaction(TxnStage::Read, source),
        other => other,
    }
}

/// Runs units of work against an injected backend.
pub struct TxnExecutor<B> {
    backend: Arc<B>,
    timeout: Duration,
    slow_threshold: Duration,
    batch_size: usize,
}

impl<B: TxnBackend> TxnExecutor<B> {
    pub fn new(backend: Arc<B>, timeout: Duration, slow_threshold: Duration, batch_size: usize) -> Self {
        let batch_size = batch_size.clamp(1, backend.max_scan_limit().max(1));
        Self {
            backend,
            timeout,
            slow_threshold,
            batch_size,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Batch size for scans, within the backend ceiling
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run `f` over a fresh read snapshot.
    pub fn read<T>(&self, op: &str, f: impl FnOnce(&B::Snapshot) -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let snapshot = self.backend.snapshot(self.timeout)?;
        let result = f(&snapshot);
        check_elapse_and_warn(start, self.slow_threshold, op);
        result
    }

    /// Run one predicate-gated transaction.
    pub fn execute(&self, op: &str, ops: TxnOps, preds: &[Predicate], path: &KeyPath) -> Result<()> {
        let start = Instant::now();
        let result = self.run(ops, preds, path);
        check_elapse_and_warn(start, self.slow_threshold, op);
        if let Err(e) = &result
            && !e.is_predicate_failed()
        {
            warn!("{} failed: {}", op, e);
        }
        result
    }

    fn run(&self, ops: TxnOps, preds: &[Predicate], path: &KeyPath) -> Result<()> {
        let mut txn = self
            .backend
            .begin(self.timeout)
            .map_err(|e| Error::transaction(TxnStage::Begin, e))?;

        predicates::check_all(&txn, path, preds)?;

        let mut deletes = ops.deletes;
        for prefix in &ops.delete_prefixes {
            scan::walk(&txn, prefix, self.batch_size, |kv| {
                deletes.push(kv.key);
                Ok(())
            })
            .map_err(read_error)?;
        }

        debug!(
            "txn: puts={} deletes={} prefixes={} predicates={}",
            ops.puts.len(),
            deletes.len(),
            ops.delete_prefixes.len(),
            preds.len()
        );

        for key in &deletes {
            txn.delete(key)
                .map_err(|e| Error::transaction(TxnStage::Write, e))?;
        }
        for (key, value) in &ops.puts {
            txn.put(key, value)
                .map_err(|e| Error::transaction(TxnStage::Write, e))?;
        }

        txn.commit()
            .map_err(|e| Error::transaction(TxnStage::Commit, e))
    }

    /// Delete every key under `prefix`, one transaction per batch.
    ///
    /// Each batch commits atomically; the sweep as a whole does not.
    /// Returns the number of keys deleted.
    pub fn remove_prefix_batched(&self, op: &str, prefix: &[u8]) -> Result<usize> {
        let start = Instant::now();
        let end = prefix_end(prefix);
        let mut removed = 0;
        loop {
            let mut txn = self
                .backend
                .begin(self.timeout)
                .map_err(|e| Error::transaction(TxnStage::Begin, e))?;
            let batch = txn
                .scan(prefix, &end, self.batch_size)
                .map_err(|e| Error::transaction(TxnStage::Read, e))?;
            if batch.is_empty() {
                break;
            }
            let full = batch.len() == self.batch_size;
            for kv in &batch {
                txn.delete(&kv.key)
                    .map_err(|e| Error::transaction(TxnStage::Write, e))?;
            }
            txn.commit()
                .map_err(|e| Error::transaction(TxnStage::Commit, e))?;
            removed += batch.len();
            if !full {
                break;
            }
        }
        debug!("{}: removed {} keys", op, removed);
        check_elapse_and_warn(start, self.slow_threshold, op);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::faulty::FaultyBackend;
    use crate::backend::memory::MemoryBackend;
    use metakv_common::{BackendError, MemoryBackendConfig};

    const TIMEOUT: Duration = Duration::from_secs(5);
    const SLOW: Duration = Duration::from_secs(2);

    fn executor<B: TxnBackend>(backend: B) -> TxnExecutor<B> {
        TxnExecutor::new(Arc::new(backend), TIMEOUT, SLOW, 4)
    }

    fn puts(pairs: &[(&str, &str)]) -> TxnOps {
        TxnOps {
            puts: pairs
                .iter()
                .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
                .collect(),
            ..Default::default()
        }
    }

    fn get<B: TxnBackend>(exec: &TxnExecutor<B>, key: &str) -> Option<Vec<u8>> {
        exec.read("get", |snap| Ok(snap.get(key.as_bytes())?)).unwrap()
    }

    #[test]
    fn test_check_elapse_and_warn() {
        assert!(!check_elapse_and_warn(Instant::now(), Duration::from_secs(60), "fast"));
        let start = Instant::now() - Duration::from_millis(50);
        assert!(check_elapse_and_warn(start, Duration::from_millis(1), "slow"));
    }

    #[test]
    fn test_batch_size_clamped_to_ceiling() {
        let backend = MemoryBackend::with_config(MemoryBackendConfig { max_scan_limit: 3 });
        let exec = TxnExecutor::new(Arc::new(backend), TIMEOUT, SLOW, 256);
        assert_eq!(exec.batch_size(), 3);
    }

    #[test]
    fn test_execute_applies_all() {
        let exec = executor(MemoryBackend::new());
        let path = KeyPath::new("/r");
        exec.execute("save", puts(&[("/r/a", "1"), ("/r/b", "2")]), &[], &path)
            .unwrap();
        assert_eq!(get(&exec, "/r/a"), Some(b"1".to_vec()));
        assert_eq!(get(&exec, "/r/b"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_empty_unit_is_noop() {
        let exec = executor(MemoryBackend::new());
        let ops = TxnOps::default();
        assert!(ops.is_empty());
        exec.execute("noop", ops, &[], &KeyPath::new("/r")).unwrap();
        assert!(exec.backend().is_empty());
    }

    #[test]
    fn test_deletes_before_puts() {
        let exec = executor(MemoryBackend::new());
        let path = KeyPath::new("/r");
        exec.execute("save", puts(&[("/r/a", "old")]), &[], &path)
            .unwrap();

        let mut ops = puts(&[("/r/a", "new")]);
        ops.deletes.push(b"/r/a".to_vec());
        exec.execute("swap", ops, &[], &path).unwrap();
        assert_eq!(get(&exec, "/r/a"), Some(b"new".to_vec()));
    }

    #[test]
    fn test_delete_prefixes_resolved_in_txn() {
        let exec = executor(MemoryBackend::new());
        let path = KeyPath::new("/r");
        let pairs: Vec<(String, String)> = (0..10)
            .map(|i| (format!("/r/p/{i}"), "v".to_string()))
            .collect();
        let refs: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        exec.execute("seed", puts(&refs), &[], &path).unwrap();
        exec.execute("seed", puts(&[("/r/q", "v")]), &[], &path).unwrap();

        let ops = TxnOps {
            delete_prefixes: vec![b"/r/p/".to_vec()],
            ..Default::default()
        };
        exec.execute("sweep", ops, &[], &path).unwrap();
        assert_eq!(exec.backend().len(), 1);
        assert_eq!(get(&exec, "/r/q"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_predicate_failure_leaves_state() {
        let exec = executor(MemoryBackend::new());
        let path = KeyPath::new("/r");
        exec.execute("seed", puts(&[("/r/lease", "1")]), &[], &path)
            .unwrap();

        let err = exec
            .execute(
                "cond",
                puts(&[("/r/x", "1")]),
                &[Predicate::value_equal("lease", "2")],
                &path,
            )
            .unwrap_err();
        assert!(err.is_predicate_failed());
        assert_eq!(get(&exec, "/r/x"), None);
    }

    #[test]
    fn test_begin_failure() {
        let backend = FaultyBackend::new(MemoryBackend::new());
        backend.fail_begin(true);
        let exec = executor(backend);
        let err = exec
            .execute("save", puts(&[("/r/a", "1")]), &[], &KeyPath::new("/r"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction {
                stage: TxnStage::Begin,
                source: BackendError::Unavailable(_)
            }
        ));
        assert!(exec.backend().inner().is_empty());
    }

    #[test]
    fn test_commit_failure() {
        let backend = FaultyBackend::new(MemoryBackend::new());
        backend.fail_commit(true);
        let exec = executor(backend);
        let err = exec
            .execute("save", puts(&[("/r/a", "1")]), &[], &KeyPath::new("/r"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction {
                stage: TxnStage::Commit,
                ..
            }
        ));
        assert!(exec.backend().inner().is_empty());
    }

    #[test]
    fn test_write_rejection_is_write_stage() {
        let exec = executor(MemoryBackend::new());
        let err = exec
            .execute("save", puts(&[("/r/a", "")]), &[], &KeyPath::new("/r"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction {
                stage: TxnStage::Write,
                source: BackendError::EmptyValue { .. }
            }
        ));
    }

    #[test]
    fn test_remove_prefix_batched() {
        let exec = executor(MemoryBackend::new());
        let path = KeyPath::new("/r");
        let pairs: Vec<(String, String)> = (0..9)
            .map(|i| (format!("/r/p/{i}"), "v".to_string()))
            .collect();
        let refs: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        exec.execute("seed", puts(&refs), &[], &path).unwrap();
        exec.execute("seed", puts(&[("/r/pz", "v")]), &[], &path).unwrap();

        assert_eq!(exec.remove_prefix_batched("sweep", b"/r/p/").unwrap(), 9);
        assert_eq!(exec.backend().len(), 1);
        assert_eq!(exec.remove_prefix_batched("sweep", b"/r/p/").unwrap(), 0);
    }
}
