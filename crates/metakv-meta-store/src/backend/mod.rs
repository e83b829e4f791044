//! Transactional key-value backend interface
//!
//! The metadata store consumes a backend through three traits:
//!
//! - [`TxnBackend`] opens read snapshots and read-write transactions, each
//!   bounded by a deadline supplied per call
//! - [`KvRead`] is the consistent read view both of them expose
//! - [`KvTxn`] buffers puts and deletes until `commit`
//!
//! Scans are bounded: a backend rejects any request above its
//! [`TxnBackend::max_scan_limit`]. Dropping a transaction without committing
//! it rolls it back.

pub mod memory;
pub mod redb;

#[cfg(test)]
pub(crate) mod faulty;

use metakv_common::BackendError;
use std::time::{Duration, Instant};

/// Result type for raw backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Key-value pair returned by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Consistent read view over the backend.
pub trait KvRead {
    /// Get the value for a key, `None` if absent.
    fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>>;

    /// Return up to `limit` pairs with `start <= key < end`, in key order.
    ///
    /// An empty `end` means no upper bound. `limit` above the backend's
    /// maximum fails with [`BackendError::ScanLimitExceeded`].
    fn scan(&self, start: &[u8], end: &[u8], limit: usize) -> BackendResult<Vec<KeyValue>>;
}

/// Read-write transaction. Reads observe the transaction's own writes.
pub trait KvTxn: KvRead {
    fn put(&mut self, key: &[u8], value: &[u8]) -> BackendResult<()>;

    fn delete(&mut self, key: &[u8]) -> BackendResult<()>;

    /// Atomically apply every buffered write, or none of them.
    fn commit(self) -> BackendResult<()>;
}

/// Transactional key-value backend.
pub trait TxnBackend: Send + Sync {
    type Snapshot: KvRead;
    type Txn: KvTxn;

    /// Begin a read-write transaction that must finish within `timeout`.
    fn begin(&self, timeout: Duration) -> BackendResult<Self::Txn>;

    /// Open a read-only snapshot that must finish within `timeout`.
    fn snapshot(&self, timeout: Duration) -> BackendResult<Self::Snapshot>;

    /// Hard ceiling on the `limit` of a single scan.
    fn max_scan_limit(&self) -> usize;
}

/// Point in time after which backend calls fail with `Timeout`.
#[derive(Clone, Copy, Debug)]
pub struct Deadline(Instant);

impl Deadline {
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn check(&self) -> BackendResult<()> {
        if Instant::now() >= self.0 {
            Err(BackendError::Timeout)
        } else {
            Ok(())
        }
    }
}

/// Validate a scan request against a backend ceiling.
pub(crate) fn check_scan_limit(limit: usize, max: usize) -> BackendResult<()> {
    if limit > max {
        return Err(BackendError::ScanLimitExceeded { limit, max });
    }
    Ok(())
}

/// Return the key immediately after the given key.
///
/// Appending a zero byte gives the smallest key strictly greater than the
/// input in lexicographic order.
#[must_use]
pub fn key_after(key: &[u8]) -> Vec<u8> {
    let mut result = key.to_vec();
    result.push(0);
    result
}

/// Return the exclusive end key for a prefix range scan.
///
/// Increments the last non-0xFF byte of the prefix. An empty result means
/// "no upper bound".
#[must_use]
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return end;
        }
        end.pop();
    }
    end
}

/// Whether `key` falls in `[start, end)`, with an empty `end` unbounded.
pub(crate) fn in_range(key: &[u8], start: &[u8], end: &[u8]) -> bool {
    key >= start && (end.is_empty() || key < end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_after() {
        assert_eq!(key_after(b"hello"), b"hello\0");
        assert_eq!(key_after(b""), b"\0");
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(b"abc"), b"abd");
        assert_eq!(prefix_end(b"/root/"), b"/root0");
        assert_eq!(prefix_end(b"a\xff"), b"b");
        assert_eq!(prefix_end(b"\xff\xff"), Vec::<u8>::new());
        assert_eq!(prefix_end(b""), Vec::<u8>::new());
    }

    #[test]
    fn test_in_range() {
        assert!(in_range(b"b", b"a", b"c"));
        assert!(in_range(b"a", b"a", b"c"));
        assert!(!in_range(b"c", b"a", b"c"));
        assert!(in_range(b"zzz", b"a", b""));
    }

    #[test]
    fn test_deadline() {
        assert!(Deadline::after(Duration::from_secs(60)).check().is_ok());
        assert_eq!(
            Deadline::after(Duration::ZERO).check(),
            Err(BackendError::Timeout)
        );
    }

    #[test]
    fn test_scan_limit() {
        assert!(check_scan_limit(10, 10).is_ok());
        assert_eq!(
            check_scan_limit(11, 10),
            Err(BackendError::ScanLimitExceeded { limit: 11, max: 10 })
        );
    }
}
