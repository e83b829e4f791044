//! Paginated prefix scans
//!
//! A backend answers one scan with at most `max_scan_limit` pairs. The
//! scanner chains bounded batches over one read view, restarting strictly
//! after the last key of each batch, until the prefix range is exhausted.

use crate::backend::{KeyValue, KvRead, key_after, prefix_end};
use metakv_common::{Error, Result};

/// Resolve a caller page size to a batch size.
///
/// Non-positive sizes select `default`; everything is clamped to `max`.
#[must_use]
pub fn normalize_page_size(page_size: i64, default: usize, max: usize) -> usize {
    let size = usize::try_from(page_size)
        .ok()
        .filter(|&n| n > 0)
        .unwrap_or(default);
    size.min(max).max(1)
}

/// Visit every pair whose key starts with `prefix`, in key order.
///
/// `handler` errors stop the scan and are returned unchanged. Backend
/// failures surface as `Error::Backend`.
pub fn walk<R, F>(view: &R, prefix: &[u8], batch_size: usize, mut handler: F) -> Result<()>
where
    R: KvRead + ?Sized,
    F: FnMut(KeyValue) -> Result<()>,
{
    let end = prefix_end(prefix);
    let mut start = prefix.to_vec();
    loop {
        let batch = view.scan(&start, &end, batch_size)?;
        let full = batch.len() == batch_size;
        let Some(last) = batch.last() else {
            return Ok(());
        };
        let next = key_after(&last.key);
        for kv in batch {
            handler(kv)?;
        }
        if !full {
            return Ok(());
        }
        start = next;
    }
}

/// Collect every pair under `prefix`.
pub fn collect<R>(view: &R, prefix: &[u8], batch_size: usize) -> Result<Vec<KeyValue>>
where
    R: KvRead + ?Sized,
{
    let mut pairs = Vec::new();
    walk(view, prefix, batch_size, |kv| {
        pairs.push(kv);
        Ok(())
    })?;
    Ok(pairs)
}

/// Check whether any key starts with `prefix`.
pub fn exists<R>(view: &R, prefix: &[u8]) -> Result<bool>
where
    R: KvRead + ?Sized,
{
    let batch = view
        .scan(prefix, &prefix_end(prefix), 1)
        .map_err(Error::Backend)?;
    Ok(!batch.is_empty())
}
