//! Metadata store interface
//!
//! All keys are logical keys relative to the store's root path, both the
//! ones callers pass in and the ones prefix reads hand back. Use
//! [`MetaKv::get_path`] for the full backend path. Values on the string
//! surface are UTF-8; the empty string is a storable value distinct from an
//! absent key. The empty key names the root itself and cannot be written.

use crate::predicates::Predicate;
use metakv_common::{Error, Result};
use std::collections::HashMap;

/// Handler invoked once per pair by [`MetaKv::walk_with_prefix`]
pub type WalkHandler<'a> = dyn FnMut(&str, &[u8]) -> Result<()> + 'a;

/// Namespaced transactional metadata store.
pub trait MetaKv: Send + Sync {
    /// Load the value of `key`; `KeyNotFound` if absent.
    fn load(&self, key: &str) -> Result<String>;

    /// Load the values of `keys` from one snapshot.
    ///
    /// If any key is absent the call fails with `KeysNotFound`, which
    /// still carries every found value in its position.
    fn multi_load(&self, keys: &[&str]) -> Result<Vec<String>>;

    /// Load every pair whose key starts with `prefix`, in key order.
    ///
    /// Returned keys are relative to the root, e.g. `a/b` rather than
    /// `<root>/a/b`.
    fn load_with_prefix(&self, prefix: &str) -> Result<(Vec<String>, Vec<String>)>;

    fn save(&self, key: &str, value: &str) -> Result<()>;

    /// Save every pair in one transaction.
    fn multi_save(&self, kvs: &HashMap<String, String>) -> Result<()>;

    /// Delete `key`. Deleting an absent key succeeds.
    fn remove(&self, key: &str) -> Result<()>;

    fn multi_remove(&self, keys: &[&str]) -> Result<()>;

    /// Delete every key starting with `prefix`.
    ///
    /// The sweep commits in batches and is not atomic as a whole.
    fn remove_with_prefix(&self, prefix: &str) -> Result<()>;

    fn has(&self, key: &str) -> Result<bool>;

    fn has_prefix(&self, prefix: &str) -> Result<bool>;

    /// Save and delete in one transaction, applied only if every predicate
    /// holds.
    fn multi_save_and_remove(
        &self,
        saves: &HashMap<String, String>,
        removals: &[&str],
        predicates: &[Predicate],
    ) -> Result<()>;

    /// Save and delete every key under each of `prefixes` in one
    /// transaction, applied only if every predicate holds.
    fn multi_save_and_remove_with_prefix(
        &self,
        saves: &HashMap<String, String>,
        prefixes: &[&str],
        predicates: &[Predicate],
    ) -> Result<()>;

    /// Call `handler` for every pair under `prefix` in key order.
    ///
    /// The handler receives root-relative keys and decoded values.
    /// Non-positive `page_size` selects the default batch size. The first
    /// handler error stops the walk and is returned.
    fn walk_with_prefix(&self, prefix: &str, page_size: i64, handler: &mut WalkHandler<'_>) -> Result<()>;

    /// Backend path of a logical key
    fn get_path(&self, key: &str) -> String;

    /// Release the store. The shared backend stays open.
    fn close(&self) {}

    /// Compare-and-swap capability, if this store has one
    fn as_versioned(&self) -> Option<&dyn VersionedKv> {
        None
    }

    /// Swap `key` to `target` if its version is `version`.
    ///
    /// Fails with `Unsupported` on stores without the versioned capability.
    fn compare_version_and_swap(&self, key: &str, version: i64, target: &str) -> Result<bool> {
        match self.as_versioned() {
            Some(versioned) => versioned.compare_version_and_swap(key, version, target),
            None => Err(Error::unsupported("compare_version_and_swap")),
        }
    }
}

/// Stores that track a per-key version and can swap on it.
pub trait VersionedKv: Send + Sync {
    fn compare_version_and_swap(&self, key: &str, version: i64, target: &str) -> Result<bool>;
}
