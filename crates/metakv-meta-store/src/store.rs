//! Transactional metadata store over a [`TxnBackend`]
//!
//! `TxnKv` namespaces every key under its root path, encodes empty values,
//! runs each mutation as one backend transaction and pages prefix reads
//! over a single snapshot.

use crate::backend::{KvRead, TxnBackend};
use crate::codec;
use crate::kv::{MetaKv, WalkHandler};
use crate::path::KeyPath;
use crate::predicates::Predicate;
use crate::scan;
use crate::txn::{TxnExecutor, TxnOps};
use metakv_common::{Error, MetaKvConfig, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Metadata store backed by a transactional key-value backend
pub struct TxnKv<B: TxnBackend> {
    executor: TxnExecutor<B>,
    path: KeyPath,
    config: MetaKvConfig,
}

impl<B: TxnBackend> TxnKv<B> {
    /// Create a store over a shared backend.
    pub fn new(backend: Arc<B>, config: MetaKvConfig) -> Result<Self> {
        config.validate()?;
        let path = KeyPath::new(&config.root_path);
        let executor = TxnExecutor::new(
            backend,
            config.request_timeout(),
            config.slow_op_threshold(),
            config.scan_batch_size,
        );
        info!(
            "Opened metadata store at root {} (batch_size={})",
            path.root(),
            executor.batch_size()
        );
        Ok(Self {
            executor,
            path,
            config,
        })
    }

    /// Create a store with default settings under `root_path`.
    pub fn with_root(backend: Arc<B>, root_path: &str) -> Result<Self> {
        Self::new(backend, MetaKvConfig::with_root(root_path))
    }

    pub fn root_path(&self) -> &str {
        self.path.root()
    }

    pub fn config(&self) -> &MetaKvConfig {
        &self.config
    }

    pub fn load_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let backend_key = self.path.to_backend_key(key);
        let value = self
            .executor
            .read("load", |snap| Ok(snap.get(backend_key.as_bytes())?))?;
        value.map(codec::decode).ok_or_else(|| Error::KeyNotFound {
            key: key.to_string(),
        })
    }

    pub fn save_bytes(&self, key: &str, value: &[u8]) -> Result<()> {
        debug!("save: key={}", key);
        let ops = TxnOps {
            puts: self.encode_puts(std::iter::once((key, value)))?,
            ..Default::default()
        };
        self.executor.execute("save", ops, &[], &self.path)
    }

    pub fn multi_save_bytes(&self, kvs: &HashMap<String, Vec<u8>>) -> Result<()> {
        debug!("multi_save: {} keys", kvs.len());
        let ops = TxnOps {
            puts: self.encode_puts(kvs.iter().map(|(k, v)| (k.as_str(), v.as_slice())))?,
            ..Default::default()
        };
        self.executor.execute("multi_save", ops, &[], &self.path)
    }

    /// Load every pair under `prefix` as logical keys and raw values.
    pub fn load_bytes_with_prefix(&self, prefix: &str) -> Result<(Vec<String>, Vec<Vec<u8>>)> {
        let mut keys = Vec::new();
        let mut values = Vec::new();
        self.scan_prefix("load_with_prefix", prefix, self.executor.batch_size(), |key, value| {
            keys.push(key);
            values.push(value);
            Ok(())
        })?;
        debug!("load_with_prefix: prefix={} found={}", prefix, keys.len());
        Ok((keys, values))
    }

    /// Namespace and encode puts. The empty key names the root itself,
    /// which prefix operations never reach, so it cannot be written.
    fn encode_puts<'a>(
        &self,
        kvs: impl Iterator<Item = (&'a str, &'a [u8])>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        kvs.map(|(key, value)| {
            if key.is_empty() {
                return Err(Error::InvalidKey("cannot write the empty key".to_string()));
            }
            let encoded = codec::encode(key, value)?;
            Ok((self.path.to_backend_key(key).into_bytes(), encoded.into_owned()))
        })
        .collect()
    }

    fn string_puts(&self, kvs: &HashMap<String, String>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.encode_puts(kvs.iter().map(|(k, v)| (k.as_str(), v.as_bytes())))
    }

    fn backend_keys(&self, keys: &[&str]) -> Vec<Vec<u8>> {
        keys.iter()
            .map(|k| self.path.to_backend_key(k).into_bytes())
            .collect()
    }

    fn scan_prefix<F>(&self, op: &str, prefix: &str, batch_size: usize, mut f: F) -> Result<()>
    where
        F: FnMut(String, Vec<u8>) -> Result<()>,
    {
        let backend_prefix = self.path.prefix_key(prefix);
        self.executor.read(op, |snap| {
            scan::walk(snap, backend_prefix.as_bytes(), batch_size, |kv| {
                let key = self.path.to_logical_key(&kv.key)?;
                f(key, codec::decode(kv.value))
            })
        })
    }
}

impl<B: TxnBackend> MetaKv for TxnKv<B> {
    fn load(&self, key: &str) -> Result<String> {
        let value = self.load_bytes(key)?;
        String::from_utf8(value).map_err(|_| Error::InvalidUtf8 {
            key: key.to_string(),
        })
    }

    fn multi_load(&self, keys: &[&str]) -> Result<Vec<String>> {
        debug!("multi_load: {} keys", keys.len());
        let values = self.executor.read("multi_load", |snap| {
            keys.iter()
                .map(|key| -> Result<Option<String>> {
                    let backend_key = self.path.to_backend_key(key);
                    snap.get(backend_key.as_bytes())?
                        .map(|v| codec::decode_string(key, v))
                        .transpose()
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let missing: Vec<String> = keys
            .iter()
            .zip(&values)
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| (*k).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::KeysNotFound { missing, values });
        }
        Ok(values.into_iter().flatten().collect())
    }

    fn load_with_prefix(&self, prefix: &str) -> Result<(Vec<String>, Vec<String>)> {
        let (keys, raw) = self.load_bytes_with_prefix(prefix)?;
        let values = keys
            .iter()
            .zip(raw)
            .map(|(key, value)| {
                String::from_utf8(value).map_err(|_| Error::InvalidUtf8 { key: key.clone() })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((keys, values))
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.save_bytes(key, value.as_bytes())
    }

    fn multi_save(&self, kvs: &HashMap<String, String>) -> Result<()> {
        debug!("multi_save: {} keys", kvs.len());
        let ops = TxnOps {
            puts: self.string_puts(kvs)?,
            ..Default::default()
        };
        self.executor.execute("multi_save", ops, &[], &self.path)
    }

    fn remove(&self, key: &str) -> Result<()> {
        debug!("remove: key={}", key);
        let ops = TxnOps {
            deletes: self.backend_keys(&[key]),
            ..Default::default()
        };
        self.executor.execute("remove", ops, &[], &self.path)
    }

    fn multi_remove(&self, keys: &[&str]) -> Result<()> {
        debug!("multi_remove: {} keys", keys.len());
        let ops = TxnOps {
            deletes: self.backend_keys(keys),
            ..Default::default()
        };
        self.executor.execute("multi_remove", ops, &[], &self.path)
    }

    fn remove_with_prefix(&self, prefix: &str) -> Result<()> {
        let backend_prefix = self.path.prefix_key(prefix);
        self.executor
            .remove_prefix_batched("remove_with_prefix", backend_prefix.as_bytes())?;
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        let backend_key = self.path.to_backend_key(key);
        self.executor
            .read("has", |snap| Ok(snap.get(backend_key.as_bytes())?.is_some()))
    }

    fn has_prefix(&self, prefix: &str) -> Result<bool> {
        let backend_prefix = self.path.prefix_key(prefix);
        self.executor
            .read("has_prefix", |snap| scan::exists(snap, backend_prefix.as_bytes()))
    }

    fn multi_save_and_remove(
        &self,
        saves: &HashMap<String, String>,
        removals: &[&str],
        predicates: &[Predicate],
    ) -> Result<()> {
        debug!(
            "multi_save_and_remove: saves={} removals={} predicates={}",
            saves.len(),
            removals.len(),
            predicates.len()
        );
        let ops = TxnOps {
            puts: self.string_puts(saves)?,
            deletes: self.backend_keys(removals),
            ..Default::default()
        };
        self.executor
            .execute("multi_save_and_remove", ops, predicates, &self.path)
    }

    fn multi_save_and_remove_with_prefix(
        &self,
        saves: &HashMap<String, String>,
        prefixes: &[&str],
        predicates: &[Predicate],
    ) -> Result<()> {
        debug!(
            "multi_save_and_remove_with_prefix: saves={} prefixes={} predicates={}",
            saves.len(),
            prefixes.len(),
            predicates.len()
        );
        let ops = TxnOps {
            puts: self.string_puts(saves)?,
            delete_prefixes: prefixes
                .iter()
                .map(|p| self.path.prefix_key(p).into_bytes())
                .collect(),
            ..Default::default()
        };
        self.executor
            .execute("multi_save_and_remove_with_prefix", ops, predicates, &self.path)
    }

    fn walk_with_prefix(&self, prefix: &str, page_size: i64, handler: &mut WalkHandler<'_>) -> Result<()> {
        let batch_size = scan::normalize_page_size(
            page_size,
            self.config.scan_batch_size,
            self.executor.backend().max_scan_limit(),
        );
        debug!("walk_with_prefix: prefix={} batch_size={}", prefix, batch_size);
        self.scan_prefix("walk_with_prefix", prefix, batch_size, |key, value| {
            handler(key.as_str(), value.as_slice())
        })
    }

    fn get_path(&self, key: &str) -> String {
        self.path.get_path(key)
    }
}
