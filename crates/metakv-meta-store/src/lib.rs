//! MetaKV Metadata Store - transactional metadata client
//!
//! This crate turns a transactional key-value backend into a namespaced,
//! prefix-aware metadata store with atomic multi-key operations,
//! predicate-gated transactions and paginated prefix scans.

pub mod backend;
pub mod codec;
pub mod kv;
pub mod path;
pub mod predicates;
pub mod scan;
pub mod store;
pub mod txn;

// Re-exports
pub use backend::memory::MemoryBackend;
pub use backend::redb::RedbBackend;
pub use backend::{KeyValue, KvRead, KvTxn, TxnBackend};
pub use codec::EMPTY_VALUE_STRING;
pub use kv::{MetaKv, VersionedKv, WalkHandler};
pub use metakv_common::{BackendError, Error, MetaKvConfig, Result, TxnStage};
pub use predicates::Predicate;
pub use store::TxnKv;
