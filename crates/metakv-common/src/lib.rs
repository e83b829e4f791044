//! MetaKV Common - Shared types and utilities
//!
//! This crate provides the error taxonomy and configuration types
//! used by the metadata-store client and its backends.

pub mod config;
pub mod error;

pub use config::{MemoryBackendConfig, MetaKvConfig, RedbBackendConfig};
pub use error::{BackendError, Error, Result, TxnStage};
