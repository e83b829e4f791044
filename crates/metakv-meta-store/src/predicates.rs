//! Transactional preconditions
//!
//! A predicate is checked against the read view of the transaction that
//! carries the mutation, so the check and the write commit together.

use crate::backend::KvRead;
use crate::codec;
use crate::path::KeyPath;
use metakv_common::{Error, Result, TxnStage};

/// What a predicate compares against
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredicateTarget {
    Value,
}

/// How a predicate compares
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredicateKind {
    Equal,
}

/// Condition that must hold for a conditional transaction to apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Predicate {
    target: PredicateTarget,
    kind: PredicateKind,
    key: String,
    expected: Vec<u8>,
}

impl Predicate {
    /// Holds iff `key` exists and its current value equals `value`.
    pub fn value_equal(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            target: PredicateTarget::Value,
            kind: PredicateKind::Equal,
            key: key.into(),
            expected: value.into(),
        }
    }

    pub fn target(&self) -> PredicateTarget {
        self.target
    }

    pub fn kind(&self) -> PredicateKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn expected(&self) -> &[u8] {
        &self.expected
    }

    fn check(&self, view: &impl KvRead, path: &KeyPath) -> Result<()> {
        let backend_key = path.to_backend_key(&self.key);
        let current = view
            .get(backend_key.as_bytes())
            .map_err(|e| Error::transaction(TxnStage::Read, e))?;
        let Some(current) = current.map(codec::decode) else {
            return Err(Error::PredicateFailed {
                key: self.key.clone(),
                reason: "key does not exist".to_string(),
            });
        };
        match (self.target, self.kind) {
            (PredicateTarget::Value, PredicateKind::Equal) if current == self.expected => Ok(()),
            (PredicateTarget::Value, PredicateKind::Equal) => Err(Error::PredicateFailed {
                key: self.key.clone(),
                reason: format!(
                    "expected {:?}, found {:?}",
                    String::from_utf8_lossy(&self.expected),
                    String::from_utf8_lossy(&current)
                ),
            }),
        }
    }
}

/// Check every predicate against `view`, stopping at the first failure.
pub(crate) fn check_all(view: &impl KvRead, path: &KeyPath, predicates: &[Predicate]) -> Result<()> {
    predicates.iter().try_for_each(|p| p.check(view, path))
}
