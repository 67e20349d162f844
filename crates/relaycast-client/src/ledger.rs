//! Pending-produce ledger
//!
//! Correlates in-flight `produce` requests with the router-assigned id that
//! eventually arrives through the signaling layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::engine::Completion;
use crate::error::{NegotiationError, Result, SessionError};

/// Source of correlation keys
pub trait KeyGenerator: Send + Sync {
    fn next_key(&self) -> String;
}

/// Random v4 UUID keys
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidKeyGenerator;

impl KeyGenerator for UuidKeyGenerator {
    fn next_key(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Deterministic `<prefix>-<n>` keys
#[derive(Debug)]
pub struct SequentialKeyGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialKeyGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl KeyGenerator for SequentialKeyGenerator {
    fn next_key(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, n)
    }
}

#[derive(Debug, Default)]
pub struct PendingProduceLedger {
    pending: HashMap<String, Completion<String>>,
}

impl PendingProduceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending request. A key that is already pending is refused
    /// and the completion is handed back untouched.
    pub fn insert(
        &mut self,
        key: String,
        completion: Completion<String>,
    ) -> std::result::Result<(), (NegotiationError, Completion<String>)> {
        if self.pending.contains_key(&key) {
            return Err((NegotiationError::DuplicateKey(key), completion));
        }
        self.pending.insert(key, completion);
        Ok(())
    }

    /// Remove the entry for `key`. Absent and already-resolved keys are
    /// indistinguishable.
    pub fn take(&mut self, key: &str) -> Result<Completion<String>> {
        self.pending
            .remove(key)
            .ok_or_else(|| SessionError::UnknownCorrelationKey(key.to_string()))
    }

    /// Empty the ledger, returning whatever was still pending
    pub fn drain(&mut self) -> Vec<(String, Completion<String>)> {
        self.pending.drain().collect()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
