//! Producer and consumer bookkeeping
//!
//! Every entry wraps a live engine object. Removing an entry and closing
//! its engine object happen together.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use relaycast_protocol::{MediaKind, TrackSource};

use crate::engine::{EngineConsumer, EngineProducer};

/// A locally published stream
#[derive(Clone)]
pub struct Producer {
    inner: Arc<dyn EngineProducer>,
    source: TrackSource,
}

impl Producer {
    pub(crate) fn new(inner: Arc<dyn EngineProducer>, source: TrackSource) -> Self {
        Self { inner, source }
    }

    /// Router-assigned identifier
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind()
    }

    pub fn closed(&self) -> bool {
        self.inner.closed()
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.id())
            .field("source", &self.source)
            .field("closed", &self.closed())
            .finish()
    }
}

/// A locally subscribed remote stream
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<dyn EngineConsumer>,
    source: TrackSource,
    user_id: String,
}

impl Consumer {
    pub(crate) fn new(inner: Arc<dyn EngineConsumer>, source: TrackSource, user_id: String) -> Self {
        Self {
            inner,
            source,
            user_id,
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    /// User the stream originates from
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind()
    }

    pub fn closed(&self) -> bool {
        self.inner.closed()
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id())
            .field("source", &self.source)
            .field("user_id", &self.user_id)
            .field("closed", &self.closed())
            .finish()
    }
}

pub trait RegistryEntry: Clone {
    fn entry_id(&self) -> &str;
    fn close_entry(&self);
}

impl RegistryEntry for Producer {
    fn entry_id(&self) -> &str {
        self.id()
    }

    fn close_entry(&self) {
        self.inner.close();
    }
}

impl RegistryEntry for Consumer {
    fn entry_id(&self) -> &str {
        self.id()
    }

    fn close_entry(&self) {
        self.inner.close();
    }
}

/// Entries keyed by identifier, at most one per id
#[derive(Debug)]
pub struct Registry<T> {
    entries: BTreeMap<String, T>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T: RegistryEntry> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an entry. An existing entry with the same id is closed and
    /// returned.
    pub fn insert(&mut self, entry: T) -> Option<T> {
        let replaced = self.entries.insert(entry.entry_id().to_string(), entry);
        if let Some(old) = &replaced {
            tracing::warn!("Replacing registry entry {}", old.entry_id());
            old.close_entry();
        }
        replaced
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Copy of the current entries, for evaluating predicates outside the registry
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.values().cloned().collect()
    }

    /// Close and remove each listed entry still present. Returns the ids
    /// actually removed.
    pub fn close_ids(&mut self, ids: &[String]) -> Vec<String> {
        ids.iter()
            .filter_map(|id| {
                let entry = self.entries.remove(id)?;
                entry.close_entry();
                Some(id.clone())
            })
            .collect()
    }

    /// Close and remove everything
    pub fn close_all(&mut self) -> Vec<String> {
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        self.close_ids(&ids)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
