//! In-process storage adapter.
//!
//! Implements [`StoragePort`] over a `HashMap` keyed by
//! `namespace::key`.  Writes replace the whole value, which makes them
//! atomic per key.  An optional byte budget lets tests exercise the
//! `Full` path.

use std::collections::HashMap;

use log::debug;

use crate::app::ports::{StorageError, StoragePort};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    store: HashMap<String, Vec<u8>>,
    /// Total payload bytes allowed (`None` = unbounded).
    budget: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(bytes: usize) -> Self {
        Self {
            store: HashMap::new(),
            budget: Some(bytes),
        }
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// Payload bytes currently held.
    pub fn used(&self) -> usize {
        self.store.values().map(Vec::len).sum()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl StoragePort for MemoryStore {
    fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.store
            .get(&Self::composite_key(namespace, key))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let composite = Self::composite_key(namespace, key);
        if let Some(budget) = self.budget {
            let replaced = self.store.get(&composite).map_or(0, Vec::len);
            if self.used() - replaced + data.len() > budget {
                return Err(StorageError::Full);
            }
        }
        debug!("store: {composite} <- {} bytes", data.len());
        self.store.insert(composite, data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store.remove(&Self::composite_key(namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store.contains_key(&Self::composite_key(namespace, key))
    }
}
