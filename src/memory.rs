//! In-memory storage adapter.
//!
//! Synchronous: every operation answers with [`StorageOp::Ready`], so engines
//! backed by it hydrate inline. This is NOT durable - data is lost on process
//! exit. [`MemoryStorage::global`] is the process-wide instance engines fall
//! back to when no storage is configured.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::error::Result;
use crate::storage::{validate_key, Storage, StorageOp};

/// In-memory implementation of [`Storage`].
///
/// Uses a BTreeMap for ordered key iteration and RwLock for concurrency.
#[derive(Debug)]
pub struct MemoryStorage {
    data: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// The shared process-wide instance.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<MemoryStorage>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(MemoryStorage::new())))
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.data.write().clear();
    }

    /// All keys, in lexicographic order.
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Read an entry directly, bypassing the [`Storage`] contract.
    pub fn get(&self, key: &str) -> Option<String> {
        self.data.read().get(key).cloned()
    }

    /// Write an entry directly, bypassing the [`Storage`] contract.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.write().insert(key.into(), value.into());
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        Ok(self.data.read().get(key).cloned())
    }

    fn write(&self, key: &str, value: String) -> Result<()> {
        validate_key(key)?;
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.data.write().remove(key);
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> StorageOp<Option<String>> {
        StorageOp::Ready(self.read(key))
    }

    fn set_item(&self, key: &str, value: String) -> StorageOp<()> {
        StorageOp::Ready(self.write(key, value))
    }

    fn remove_item(&self, key: &str) -> StorageOp<()> {
        StorageOp::Ready(self.remove(key))
    }
}
