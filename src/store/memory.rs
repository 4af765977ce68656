//! In-Memory Resource Store
//!
//! Table-partitioned key/value store backed by DashMap. Used by the binary
//! for one-shot runs and by tests as the persistence collaborator.

use crate::domain::ports::ResourceStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Memory Store
// =============================================================================

/// Resource store keeping every table in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// table -> key -> document
    tables: DashMap<String, DashMap<String, Bytes>>,
    /// Current total size in bytes
    size_bytes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a table
    pub fn table_len(&self, table: &str) -> usize {
        self.tables.get(table).map(|t| t.len()).unwrap_or(0)
    }

    /// All keys of a table, sorted
    pub fn keys(&self, table: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .tables
            .get(table)
            .map(|t| t.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Current total size of stored documents
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn save(&self, table: &str, key: &str, data: &[u8]) -> Result<()> {
        let table_map = self.tables.entry(table.to_string()).or_default();
        let old = table_map.insert(key.to_string(), Bytes::copy_from_slice(data));
        if let Some(old) = old {
            self.size_bytes.fetch_sub(old.len() as u64, Ordering::Relaxed);
        }
        self.size_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<Bytes>> {
        Ok(self
            .tables
            .get(table)
            .and_then(|t| t.get(key).map(|v| v.value().clone())))
    }

    async fn get_matching(&self, table: &str, pattern: &str) -> Result<Vec<String>> {
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| Error::persistence(table, pattern, format!("invalid pattern: {}", e)))?;
        let mut keys: Vec<String> = self
            .tables
            .get(table)
            .map(|t| {
                t.iter()
                    .filter(|e| pattern.matches(e.key()))
                    .map(|e| e.key().clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let removed = self.tables.get(table).and_then(|t| t.remove(key));
        match removed {
            Some((_, old)) => {
                self.size_bytes.fetch_sub(old.len() as u64, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_if_absent(&self, table: &str, key: &str, data: &[u8]) -> Result<bool> {
        let table_map = self.tables.entry(table.to_string()).or_default();
        let created = match table_map.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(Bytes::copy_from_slice(data));
                true
            }
        };
        if created {
            self.size_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_get_delete() {
        let store = MemoryStore::new();
        store.save("ComputerSystem", "/redfish/v1/Systems/d1.1", b"{}").await.unwrap();
        store.save("ComputerSystem", "/redfish/v1/Systems/d1.1", b"{\"a\":1}").await.unwrap();

        let doc = store.get("ComputerSystem", "/redfish/v1/Systems/d1.1").await.unwrap();
        assert_eq!(doc.as_deref(), Some(&b"{\"a\":1}"[..]));
        assert_eq!(store.size_bytes(), 7);
        assert_eq!(store.table_len("ComputerSystem"), 1);
        assert!(store.get("Chassis", "/redfish/v1/Systems/d1.1").await.unwrap().is_none());

        assert!(store.delete("ComputerSystem", "/redfish/v1/Systems/d1.1").await.unwrap());
        assert!(!store.delete("ComputerSystem", "/redfish/v1/Systems/d1.1").await.unwrap());
        assert_eq!(store.size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_get_matching_glob() {
        let store = MemoryStore::new();
        store.save("Managers", "/redfish/v1/Managers/d1.1", b"{}").await.unwrap();
        store.save("Managers", "/redfish/v1/Managers/d1.2", b"{}").await.unwrap();
        store.save("Managers", "/redfish/v1/Managers/d2.1", b"{}").await.unwrap();

        let keys = store.get_matching("Managers", "/redfish/v1/Managers/d1.*").await.unwrap();
        assert_eq!(keys, vec!["/redfish/v1/Managers/d1.1", "/redfish/v1/Managers/d1.2"]);
        assert!(store.get_matching("Chassis", "*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_if_absent_is_exclusive() {
        let store = MemoryStore::new();
        assert!(store.create_if_absent("ActiveMetricRequest", "/m/1", b"").await.unwrap());
        assert!(!store.create_if_absent("ActiveMetricRequest", "/m/1", b"").await.unwrap());
        assert!(store.exists("ActiveMetricRequest", "/m/1").await.unwrap());
    }
}
