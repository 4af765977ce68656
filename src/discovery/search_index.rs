//! Search Index
//!
//! Flat, queryable summary of one compute system. The record is rebuilt in
//! full on every discovery or update, never patched.

use crate::discovery::crawler::SystemRecord;
use crate::discovery::keys::{manager_pattern, resource_name};
use crate::discovery::links::ODATA_ID;
use crate::domain::ports::{ResourceStore, ResourceStoreRef};
use crate::error::{Error, Result};
use crate::store::tables;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, info};

/// Attribute path -> value
pub type SearchIndexRecord = Map<String, Value>;

/// Storage documents by key, as needed by [`build_index`]
pub type StorageLookup = HashMap<String, Value>;

const BYTES_PER_GB: f64 = 1_000_000_000.0;

/// Extract the indexed attributes of a namespaced system document.
///
/// Absent fields are omitted. Drive capacities are decimal gigabytes.
pub fn build_index(
    system: &Value,
    firmware_version: Option<&str>,
    storage: &StorageLookup,
) -> SearchIndexRecord {
    let mut record = SearchIndexRecord::new();

    if let Some(memory) = system.get("MemorySummary") {
        copy_field(memory, "TotalSystemMemoryGiB", "MemorySummary/TotalSystemMemoryGiB", &mut record);
        copy_field(
            memory,
            "TotalSystemPersistentMemoryGiB",
            "MemorySummary/TotalSystemPersistentMemoryGiB",
            &mut record,
        );
    }
    copy_field(system, "SystemType", "SystemType", &mut record);
    if let Some(processors) = system.get("ProcessorSummary") {
        copy_field(processors, "Count", "ProcessorSummary/Count", &mut record);
        copy_field(processors, "Count", "ProcessorSummary/sockets", &mut record);
        copy_field(processors, "Model", "ProcessorSummary/Model", &mut record);
    }
    copy_field(system, "PowerState", "PowerState", &mut record);
    if let Some(version) = firmware_version {
        record.insert("FirmwareVersion".to_string(), json!(version));
    }

    if let Some(collection) = storage_collection_key(system) {
        summarize_drives(&collection, storage, &mut record);
    }
    record
}

fn copy_field(source: &Value, field: &str, attribute: &str, record: &mut SearchIndexRecord) {
    if let Some(value) = source.get(field).filter(|v| !v.is_null()) {
        record.insert(attribute.to_string(), value.clone());
    }
}

fn storage_collection_key(system: &Value) -> Option<String> {
    system
        .get("Storage")
        .and_then(|s| s.get(ODATA_ID))
        .and_then(Value::as_str)
        .map(|link| link.trim_end_matches('/').to_string())
}

fn links_of<'a>(document: &'a Value, field: &str) -> Vec<&'a str> {
    document
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.get(ODATA_ID).and_then(Value::as_str))
                .map(|link| link.trim_end_matches('/'))
                .collect()
        })
        .unwrap_or_default()
}

fn summarize_drives(collection: &str, storage: &StorageLookup, record: &mut SearchIndexRecord) {
    let Some(collection) = storage.get(collection) else {
        return;
    };

    let mut quantity = 0usize;
    let mut capacity = Vec::new();
    let mut types = Vec::new();
    let mut has_drives = false;
    for member in links_of(collection, "Members") {
        let Some(member) = storage.get(member) else {
            continue;
        };
        if member.get("Drives").and_then(Value::as_array).is_none() {
            continue;
        }
        has_drives = true;
        let drives = links_of(member, "Drives");
        quantity += drives.len();
        for drive in drives.into_iter().filter_map(|d| storage.get(d)) {
            if let Some(bytes) = drive.get("CapacityBytes").and_then(Value::as_f64) {
                capacity.push(bytes / BYTES_PER_GB);
            }
            if let Some(media) = drive.get("MediaType").and_then(Value::as_str) {
                types.push(media.to_string());
            }
        }
    }

    if has_drives {
        record.insert("Storage/Drives/Quantity".to_string(), json!(quantity));
        record.insert("Storage/Drives/Capacity".to_string(), json!(capacity));
        record.insert("Storage/Drives/Type".to_string(), json!(types));
    }
}

// =============================================================================
// Search Index Builder
// =============================================================================

/// Loads what an index record needs from the store and persists the record
pub struct SearchIndexBuilder {
    store: ResourceStoreRef,
}

impl SearchIndexBuilder {
    pub fn new(store: ResourceStoreRef) -> Self {
        Self { store }
    }

    /// Build and persist the record of a discovered system.
    ///
    /// Also maps the system UUID to its key for duplicate detection.
    pub async fn rebuild(&self, system: &SystemRecord, device_uuid: &str) -> Result<SearchIndexRecord> {
        let firmware = self.firmware_version(&system.key, device_uuid).await?;
        let storage = self.collect_storage(&system.document).await?;
        let record = build_index(&system.document, firmware.as_deref(), &storage);

        let encoded = serde_json::to_vec(&record)?;
        self.store
            .save(tables::SEARCH_INDEX, &system.key, &encoded)
            .await
            .map_err(|e| Error::persistence(tables::SEARCH_INDEX, &system.key, e))?;
        self.store
            .save(tables::SYSTEM_UUID, &system.uuid, system.key.as_bytes())
            .await
            .map_err(|e| Error::persistence(tables::SYSTEM_UUID, &system.uuid, e))?;

        info!(system = %system.key, attributes = record.len(), "Search index rebuilt");
        Ok(record)
    }

    /// Firmware version of the first Manager owned by the system's device
    pub async fn firmware_version(&self, system_key: &str, device_uuid: &str) -> Result<Option<String>> {
        let pattern = manager_pattern(system_key, device_uuid);
        let keys = self.store.get_matching(tables::MANAGERS, &pattern).await?;
        let Some(key) = keys.first() else {
            debug!(system = %system_key, "No manager data for firmware lookup");
            return Ok(None);
        };
        Ok(self
            .store
            .get_json(tables::MANAGERS, key)
            .await?
            .and_then(|m| m.get("FirmwareVersion").and_then(Value::as_str).map(str::to_string)))
    }

    /// Read the system's Storage collection, members and drives
    pub async fn collect_storage(&self, system: &Value) -> Result<StorageLookup> {
        let mut lookup = StorageLookup::new();
        let Some(collection_key) = storage_collection_key(system) else {
            return Ok(lookup);
        };
        let Some(collection) = self.find(&collection_key).await? else {
            return Ok(lookup);
        };

        let members: Vec<String> = links_of(&collection, "Members").into_iter().map(str::to_string).collect();
        lookup.insert(collection_key, collection);
        for member_key in members {
            let Some(member) = self.find(&member_key).await? else {
                continue;
            };
            let drives: Vec<String> = links_of(&member, "Drives").into_iter().map(str::to_string).collect();
            lookup.insert(member_key, member);
            for drive_key in drives {
                if let Some(drive) = self.find(&drive_key).await? {
                    lookup.insert(drive_key, drive);
                }
            }
        }
        Ok(lookup)
    }

    /// Locate a document by key; its table follows from the path shape
    async fn find(&self, key: &str) -> Result<Option<Value>> {
        for table in [resource_name(key, true), resource_name(key, false)] {
            if let Some(document) = self.store.get_json(&table, key).await? {
                return Ok(Some(document));
            }
        }
        Ok(None)
    }
}
