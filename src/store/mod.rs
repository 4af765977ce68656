//! Persistence adapters
//!
//! Table names shared by every writer of the resource inventory.

mod memory;

pub use memory::MemoryStore;

/// Well-known table names
pub mod tables {
    pub const COMPUTER_SYSTEM: &str = "ComputerSystem";
    pub const SEARCH_INDEX: &str = "SearchIndex";
    pub const SYSTEM_UUID: &str = "SystemUUID";
    pub const MANAGERS: &str = "Managers";
    pub const CHASSIS: &str = "Chassis";
    pub const REGISTRIES: &str = "Registries";
    pub const STORAGE_COLLECTION: &str = "StorageCollection";
    pub const ACTIVE_METRIC_REQUEST: &str = "ActiveMetricRequest";
}
