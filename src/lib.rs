//! Resource Aggregator - Fleet Discovery Engine
//!
//! Discovers the resource graph of managed hardware devices through their
//! southbound management plugins, namespaces every resource by device UUID,
//! persists the inventory, builds a searchable summary index and reports
//! fractional progress to an external task tracker.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              Aggregator                                      │
//! │        status check -> systems -> chassis/managers -> registries             │
//! │                -> persist -> search index -> telemetry                       │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Graph Crawler  │  │  Search Index   │  │     Telemetry Merger        │  │
//! │  │ (keys, links,   │  │    Builder      │  │ (wildcards, union, metric   │  │
//! │  │  progress)      │  │                 │  │  request lock)              │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                   │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                                │                                             │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │    Plugin Session     │                                │
//! │                    │ (auth, probe retry,   │                                │
//! │                    │  URL translation)     │                                │
//! │                    └───────────────────────┘                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                               Ports                                          │
//! │  PluginTransport │ PluginStatusProbe │ ResourceStore │ TaskUpdater           │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`aggregator`]: Add-compute and storage rediscovery flows
//! - [`plugin`]: Plugin sessions, transport, URL translation and status check
//! - [`discovery`]: Key formation, link extraction, crawler and search index
//! - [`telemetry`]: Fleet-wide telemetry merge
//! - [`task`]: Task progress reporting and plugin task monitoring
//! - [`store`]: In-memory resource store and table names
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod aggregator;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod plugin;
pub mod store;
pub mod task;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use aggregator::{AddComputeRequest, AggregationReport, Aggregator};

pub use config::AggregatorConfig;

pub use discovery::{
    form_key, BranchFailure, CrawlerConfig, GraphCrawler, SearchIndexBuilder, SystemRecord,
};

pub use domain::ports::{
    AuthType, Device, Plugin, PluginTransport, PluginStatusProbe, ResourceStore, TaskUpdater,
    TaskUpdate, TaskState, TaskStatus,
};

pub use error::{Error, ErrorResponse, Result};

pub use metrics::{CrawlMetrics, CrawlMetricsSnapshot};

pub use plugin::{HttpPluginTransport, PluginSession, SessionRegistry, StatusEndpointProbe};

pub use store::MemoryStore;

pub use task::{monitor_plugin_task, TaskReporter};

pub use telemetry::{MetricRequestLock, TelemetryMerger};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
