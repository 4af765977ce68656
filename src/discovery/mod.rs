//! Resource discovery
//!
//! Key formation, link extraction, the recursive graph crawler, registry
//! discovery, progress allocation and the search index.

pub mod crawler;
pub mod keys;
pub mod links;
pub mod progress;
pub mod registries;
pub mod search_index;

pub use crawler::{
    BranchFailure, CrawlerConfig, DiscoveredResource, GraphCrawler, SystemRecord, SYSTEMS_COLLECTION,
};
pub use keys::{form_key, form_root_key, namespace_paths, resource_name};
pub use links::{extract_links, filter_links, LinkSet, SkipContext};
pub use progress::ProgressAccumulator;
pub use registries::REGISTRIES_COLLECTION;
pub use search_index::{build_index, SearchIndexBuilder, SearchIndexRecord};
