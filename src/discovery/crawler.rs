//! Graph Crawler
//!
//! Recursive discovery of one device's resource graph through its plugin
//! session. Every fetched document is keyed into the device namespace and
//! accumulated in memory; the caller persists the inventory once the crawl
//! phases it needs have run.
//!
//! # Concurrency
//!
//! Children of one resource are fetched concurrently, bounded by
//! `max_concurrent_fetches`. The inventory, visited set and failure list sit
//! behind a single lock per crawl, taken only for in-memory bookkeeping and
//! never across a plugin call. A link is claimed in the visited set before it
//! is fetched, so each path is fetched at most once even when siblings race.
//!
//! The crawl has no cancellation hook: it runs until every branch has
//! finished or failed.

use crate::config::AggregatorConfig;
use crate::discovery::keys::{form_key, form_root_key, is_root_keyed, namespace_paths, resource_name};
use crate::discovery::links::{extract_links, filter_links, member_links, LinkSet, SkipContext, ODATA_ID};
use crate::discovery::progress;
use crate::domain::ports::ResourceStoreRef;
use crate::error::{Error, Result};
use crate::plugin::PluginSession;
use crate::store::tables;
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Root collection of compute systems
pub const SYSTEMS_COLLECTION: &str = "/redfish/v1/Systems";

// =============================================================================
// Configuration
// =============================================================================

/// Crawl tuning taken from the aggregator configuration
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub skip_under_system: Vec<String>,
    pub skip_under_others: Vec<String>,
    pub max_concurrent_fetches: usize,
}

impl From<&AggregatorConfig> for CrawlerConfig {
    fn from(config: &AggregatorConfig) -> Self {
        Self {
            skip_under_system: config.skip_resource_list_under_system.clone(),
            skip_under_others: config.skip_resource_list_under_others.clone(),
            max_concurrent_fetches: config.max_concurrent_fetches.max(1),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self::from(&AggregatorConfig::default())
    }
}

// =============================================================================
// Crawl Results
// =============================================================================

/// A discovered document keyed into the device namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredResource {
    pub table: String,
    pub key: String,
    /// Path the document was fetched from
    pub path: String,
    /// Namespaced document body
    pub body: String,
}

/// One branch of the crawl that could not be fetched or parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchFailure {
    pub path: String,
    pub status_code: u16,
    pub status_message: String,
    pub message: String,
}

impl BranchFailure {
    fn new(path: &str, error: &Error) -> Self {
        Self {
            path: path.to_string(),
            status_code: error.status_code(),
            status_message: error.status_message().to_string(),
            message: error.to_string(),
        }
    }
}

/// A discovered compute system
#[derive(Debug, Clone)]
pub struct SystemRecord {
    /// Persistence key, e.g. `/redfish/v1/Systems/<device>.1`
    pub key: String,
    pub id: String,
    pub uuid: String,
    /// Namespaced system document
    pub document: Value,
}

/// Bookkeeping shared by every branch of one crawl
#[derive(Debug, Default)]
struct CrawlState {
    inventory: BTreeMap<(String, String), DiscoveredResource>,
    visited: HashSet<String>,
    failures: Vec<BranchFailure>,
}

/// One pending resource fetch
#[derive(Debug, Clone)]
struct CrawlNode {
    path: String,
    /// Owner segment value used for keying
    owner_id: String,
    oem: bool,
    budget: u32,
}

// =============================================================================
// Graph Crawler
// =============================================================================

/// Discovery engine for one device
pub struct GraphCrawler {
    session: PluginSession,
    store: ResourceStoreRef,
    device_uuid: String,
    config: CrawlerConfig,
    /// Re-sync of an already indexed device; disables the duplicate check
    update: bool,
    state: Mutex<CrawlState>,
}

impl GraphCrawler {
    pub fn new(
        session: PluginSession,
        store: ResourceStoreRef,
        device_uuid: impl Into<String>,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            session,
            store,
            device_uuid: device_uuid.into(),
            config,
            update: false,
            state: Mutex::new(CrawlState::default()),
        }
    }

    /// Mark this crawl as a re-sync of an already indexed device
    pub fn updating(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    pub fn device_uuid(&self) -> &str {
        &self.device_uuid
    }

    pub fn session(&self) -> &PluginSession {
        &self.session
    }

    pub(crate) fn store(&self) -> &ResourceStoreRef {
        &self.store
    }

    // =========================================================================
    // Systems
    // =========================================================================

    /// Discover every member of the Systems collection.
    ///
    /// A member already indexed under its UUID fails the whole call with
    /// `DuplicateResource` before anything is persisted. Other member
    /// failures are recorded and the remaining members still run; the call
    /// only fails when no member succeeded.
    pub async fn discover_systems(&self, budget: u32) -> Result<(Vec<SystemRecord>, u32)> {
        let reply = self.session.get(SYSTEMS_COLLECTION).await?;
        let collection = reply.json(SYSTEMS_COLLECTION)?;
        let members = member_links(&collection);
        info!(device = %self.device_uuid, systems = members.len(), "Discovering systems");
        if members.is_empty() {
            return Ok((Vec::new(), budget));
        }

        let share = progress::divide(budget, members.len());
        let results: Vec<(String, Result<(SystemRecord, u32)>)> = stream::iter(members)
            .map(|path| async move {
                let result = self.discover_system(&path, share).await;
                (path, result)
            })
            .buffer_unordered(self.config.max_concurrent_fetches)
            .collect()
            .await;

        let mut systems = Vec::new();
        let mut total = 0u32;
        let mut duplicate = None;
        let mut last_error = None;
        for (path, result) in results {
            match result {
                Ok((system, delta)) => {
                    total = total.saturating_add(delta);
                    systems.push(system);
                }
                Err(e @ Error::DuplicateResource { .. }) => duplicate = Some(e),
                Err(e) => {
                    self.record_failure(&path, &e);
                    total = total.saturating_add(share);
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = duplicate {
            return Err(e);
        }
        match last_error {
            Some(e) if systems.is_empty() => Err(e),
            _ => {
                systems.sort_by(|a, b| a.key.cmp(&b.key));
                Ok((systems, total))
            }
        }
    }

    /// Discover one compute system and its subtree
    pub async fn discover_system(&self, path: &str, budget: u32) -> Result<(SystemRecord, u32)> {
        self.claim(path);
        let reply = self.session.get(path).await?;
        let document = reply.json(path)?;

        let odata_id = string_field(&document, ODATA_ID, path)?;
        let id = string_field(&document, "Id", path)?;
        let uuid = string_field(&document, "UUID", path)?;
        let key = form_key(&odata_id, &id, &self.device_uuid);

        if !self.update && self.store.exists(tables::SYSTEM_UUID, &uuid).await? {
            warn!(device = %self.device_uuid, uuid = %uuid, "Compute system already exists");
            return Err(Error::DuplicateResource {
                kind: tables::COMPUTER_SYSTEM.to_string(),
                uuid,
            });
        }

        let body = namespace_paths(&reply.body, &self.device_uuid);
        let namespaced: Value =
            serde_json::from_str(&body).map_err(|e| Error::malformed(path, e))?;
        let links = extract_links(&document, false);
        let children = self.record_and_claim(
            DiscoveredResource {
                table: tables::COMPUTER_SYSTEM.to_string(),
                key: key.clone(),
                path: path.to_string(),
                body,
            },
            links,
            &odata_id,
            SkipContext::LinkContains(&self.config.skip_under_system),
        );

        debug!(key = %key, children = children.len(), "Discovered compute system");
        let delta = self.fan_out(children, &id, budget).await;
        Ok((
            SystemRecord {
                key,
                id,
                uuid,
                document: namespaced,
            },
            delta,
        ))
    }

    // =========================================================================
    // Root Collections
    // =========================================================================

    /// Discover every member of a root collection such as Chassis or Managers
    pub async fn discover_collection(&self, collection_path: &str, budget: u32) -> u32 {
        let document = match self.fetch_json(collection_path).await {
            Ok(document) => document,
            Err(e) => {
                self.record_failure(collection_path, &e);
                return budget;
            }
        };
        let members = member_links(&document);
        if members.is_empty() {
            return budget;
        }

        let share = progress::divide(budget, members.len());
        stream::iter(members)
            .map(|path| self.discover_member(path, share))
            .buffer_unordered(self.config.max_concurrent_fetches)
            .fold(0u32, |acc, delta| async move { acc.saturating_add(delta) })
            .await
    }

    async fn discover_member(&self, path: String, budget: u32) -> u32 {
        if !self.claim(&path) {
            return budget;
        }
        let (document, body) = match self.fetch_with_body(&path).await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.record_failure(&path, &e);
                return budget;
            }
        };
        let identity = string_field(&document, ODATA_ID, &path)
            .and_then(|oid| string_field(&document, "Id", &path).map(|id| (oid, id)));
        let (odata_id, id) = match identity {
            Ok(identity) => identity,
            Err(e) => {
                self.record_failure(&path, &e);
                return budget;
            }
        };

        let links = extract_links(&document, false);
        let children = self.record_and_claim(
            DiscoveredResource {
                table: resource_name(&path, false),
                key: form_key(&odata_id, &id, &self.device_uuid),
                path: path.clone(),
                body: namespace_paths(&body, &self.device_uuid),
            },
            links,
            &odata_id,
            SkipContext::LinkContains(&self.config.skip_under_others),
        );
        self.fan_out(children, &id, budget).await
    }

    // =========================================================================
    // Storage Rediscovery
    // =========================================================================

    /// Refetch a system's Storage collection and its subtree.
    ///
    /// Returns the owning system read back from the store.
    pub async fn rediscover_storage(&self, storage_path: &str, budget: u32) -> Result<(SystemRecord, u32)> {
        self.claim(storage_path);
        let (document, body) = self.fetch_with_body(storage_path).await?;

        let system_key = storage_path
            .replace("/Storage", "")
            .replace("/Systems/", &format!("/Systems/{}.", self.device_uuid));
        let system_document = self
            .store
            .get_json(tables::COMPUTER_SYSTEM, &system_key)
            .await?
            .ok_or_else(|| Error::persistence(tables::COMPUTER_SYSTEM, &system_key, "system not found"))?;
        let id = string_field(&system_document, "Id", &system_key)?;
        let uuid = string_field(&system_document, "UUID", &system_key)?;

        let odata_id = string_field(&document, ODATA_ID, storage_path)?;
        let links = extract_links(&document, false);
        let children = self.record_and_claim(
            DiscoveredResource {
                table: resource_name(storage_path, true),
                key: form_key(&odata_id, &id, &self.device_uuid),
                path: storage_path.to_string(),
                body: namespace_paths(&body, &self.device_uuid),
            },
            links,
            &odata_id,
            SkipContext::LinkContains(&self.config.skip_under_system),
        );

        info!(system = %system_key, children = children.len(), "Rediscovering storage");
        let delta = self.fan_out(children, &id, budget).await;
        Ok((
            SystemRecord {
                key: system_key,
                id,
                uuid,
                document: system_document,
            },
            delta,
        ))
    }

    // =========================================================================
    // Recursive Discovery
    // =========================================================================

    fn discover_resource(&self, node: CrawlNode) -> BoxFuture<'_, u32> {
        async move {
            let (mut document, body) = match self.fetch_with_body(&node.path).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    self.record_failure(&node.path, &e);
                    return node.budget;
                }
            };

            let key = if is_root_keyed(&node.path) {
                form_root_key(&node.path, &self.device_uuid)
            } else {
                form_key(&node.path, &node.owner_id, &self.device_uuid)
            };
            let is_collection = document.get("Members").is_some();
            let table = resource_name(&node.path, is_collection);
            let links = extract_links(&document, node.oem);

            let body = if is_collection && table.contains("VolumesCollection") {
                advertise_volume_creation(&mut document, &node.path);
                document.to_string()
            } else {
                body
            };

            let children = self.record_and_claim(
                DiscoveredResource {
                    table,
                    key,
                    path: node.path.clone(),
                    body: namespace_paths(&body, &self.device_uuid),
                },
                links,
                &node.path,
                SkipContext::ParentContains(&self.config.skip_under_others),
            );
            self.fan_out(children, &node.owner_id, node.budget).await
        }
        .boxed()
    }

    /// Recurse into surviving links; a node without any takes its whole budget
    async fn fan_out(&self, links: LinkSet, owner_id: &str, budget: u32) -> u32 {
        if links.is_empty() {
            return budget;
        }
        let share = progress::divide(budget, links.len());
        let children = links.into_iter().map(|(path, oem)| CrawlNode {
            path,
            owner_id: owner_id.to_string(),
            oem,
            budget: share,
        });

        stream::iter(children)
            .map(|node| self.discover_resource(node))
            .buffer_unordered(self.config.max_concurrent_fetches)
            .fold(0u32, |acc, delta| async move { acc.saturating_add(delta) })
            .await
    }

    // =========================================================================
    // Shared State
    // =========================================================================

    /// Claim a path for fetching; false when already visited
    fn claim(&self, path: &str) -> bool {
        self.state.lock().visited.insert(path.to_string())
    }

    /// Store a discovered document, filter its links and claim the survivors
    fn record_and_claim(
        &self,
        resource: DiscoveredResource,
        links: LinkSet,
        current: &str,
        context: SkipContext<'_>,
    ) -> LinkSet {
        let mut state = self.state.lock();
        state
            .inventory
            .insert((resource.table.clone(), resource.key.clone()), resource);

        let (survivors, dropped) = filter_links(links, current, &state.visited, context);
        for link in survivors.keys() {
            state.visited.insert(link.clone());
        }
        drop(state);

        self.session.metrics().record_links_skipped(dropped as u64);
        survivors
    }

    pub(crate) fn insert_resource(&self, resource: DiscoveredResource) {
        self.state
            .lock()
            .inventory
            .insert((resource.table.clone(), resource.key.clone()), resource);
    }

    fn record_failure(&self, path: &str, error: &Error) {
        warn!(device = %self.device_uuid, path = %path, error = %error, "Discovery branch failed");
        self.state.lock().failures.push(BranchFailure::new(path, error));
    }

    pub(crate) async fn fetch_json(&self, path: &str) -> Result<Value> {
        self.session.get(path).await?.json(path)
    }

    async fn fetch_with_body(&self, path: &str) -> Result<(Value, String)> {
        let reply = self.session.get(path).await?;
        let document = reply.json(path)?;
        Ok((document, reply.body))
    }

    // =========================================================================
    // Inventory Access
    // =========================================================================

    /// Snapshot of the discovered documents
    pub fn inventory(&self) -> Vec<DiscoveredResource> {
        self.state.lock().inventory.values().cloned().collect()
    }

    /// Whether a path has been fetched or claimed in this crawl
    pub fn is_visited(&self, path: &str) -> bool {
        self.state.lock().visited.contains(path)
    }

    pub fn failures(&self) -> Vec<BranchFailure> {
        self.state.lock().failures.clone()
    }

    /// One message naming every failed branch, `None` when nothing failed
    pub fn failure_message(&self) -> Option<String> {
        let state = self.state.lock();
        if state.failures.is_empty() {
            return None;
        }
        let mut message = String::from("discovery failed for [");
        for failure in &state.failures {
            message.push_str(&format!("{}:err-{}; ", failure.path, failure.message));
        }
        message.push(']');
        Some(message)
    }

    /// Write every discovered document to the store.
    ///
    /// Stops at the first failed save; documents saved before it stay saved.
    pub async fn persist_inventory(&self) -> Result<usize> {
        let resources = self.inventory();
        let mut saved = 0usize;
        for resource in &resources {
            self.store
                .save(&resource.table, &resource.key, resource.body.as_bytes())
                .await
                .map_err(|e| match e {
                    Error::PersistenceFailure { .. } => e,
                    other => Error::persistence(&resource.table, &resource.key, other),
                })?;
            saved += 1;
        }
        self.session.metrics().record_persisted(saved as u64);
        info!(device = %self.device_uuid, documents = saved, "Persisted discovered inventory");
        Ok(saved)
    }
}

/// Attach the create-volume capability stub to a Volumes collection
fn advertise_volume_creation(document: &mut Value, path: &str) {
    if let Value::Object(map) = document {
        map.insert(
            "@Redfish.CollectionCapabilities".to_string(),
            json!({
                "@odata.type": "#CollectionCapabilities.v1_4_0.CollectionCapabilities",
                "Capabilities": [{
                    "CapabilitiesObject": {"@odata.id": format!("{}/Capabilities", path)},
                    "Links": {"TargetCollection": {"@odata.id": path}},
                    "UseCase": "VolumeCreation"
                }]
            }),
        );
    }
}

fn string_field(document: &Value, field: &str, path: &str) -> Result<String> {
    document
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::malformed(path, format!("missing string field {}", field)))
}
