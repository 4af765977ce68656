//! Telemetry Merger
//!
//! Discovers the four telemetry subtrees of a device and folds them into
//! the fleet-wide telemetry inventory. Unlike device resources, telemetry
//! documents are shared by every device behind the same service and are
//! stored under their plain northbound paths: collections are unioned with
//! what earlier runs stored, metric documents are namespaced into the
//! reporting device and rewritten through the wildcard templates.

use crate::discovery::keys::{namespace_paths, resource_name};
use crate::discovery::links::{member_links, ODATA_ID};
use crate::discovery::progress;
use crate::domain::ports::ResourceStoreRef;
use crate::error::{Error, Result};
use crate::plugin::PluginSession;
use crate::telemetry::lock::MetricRequestLock;
use crate::telemetry::wildcard::apply_wildcards;
use futures::{stream, StreamExt};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};

// =============================================================================
// Telemetry Collections
// =============================================================================

/// One of the telemetry subtrees merged on every discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryCollection {
    MetricDefinitions,
    MetricReportDefinitions,
    MetricReports,
    Triggers,
}

impl TelemetryCollection {
    pub const ALL: [TelemetryCollection; 4] = [
        TelemetryCollection::MetricDefinitions,
        TelemetryCollection::MetricReportDefinitions,
        TelemetryCollection::MetricReports,
        TelemetryCollection::Triggers,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            TelemetryCollection::MetricDefinitions => "/redfish/v1/TelemetryService/MetricDefinitions",
            TelemetryCollection::MetricReportDefinitions => {
                "/redfish/v1/TelemetryService/MetricReportDefinitions"
            }
            TelemetryCollection::MetricReports => "/redfish/v1/TelemetryService/MetricReports",
            TelemetryCollection::Triggers => "/redfish/v1/TelemetryService/Triggers",
        }
    }

    /// Whether members are fetched individually; reports are too volatile
    pub fn fetches_members(&self) -> bool {
        !matches!(self, TelemetryCollection::MetricReports)
    }
}

impl std::fmt::Display for TelemetryCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TelemetryCollection::MetricDefinitions => "MetricDefinitions",
            TelemetryCollection::MetricReportDefinitions => "MetricReportDefinitions",
            TelemetryCollection::MetricReports => "MetricReports",
            TelemetryCollection::Triggers => "Triggers",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Collection Union
// =============================================================================

/// Union the `Members` of a stored and a freshly fetched collection.
///
/// Members are keyed by `@odata.id`, first appearance wins and stored
/// members come first. All other fields come from `fresh`.
pub fn union_members(prior: &Value, fresh: &Value) -> Value {
    let mut members: IndexMap<String, Value> = IndexMap::new();
    for source in [prior, fresh] {
        let Some(items) = source.get("Members").and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            if let Some(link) = item.get(ODATA_ID).and_then(Value::as_str) {
                members.entry(link.to_string()).or_insert_with(|| item.clone());
            }
        }
    }

    let mut merged = fresh.clone();
    if let Value::Object(map) = &mut merged {
        map.insert("Members@odata.count".to_string(), Value::from(members.len()));
        map.insert(
            "Members".to_string(),
            Value::Array(members.into_values().collect()),
        );
    }
    merged
}

// =============================================================================
// Telemetry Merger
// =============================================================================

/// Merges one device's telemetry into the shared inventory
pub struct TelemetryMerger {
    session: PluginSession,
    store: ResourceStoreRef,
    device_uuid: String,
    lock: MetricRequestLock,
    max_concurrent: usize,
}

impl TelemetryMerger {
    pub fn new(
        session: PluginSession,
        store: ResourceStoreRef,
        device_uuid: impl Into<String>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            lock: MetricRequestLock::new(store.clone()),
            session,
            store,
            device_uuid: device_uuid.into(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Merge every telemetry collection and return the progress made.
    ///
    /// The budget is split across the collections whose members are
    /// fetched; the reports collection is merged without a share.
    pub async fn merge_all(&self, budget: u32) -> u32 {
        let weighted = TelemetryCollection::ALL
            .iter()
            .filter(|c| c.fetches_members())
            .count();
        let share = progress::divide(budget, weighted);

        let mut total = 0u32;
        for collection in TelemetryCollection::ALL {
            let collection_budget = if collection.fetches_members() { share } else { 0 };
            total = total.saturating_add(self.merge_collection(collection, collection_budget).await);
        }
        info!(plugin = %self.session.plugin().id, progress = total, "Telemetry merge complete");
        total
    }

    /// Fetch one collection, union it with the stored one and fetch its members
    pub async fn merge_collection(&self, collection: TelemetryCollection, budget: u32) -> u32 {
        let path = collection.path();
        let fresh = match self.fetch_collection(path).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(collection = %collection, error = %e, "Telemetry collection unavailable");
                return budget;
            }
        };

        if let Err(e) = self.store_collection(path, &fresh).await {
            warn!(collection = %collection, error = %e, "Unable to store telemetry collection");
            return budget;
        }
        if !collection.fetches_members() {
            return budget;
        }

        let members = member_links(&fresh);
        if members.is_empty() {
            return budget;
        }
        let share = progress::divide(budget, members.len());
        stream::iter(members)
            .map(|member| async move { self.fetch_metric(&member, share).await })
            .buffer_unordered(self.max_concurrent)
            .fold(0u32, |acc, delta| async move { acc.saturating_add(delta) })
            .await
    }

    async fn fetch_collection(&self, path: &str) -> Result<Value> {
        let reply = self.session.get(path).await?;
        if reply.status != 200 {
            return Err(Error::UpstreamStatus {
                status: reply.status,
                url: self.session.plugin().url_for(path),
                body: reply.body,
            });
        }
        reply.json(path)
    }

    async fn store_collection(&self, path: &str, fresh: &Value) -> Result<()> {
        let table = resource_name(path, true);
        let merged = match self.store.get_json(&table, path).await? {
            Some(prior) => union_members(&prior, fresh),
            None => fresh.clone(),
        };
        let encoded = serde_json::to_vec(&merged)?;
        self.store
            .save(&table, path, &encoded)
            .await
            .map_err(|e| Error::persistence(&table, path, e))?;
        self.session.metrics().record_persisted(1);
        Ok(())
    }

    /// Fetch and store one metric document under the active request lock.
    ///
    /// Returns `budget` whether the document was stored, skipped or failed.
    pub async fn fetch_metric(&self, path: &str, budget: u32) -> u32 {
        match self.lock.run_exclusive(path, self.store_metric(path)).await {
            Ok(Some(Ok(()))) => {}
            Ok(Some(Err(e @ Error::UpstreamStatus { .. }))) => {
                debug!(path = %path, error = %e, "Metric resource skipped");
            }
            Ok(Some(Err(e))) => warn!(path = %path, error = %e, "Metric resource failed"),
            Ok(None) => self.session.metrics().record_lock_skip(),
            Err(e) => warn!(path = %path, error = %e, "Active metric request lock unavailable"),
        }
        budget
    }

    async fn store_metric(&self, path: &str) -> Result<()> {
        let reply = self.session.get(path).await?;
        if reply.status != 200 {
            debug!(path = %path, status = reply.status, "Metric resource not ready");
            return Ok(());
        }
        let body = namespace_paths(&reply.body, &self.device_uuid);
        let mut document: Value = serde_json::from_str(&body).map_err(|e| Error::malformed(path, e))?;

        let table = resource_name(path, false);
        let prior = self.store.get_json(&table, path).await?;
        let body = if apply_wildcards(&mut document, prior.as_ref()) {
            serde_json::to_vec(&document)?
        } else {
            body.into_bytes()
        };

        self.store
            .save(&table, path, &body)
            .await
            .map_err(|e| Error::persistence(&table, path, e))?;
        self.session.metrics().record_persisted(1);
        Ok(())
    }
}
