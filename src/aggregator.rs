//! Aggregator
//!
//! Top-level coordinator of the add-compute and storage rediscovery flows.
//! Owns the per-process collaborators (transport, liveness probe, session
//! registry, crawl metrics) and hands them to each flow.
//!
//! Add-compute phases, each credited to the task as it completes:
//!
//! ```text
//! status check -> systems -> chassis -> managers -> registries
//!              -> persist inventory -> search index -> telemetry
//! ```
//!
//! A duplicate system or a failed status check ends the flow before
//! anything is persisted. Failed branches of the crawl are reported in the
//! result without aborting their siblings.

use crate::config::AggregatorConfig;
use crate::discovery::crawler::{BranchFailure, CrawlerConfig, GraphCrawler};
use crate::discovery::search_index::{SearchIndexBuilder, SearchIndexRecord};
use crate::domain::ports::{
    Device, PluginStatusProbeRef, PluginTransportRef, ResourceStoreRef, TaskUpdaterRef,
};
use crate::error::{Error, ErrorResponse, Result};
use crate::metrics::CrawlMetrics;
use crate::plugin::{
    check_status, ConnectionMethodVariant, HttpPluginTransport, PluginSession, SessionContext,
    SessionRegistry, StatusEndpointProbe, UrlTranslator,
};
use crate::task::TaskReporter;
use crate::telemetry::TelemetryMerger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Target URI reported on add-compute tasks
pub const ADD_COMPUTE_TARGET: &str = "/redfish/v1/AggregationService/Actions/AggregationService.Add";

pub const CHASSIS_COLLECTION: &str = "/redfish/v1/Chassis";
pub const MANAGERS_COLLECTION: &str = "/redfish/v1/Managers";

// =============================================================================
// Requests and Reports
// =============================================================================

/// A device to add or re-sync
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddComputeRequest {
    pub manager_address: String,
    pub user_name: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// `<plugin type>:<preferred auth>:<plugin id>`
    pub connection_method_variant: String,
    #[serde(rename = "DeviceUUID")]
    pub device_uuid: String,
    /// Re-sync of a device already in the index
    #[serde(default)]
    pub update: bool,
}

impl AddComputeRequest {
    fn device(&self, variant: &ConnectionMethodVariant) -> Device {
        Device {
            uuid: self.device_uuid.clone(),
            manager_address: self.manager_address.clone(),
            user_name: self.user_name.clone(),
            password: self.password.clone(),
            plugin_id: variant.plugin_id.clone(),
        }
    }
}

/// Outcome of a completed add-compute flow
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationReport {
    pub device_uuid: String,
    /// Keys of the indexed compute systems
    pub system_keys: Vec<String>,
    /// Event message bus queues the plugin publishes on
    pub event_queues: Vec<String>,
    pub documents_persisted: usize,
    /// Percent reported before completion
    pub progress: u32,
    /// Crawl branches that failed without aborting the flow
    pub failures: Vec<BranchFailure>,
}

// =============================================================================
// Aggregator
// =============================================================================

/// Discovery coordinator for one process
pub struct Aggregator {
    config: AggregatorConfig,
    context: SessionContext,
    store: ResourceStoreRef,
    updater: TaskUpdaterRef,
}

impl Aggregator {
    pub fn new(
        config: AggregatorConfig,
        transport: PluginTransportRef,
        store: ResourceStoreRef,
        updater: TaskUpdaterRef,
    ) -> Self {
        let context = SessionContext {
            transport,
            probe: None,
            translator: Arc::new(UrlTranslator::new(&config.url_translation)),
            registry: SessionRegistry::new(),
            metrics: Arc::new(CrawlMetrics::new()),
        };
        Self {
            config,
            context,
            store,
            updater,
        }
    }

    /// Build with the HTTPS transport and status endpoint probe
    pub fn from_config(
        config: AggregatorConfig,
        store: ResourceStoreRef,
        updater: TaskUpdaterRef,
    ) -> Result<Self> {
        config.validate()?;
        let transport: PluginTransportRef = Arc::new(HttpPluginTransport::new(&config.plugin)?);
        let probe = Arc::new(StatusEndpointProbe::new(transport.clone(), &config.plugin));
        Ok(Self::new(config, transport, store, updater).with_probe(probe))
    }

    pub fn with_probe(mut self, probe: PluginStatusProbeRef) -> Self {
        self.context.probe = Some(probe);
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<CrawlMetrics> {
        self.context.metrics.clone()
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        self.context.registry.clone()
    }

    // =========================================================================
    // Add Compute
    // =========================================================================

    /// Discover, persist and index a device, reporting progress on `task_id`.
    ///
    /// Failures are also pushed to the task; use [`ErrorResponse`] from
    /// [`Error::to_response`] for the caller-facing result.
    pub async fn add_compute(&self, request: &AddComputeRequest, task_id: &str) -> Result<AggregationReport> {
        let reporter = TaskReporter::new(self.updater.clone(), task_id, ADD_COMPUTE_TARGET);
        info!(
            device = %request.device_uuid,
            address = %request.manager_address,
            task = %task_id,
            "Adding compute resource"
        );

        match self.run_add(request, &reporter).await {
            Ok(report) => {
                reporter.complete(serde_json::to_value(&report).ok()).await?;
                info!(
                    device = %report.device_uuid,
                    systems = report.system_keys.len(),
                    failures = report.failures.len(),
                    "Compute resource added"
                );
                Ok(report)
            }
            Err(e) => {
                self.report_failure(&reporter, &e).await;
                Err(e)
            }
        }
    }

    /// Run [`Aggregator::add_compute`] and map a failure to its response
    pub async fn add_compute_response(
        &self,
        request: &AddComputeRequest,
        task_id: &str,
    ) -> std::result::Result<AggregationReport, ErrorResponse> {
        self.add_compute(request, task_id).await.map_err(|e| e.to_response())
    }

    async fn run_add(&self, request: &AddComputeRequest, reporter: &TaskReporter) -> Result<AggregationReport> {
        let budgets = self.config.progress;
        let variant = ConnectionMethodVariant::parse(&request.connection_method_variant)?;
        let device = request.device(&variant);

        let check = check_status(&variant, &device, &self.config, self.context.clone()).await?;
        reporter.progress(budgets.status_check).await?;

        let session = check.session.with_device_info(device.plugin_payload());
        let crawler = self.crawler(session.clone(), &device).updating(request.update);

        let (systems, delta) = crawler.discover_systems(budgets.systems).await?;
        reporter.progress(delta).await?;

        let delta = crawler.discover_collection(CHASSIS_COLLECTION, budgets.chassis).await;
        reporter.progress(delta).await?;
        let delta = crawler.discover_collection(MANAGERS_COLLECTION, budgets.managers).await;
        reporter.progress(delta).await?;
        let delta = crawler
            .discover_registries(&self.config.registry_store_path, budgets.registries)
            .await;
        reporter.progress(delta).await?;

        let documents_persisted = crawler.persist_inventory().await?;
        let builder = SearchIndexBuilder::new(self.store.clone());
        for system in &systems {
            builder.rebuild(system, &device.uuid).await?;
        }

        let merger = TelemetryMerger::new(
            session,
            self.store.clone(),
            device.uuid.clone(),
            self.config.max_concurrent_fetches,
        );
        let delta = merger.merge_all(budgets.telemetry).await;
        let progress = reporter.progress(delta).await?;

        if let Some(message) = crawler.failure_message() {
            warn!(device = %device.uuid, "{}", message);
        }
        Ok(AggregationReport {
            device_uuid: device.uuid,
            system_keys: systems.into_iter().map(|s| s.key).collect(),
            event_queues: check.event_queues,
            documents_persisted,
            progress,
            failures: crawler.failures(),
        })
    }

    // =========================================================================
    // Storage Rediscovery
    // =========================================================================

    /// Refetch one system's Storage subtree and rebuild its index record
    pub async fn rediscover_storage(
        &self,
        request: &AddComputeRequest,
        storage_path: &str,
        task_id: &str,
    ) -> Result<SearchIndexRecord> {
        let reporter = TaskReporter::new(self.updater.clone(), task_id, storage_path);
        match self.run_rediscover(request, storage_path, &reporter).await {
            Ok(record) => {
                reporter.complete(None).await?;
                Ok(record)
            }
            Err(e) => {
                self.report_failure(&reporter, &e).await;
                Err(e)
            }
        }
    }

    async fn run_rediscover(
        &self,
        request: &AddComputeRequest,
        storage_path: &str,
        reporter: &TaskReporter,
    ) -> Result<SearchIndexRecord> {
        let budgets = self.config.progress;
        let variant = ConnectionMethodVariant::parse(&request.connection_method_variant)?;
        let device = request.device(&variant);

        let check = check_status(&variant, &device, &self.config, self.context.clone()).await?;
        reporter.progress(budgets.status_check).await?;

        let session = check.session.with_device_info(device.plugin_payload());
        let crawler = self.crawler(session, &device).updating(true);
        let (system, delta) = crawler.rediscover_storage(storage_path, budgets.systems).await?;
        crawler.persist_inventory().await?;
        let record = SearchIndexBuilder::new(self.store.clone())
            .rebuild(&system, &device.uuid)
            .await?;
        reporter.progress(delta).await?;

        if let Some(message) = crawler.failure_message() {
            warn!(device = %device.uuid, "{}", message);
        }
        Ok(record)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn crawler(&self, session: PluginSession, device: &Device) -> GraphCrawler {
        GraphCrawler::new(
            session,
            self.store.clone(),
            device.uuid.clone(),
            CrawlerConfig::from(&self.config),
        )
    }

    async fn report_failure(&self, reporter: &TaskReporter, failure: &Error) {
        if failure.is_cancellation() {
            return;
        }
        error!(task = %reporter.task_id(), error = %failure, "Discovery failed");
        if let Err(e) = reporter.fail(failure).await {
            warn!(task = %reporter.task_id(), error = %e, "Unable to record task failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{PluginResponse, ResourceStore, TaskState};
    use crate::error::status;
    use crate::plugin::transport::STATUS_PATH;
    use crate::store::{tables, MemoryStore};
    use crate::testing::{RecordingTaskUpdater, ScriptedTransport};
    use assert_matches::assert_matches;
    use serde_json::{json, Value};

    fn ok(body: Value) -> PluginResponse {
        PluginResponse::json(200, &body)
    }

    fn request(uuid: &str) -> AddComputeRequest {
        AddComputeRequest {
            manager_address: "10.0.0.5:45001".into(),
            user_name: "admin".into(),
            password: "secret".into(),
            connection_method_variant: "Compute:BasicAuth:GRF_v1.0.0".into(),
            device_uuid: uuid.into(),
            update: false,
        }
    }

    fn script_device(transport: &ScriptedTransport) {
        transport.respond(STATUS_PATH, ok(json!({"Version": "v1.0.0"})));
        transport.respond(
            "/redfish/v1/Systems",
            ok(json!({"Members": [{"@odata.id": "/redfish/v1/Systems/1"}]})),
        );
        transport.respond(
            "/redfish/v1/Systems/1",
            ok(json!({
                "@odata.id": "/redfish/v1/Systems/1",
                "Id": "1",
                "UUID": "u1",
                "PowerState": "On",
                "Storage": {"@odata.id": "/redfish/v1/Systems/1/Storage"}
            })),
        );
        transport.respond(
            "/redfish/v1/Systems/1/Storage",
            ok(json!({"@odata.id": "/redfish/v1/Systems/1/Storage", "Members": []})),
        );
        transport.respond(
            CHASSIS_COLLECTION,
            ok(json!({"Members": [{"@odata.id": "/redfish/v1/Chassis/1"}]})),
        );
        transport.respond(
            "/redfish/v1/Chassis/1",
            ok(json!({"@odata.id": "/redfish/v1/Chassis/1", "Id": "1"})),
        );
        transport.respond(
            MANAGERS_COLLECTION,
            ok(json!({"Members": [{"@odata.id": "/redfish/v1/Managers/1"}]})),
        );
        transport.respond(
            "/redfish/v1/Managers/1",
            ok(json!({"@odata.id": "/redfish/v1/Managers/1", "Id": "1", "FirmwareVersion": "2.40"})),
        );
        transport.respond("/redfish/v1/Registries", ok(json!({"Members": []})));
    }

    fn aggregator(
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryStore>,
        updater: Arc<RecordingTaskUpdater>,
        registry_dir: &std::path::Path,
    ) -> Aggregator {
        let config = AggregatorConfig {
            registry_store_path: registry_dir.to_path_buf(),
            ..Default::default()
        };
        Aggregator::new(config, transport, store, updater)
    }

    #[tokio::test]
    async fn test_add_compute_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new();
        script_device(&transport);
        let store = Arc::new(MemoryStore::new());
        let updater = RecordingTaskUpdater::new();
        let aggregator = aggregator(transport.clone(), store.clone(), updater.clone(), dir.path());

        let report = aggregator.add_compute(&request("d1"), "task-1").await.unwrap();
        assert_eq!(report.system_keys, vec!["/redfish/v1/Systems/d1.1"]);
        assert_eq!(report.progress, 99);
        assert!(report.failures.is_empty());

        assert!(store
            .exists(tables::COMPUTER_SYSTEM, "/redfish/v1/Systems/d1.1")
            .await
            .unwrap());
        assert!(store.exists(tables::CHASSIS, "/redfish/v1/Chassis/d1.1").await.unwrap());
        let index = store
            .get_json(tables::SEARCH_INDEX, "/redfish/v1/Systems/d1.1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(index["FirmwareVersion"], "2.40");
        assert_eq!(index["PowerState"], "On");

        let updates = updater.updates();
        let percents: Vec<u32> = updates.iter().map(|u| u.percent_complete).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        let last = updates.last().unwrap();
        assert_eq!(last.state, TaskState::Completed);
        assert_eq!(last.percent_complete, 100);

        let sent = transport.requests();
        assert_eq!(sent[0].path, STATUS_PATH);
        let system_call = sent.iter().find(|r| r.path == "/redfish/v1/Systems/1").unwrap();
        assert_eq!(system_call.body.as_ref().unwrap()["ManagerAddress"], "10.0.0.5:45001");
    }

    #[tokio::test]
    async fn test_second_add_of_same_system_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());

        let transport = ScriptedTransport::new();
        script_device(&transport);
        let first = aggregator(transport, store.clone(), RecordingTaskUpdater::new(), dir.path());
        first.add_compute(&request("d1"), "task-1").await.unwrap();
        let persisted = store.table_len(tables::COMPUTER_SYSTEM);

        let transport = ScriptedTransport::new();
        script_device(&transport);
        let updater = RecordingTaskUpdater::new();
        let second = aggregator(transport, store.clone(), updater.clone(), dir.path());
        let response = second
            .add_compute_response(&request("d2"), "task-2")
            .await
            .unwrap_err();

        assert_eq!(response.status_code, 409);
        assert_eq!(response.status_message, status::RESOURCE_ALREADY_EXISTS);
        assert_eq!(store.table_len(tables::COMPUTER_SYSTEM), persisted);
        assert!(!store
            .exists(tables::COMPUTER_SYSTEM, "/redfish/v1/Systems/d2.1")
            .await
            .unwrap());
        assert_eq!(updater.updates().last().unwrap().state, TaskState::Exception);
    }

    #[tokio::test]
    async fn test_firmware_mismatch_fails_before_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new();
        script_device(&transport);
        let store = Arc::new(MemoryStore::new());
        let aggregator = aggregator(transport.clone(), store.clone(), RecordingTaskUpdater::new(), dir.path());

        let mut add = request("d1");
        add.connection_method_variant = "Compute:BasicAuth:GRF_v2.0.0".into();
        let result = aggregator.add_compute(&add, "task-1").await;

        assert_matches!(result, Err(Error::UnsupportedFirmwareVersion { .. }));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(store.table_len(tables::COMPUTER_SYSTEM), 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_flow() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new();
        script_device(&transport);
        let updater = RecordingTaskUpdater::new();
        updater.cancel_next();
        let aggregator = aggregator(transport.clone(), Arc::new(MemoryStore::new()), updater.clone(), dir.path());

        let result = aggregator.add_compute(&request("d1"), "task-1").await;
        assert_matches!(result, Err(Error::CancelledByOperator { percent: 10, .. }));
        assert_eq!(transport.calls("/redfish/v1/Systems"), 0);
        assert_eq!(updater.updates().last().unwrap().state, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn test_rediscover_storage_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport::new();
        script_device(&transport);
        let first = aggregator(transport, store.clone(), RecordingTaskUpdater::new(), dir.path());
        first.add_compute(&request("d1"), "task-1").await.unwrap();

        let transport = ScriptedTransport::new();
        transport.respond(STATUS_PATH, ok(json!({"Version": "v1.0.0"})));
        transport.respond(
            "/redfish/v1/Systems/1/Storage",
            ok(json!({
                "@odata.id": "/redfish/v1/Systems/1/Storage",
                "Members": [{"@odata.id": "/redfish/v1/Systems/1/Storage/1"}]
            })),
        );
        transport.respond(
            "/redfish/v1/Systems/1/Storage/1",
            ok(json!({
                "@odata.id": "/redfish/v1/Systems/1/Storage/1",
                "Drives": [{"@odata.id": "/redfish/v1/Systems/1/Storage/1/Drives/0"}]
            })),
        );
        transport.respond(
            "/redfish/v1/Systems/1/Storage/1/Drives/0",
            ok(json!({
                "@odata.id": "/redfish/v1/Systems/1/Storage/1/Drives/0",
                "CapacityBytes": 480_000_000_000u64,
                "MediaType": "SSD"
            })),
        );
        let second = aggregator(transport, store.clone(), RecordingTaskUpdater::new(), dir.path());

        let record = second
            .rediscover_storage(&request("d1"), "/redfish/v1/Systems/1/Storage", "task-2")
            .await
            .unwrap();
        assert_eq!(record["Storage/Drives/Quantity"], 1);
        assert_eq!(record["Storage/Drives/Type"], json!(["SSD"]));
        assert_eq!(record["FirmwareVersion"], "2.40");
    }
}
