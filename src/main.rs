//! Resource Aggregator
//!
//! Runs one add-compute discovery (or a storage rediscovery) against a
//! plugin, keeping the inventory in memory, and prints the outcome as JSON.
//! Health and prometheus metrics endpoints are served while it runs.

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use resource_aggregator::{
    AddComputeRequest, Aggregator, AggregatorConfig, CrawlMetrics, CrawlMetricsSnapshot, Error,
    MemoryStore, Result, TaskState, TaskUpdate, TaskUpdater,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Resource Aggregator - discover a managed device through its plugin
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Aggregator configuration file (YAML)
    #[arg(long, env = "AGGREGATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Address of the plugin managing the device (ip:port)
    #[arg(long, env = "MANAGER_ADDRESS")]
    manager_address: String,

    /// Device user name
    #[arg(long, env = "DEVICE_USERNAME")]
    username: String,

    /// Device password
    #[arg(long, env = "DEVICE_PASSWORD", hide_env_values = true)]
    password: String,

    /// Connection method variant, <type>:<auth>:<plugin id>
    #[arg(long, env = "CONNECTION_METHOD_VARIANT", default_value = "Compute:BasicAuth:GRF_v1.0.0")]
    connection_method_variant: String,

    /// Device UUID; generated when absent
    #[arg(long, env = "DEVICE_UUID")]
    device_uuid: Option<String>,

    /// Task id progress is reported on; generated when absent
    #[arg(long, env = "TASK_ID")]
    task_id: Option<String>,

    /// Re-sync a device that is already indexed
    #[arg(long, env = "UPDATE")]
    update: bool,

    /// Rediscover this Storage collection instead of adding the device
    #[arg(long, env = "STORAGE_PATH")]
    storage_path: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Keep serving health and metrics after the run until interrupted
    #[arg(long, env = "KEEP_SERVING")]
    keep_serving: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Resource Aggregator");
    info!("  Version: {}", resource_aggregator::VERSION);
    info!("  Manager address: {}", args.manager_address);
    info!("  Connection method: {}", args.connection_method_variant);

    let config = match &args.config {
        Some(path) => AggregatorConfig::from_yaml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AggregatorConfig::default(),
    };

    let store = Arc::new(MemoryStore::new());
    let aggregator = Aggregator::from_config(config, store.clone(), Arc::new(LogTaskUpdater))
        .context("building aggregator")?;

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics = aggregator.metrics();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    let request = AddComputeRequest {
        manager_address: args.manager_address.clone(),
        user_name: args.username.clone(),
        password: args.password.clone(),
        connection_method_variant: args.connection_method_variant.clone(),
        device_uuid: args
            .device_uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        update: args.update,
    };
    let task_id = args
        .task_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!("  Device UUID: {}", request.device_uuid);
    info!("  Task: {}", task_id);

    let outcome = match &args.storage_path {
        Some(storage_path) => aggregator
            .rediscover_storage(&request, storage_path, &task_id)
            .await
            .and_then(|record| serde_json::to_value(record).map_err(Error::from)),
        None => aggregator
            .add_compute(&request, &task_id)
            .await
            .and_then(|report| serde_json::to_value(report).map_err(Error::from)),
    };

    let succeeded = outcome.is_ok();
    let printed = match outcome {
        Ok(result) => result,
        Err(e) => serde_json::to_value(e.to_response()).context("encoding error response")?,
    };
    println!("{}", serde_json::to_string_pretty(&printed)?);

    let snapshot = aggregator.metrics().snapshot();
    info!(
        fetched = snapshot.documents_fetched,
        failures = snapshot.fetch_failures,
        persisted = snapshot.documents_persisted,
        stored_bytes = store.size_bytes(),
        "Discovery run finished"
    );

    if args.keep_serving {
        info!("Serving health and metrics until interrupted");
        tokio::signal::ctrl_c().await.context("waiting for interrupt")?;
    }

    if !succeeded {
        anyhow::bail!("discovery failed");
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Task Updates
// =============================================================================

/// Task service stand-in that logs every update
struct LogTaskUpdater;

#[async_trait]
impl TaskUpdater for LogTaskUpdater {
    async fn update_task(&self, update: TaskUpdate) -> Result<()> {
        match update.state {
            TaskState::Exception | TaskState::Killed => warn!(
                task = %update.task_id,
                state = ?update.state,
                percent = update.percent_complete,
                status_code = update.status_code,
                "Task failed"
            ),
            _ => info!(
                task = %update.task_id,
                state = ?update.state,
                percent = update.percent_complete,
                "Task progress"
            ),
        }
        Ok(())
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => Response::new(Body::from("ok")),
                _ => {
                    let mut response = Response::new(Body::from("not found"));
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    response
                }
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid health server address: {}", e)))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

/// Prometheus gauges mirroring the crawl counters
struct ExportedMetrics {
    documents_fetched: prometheus::IntGauge,
    fetch_failures: prometheus::IntGauge,
    probe_retries: prometheus::IntGauge,
    links_skipped: prometheus::IntGauge,
    documents_persisted: prometheus::IntGauge,
    metric_fetches_locked: prometheus::IntGauge,
}

impl ExportedMetrics {
    fn register() -> Result<Self> {
        let gauge = |name: &str, help: &str| {
            prometheus::register_int_gauge!(name, help)
                .map_err(|e| Error::Internal(format!("Unable to register {}: {}", name, e)))
        };
        Ok(Self {
            documents_fetched: gauge(
                "resource_aggregator_documents_fetched",
                "Plugin calls answered with any HTTP status",
            )?,
            fetch_failures: gauge(
                "resource_aggregator_fetch_failures",
                "Plugin calls that ended in an error",
            )?,
            probe_retries: gauge(
                "resource_aggregator_probe_retries",
                "Calls retried after a healthy status probe",
            )?,
            links_skipped: gauge(
                "resource_aggregator_links_skipped",
                "Links dropped by the visited set, parent check or denylists",
            )?,
            documents_persisted: gauge(
                "resource_aggregator_documents_persisted",
                "Documents written to the store",
            )?,
            metric_fetches_locked: gauge(
                "resource_aggregator_metric_fetches_locked",
                "Telemetry fetches skipped while another fetch held the lock",
            )?,
        })
    }

    fn update(&self, snapshot: &CrawlMetricsSnapshot) {
        let set = |gauge: &prometheus::IntGauge, value: u64| {
            gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
        };
        set(&self.documents_fetched, snapshot.documents_fetched);
        set(&self.fetch_failures, snapshot.fetch_failures);
        set(&self.probe_retries, snapshot.probe_retries);
        set(&self.links_skipped, snapshot.links_skipped);
        set(&self.documents_persisted, snapshot.documents_persisted);
        set(&self.metric_fetches_locked, snapshot.metric_fetches_locked);
    }
}

async fn run_metrics_server(addr: &str, metrics: Arc<CrawlMetrics>) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let exported = Arc::new(ExportedMetrics::register()?);

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        let exported = exported.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                let exported = exported.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => {
                            exported.update(&metrics.snapshot());
                            let encoder = TextEncoder::new();
                            let mut buffer = Vec::new();
                            match encoder.encode(&prometheus::gather(), &mut buffer) {
                                Ok(()) => {
                                    let mut response = Response::new(Body::from(buffer));
                                    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
                                        response.headers_mut().insert(CONTENT_TYPE, content_type);
                                    }
                                    response
                                }
                                Err(e) => {
                                    let mut response = Response::new(Body::from(e.to_string()));
                                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                    response
                                }
                            }
                        }
                        _ => {
                            let mut response = Response::new(Body::from("not found"));
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            response
                        }
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
