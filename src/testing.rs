//! Test doubles for the domain ports

use crate::config::UrlTranslationConfig;
use crate::domain::ports::{
    AuthType, Device, Plugin, PluginRequest, PluginResponse, PluginStatusProbe, PluginTransport,
    TaskUpdate, TaskUpdater,
};
use crate::error::{Error, Result};
use crate::metrics::CrawlMetrics;
use crate::plugin::{PluginSession, SessionContext, SessionRegistry, UrlTranslator};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Serves canned responses per southbound path.
///
/// Queued responses are served in order and the last one repeats.
/// Unscripted paths answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, VecDeque<PluginResponse>>>,
    failures: Mutex<HashMap<String, usize>>,
    timeouts: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<PluginRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, path: &str, response: PluginResponse) {
        self.responses
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    /// Fail the next `times` calls to `path` with a contact failure
    pub fn fail_times(&self, path: &str, times: usize) {
        self.failures.lock().insert(path.to_string(), times);
    }

    /// Time out the next `times` calls to `path`
    pub fn time_out_times(&self, path: &str, times: usize) {
        self.timeouts.lock().insert(path.to_string(), times);
    }

    pub fn requests(&self) -> Vec<PluginRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self, path: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.path == path).count()
    }
}

#[async_trait]
impl PluginTransport for ScriptedTransport {
    async fn send(&self, request: PluginRequest) -> Result<PluginResponse> {
        self.requests.lock().push(request.clone());

        if let Some(remaining) = self.failures.lock().get_mut(&request.path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::UnreachablePlugin {
                    url: request.url,
                    reason: "connection refused".into(),
                });
            }
        }

        if let Some(remaining) = self.timeouts.lock().get_mut(&request.path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::PluginTimeout { url: request.url });
            }
        }

        let mut responses = self.responses.lock();
        let Some(queue) = responses.get_mut(&request.path) else {
            return Ok(PluginResponse::json(404, &serde_json::json!({})));
        };
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(response.unwrap_or_else(|| PluginResponse::json(404, &serde_json::json!({}))))
    }
}

/// Liveness probe with a fixed answer
pub struct ScriptedProbe {
    healthy: bool,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            healthy,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PluginStatusProbe for ScriptedProbe {
    async fn is_healthy(&self, _plugin: &Plugin) -> bool {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.healthy
    }
}

/// Records every task update; can answer the next one with the
/// cancellation sentinel
#[derive(Default)]
pub struct RecordingTaskUpdater {
    updates: Mutex<Vec<TaskUpdate>>,
    cancel_next: AtomicBool,
}

impl RecordingTaskUpdater {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancel_next(&self) {
        self.cancel_next.store(true, Ordering::Relaxed);
    }

    pub fn updates(&self) -> Vec<TaskUpdate> {
        self.updates.lock().clone()
    }
}

#[async_trait]
impl TaskUpdater for RecordingTaskUpdater {
    async fn update_task(&self, update: TaskUpdate) -> Result<()> {
        let task_id = update.task_id.clone();
        self.updates.lock().push(update);
        if self.cancel_next.swap(false, Ordering::Relaxed) {
            return Err(Error::TaskCancelling { task_id });
        }
        Ok(())
    }
}

pub fn test_plugin(auth: AuthType) -> Plugin {
    Plugin {
        id: "GRF_v1.0.0".into(),
        ip: "127.0.0.1".into(),
        port: "45001".into(),
        username: "admin".into(),
        password: "secret".into(),
        preferred_auth: auth,
        plugin_type: "Compute".into(),
        firmware_version: "v1.0.0".into(),
    }
}

pub fn test_device(uuid: &str) -> Device {
    Device {
        uuid: uuid.into(),
        manager_address: "10.0.0.5:45001".into(),
        user_name: "admin".into(),
        password: "secret".into(),
        plugin_id: "GRF_v1.0.0".into(),
    }
}

/// Identity URL translation, no liveness probe
pub fn session_context(transport: Arc<ScriptedTransport>) -> SessionContext {
    SessionContext {
        transport,
        probe: None,
        translator: Arc::new(UrlTranslator::new(&UrlTranslationConfig::default())),
        registry: SessionRegistry::new(),
        metrics: Arc::new(CrawlMetrics::new()),
    }
}

pub async fn basic_session(transport: Arc<ScriptedTransport>) -> PluginSession {
    PluginSession::establish(
        Arc::new(test_plugin(AuthType::BasicAuth)),
        session_context(transport),
        false,
    )
    .await
    .unwrap()
}
