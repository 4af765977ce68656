//! Domain Ports - Core trait definitions for the discovery engine
//!
//! These traits define the boundaries between the discovery logic and the
//! collaborators it does not own: the southbound plugin transport, the plugin
//! liveness probe, the key/value persistence store and the task service.
//! Adapters implement these traits; tests substitute scripted doubles.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Authentication
// =============================================================================

/// Authentication scheme a plugin prefers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthType {
    /// Every call carries the stored username/password
    BasicAuth,
    /// Log in once through the plugin session endpoint, then send the token
    XAuthToken,
    /// Send a caller-supplied bearer token, no login step
    Static,
}

impl AuthType {
    /// Parse a preferred-auth string; anything unrecognised falls back to a static token
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("BasicAuth") {
            AuthType::BasicAuth
        } else if value.eq_ignore_ascii_case("XAuthToken") {
            AuthType::XAuthToken
        } else {
            AuthType::Static
        }
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthType::BasicAuth => write!(f, "BasicAuth"),
            AuthType::XAuthToken => write!(f, "XAuthToken"),
            AuthType::Static => write!(f, "Static"),
        }
    }
}

// =============================================================================
// Plugin and Device
// =============================================================================

/// A southbound management plugin instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    /// Plugin ID (e.g. GRF_v1.0.0)
    pub id: String,
    /// Host or IP; IPv6 literals are kept bracketed
    pub ip: String,
    /// Port, empty when the address carried none
    pub port: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Preferred authentication scheme
    pub preferred_auth: AuthType,
    /// Plugin type (e.g. Compute)
    pub plugin_type: String,
    /// Firmware version the plugin is expected to report
    pub firmware_version: String,
}

impl Plugin {
    /// Base URL used for every southbound call
    pub fn base_url(&self) -> String {
        if self.port.is_empty() {
            format!("https://{}", self.ip)
        } else {
            format!("https://{}:{}", self.ip, self.port)
        }
    }

    /// Full URL of a southbound path
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }
}

/// A managed device (server, chassis, manager) reachable through a plugin.
///
/// Immutable once discovery starts; its UUID namespaces every resource it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Device {
    #[serde(rename = "device_UUID")]
    pub uuid: String,
    pub manager_address: String,
    pub user_name: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(skip)]
    pub plugin_id: String,
}

impl Device {
    /// Device-info payload forwarded to the plugin with every call
    pub fn plugin_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "ManagerAddress": self.manager_address,
            "UserName": self.user_name,
            "Password": self.password,
        })
    }
}

// =============================================================================
// Plugin Contact Types
// =============================================================================

/// HTTP methods used against plugins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Patch => write!(f, "PATCH"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

/// Credentials attached to a single outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAuth {
    None,
    Basic { username: String, password: String },
    Token(String),
}

/// A single outbound call to a plugin
#[derive(Debug, Clone)]
pub struct PluginRequest {
    pub method: HttpMethod,
    /// Absolute URL including scheme, host and southbound path
    pub url: String,
    /// Southbound path only
    pub path: String,
    pub auth: RequestAuth,
    pub body: Option<serde_json::Value>,
}

/// Raw plugin response
#[derive(Debug, Clone, Default)]
pub struct PluginResponse {
    pub status: u16,
    /// Header names are stored lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl PluginResponse {
    /// Build a response from a status and JSON body
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    /// Attach a header (builder style)
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

// =============================================================================
// Task Types
// =============================================================================

/// Task lifecycle state as understood by the task service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    New,
    Starting,
    Running,
    Pending,
    Completed,
    Cancelling,
    Cancelled,
    Exception,
    Killed,
}

impl TaskState {
    /// Whether no further updates follow this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Exception | TaskState::Killed
        )
    }
}

/// Task health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    OK,
    Warning,
    Critical,
}

/// One update pushed to the task service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub task_id: String,
    pub state: TaskState,
    pub status: TaskStatus,
    pub percent_complete: u32,
    pub target_uri: String,
    pub http_method: HttpMethod,
    pub status_code: u16,
    pub payload: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Plugin Transport Port
// =============================================================================

/// Port performing the actual outbound call to a plugin
#[async_trait]
pub trait PluginTransport: Send + Sync {
    /// Send a request; connection-level failures and timeouts are errors,
    /// any HTTP status (including 4xx/5xx) is a successful response
    async fn send(&self, request: PluginRequest) -> Result<PluginResponse>;
}

/// Port answering "is this plugin alive right now?"
#[async_trait]
pub trait PluginStatusProbe: Send + Sync {
    async fn is_healthy(&self, plugin: &Plugin) -> bool;
}

// =============================================================================
// Resource Store Port
// =============================================================================

/// Port for the key/value persistence collaborator.
///
/// Last write wins per key; no transactional guarantees are assumed.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Store a document under table/key, replacing any previous value
    async fn save(&self, table: &str, key: &str, data: &[u8]) -> Result<()>;

    /// Fetch a document, `None` when absent
    async fn get(&self, table: &str, key: &str) -> Result<Option<Bytes>>;

    /// Keys of a table matching a glob-style pattern
    async fn get_matching(&self, table: &str, pattern: &str) -> Result<Vec<String>>;

    /// Delete a document; returns whether it existed
    async fn delete(&self, table: &str, key: &str) -> Result<bool>;

    /// Whether a document exists
    async fn exists(&self, table: &str, key: &str) -> Result<bool> {
        Ok(self.get(table, key).await?.is_some())
    }

    /// Create a document only if absent; returns whether it was created.
    ///
    /// The default is check-then-create; stores with an atomic primitive
    /// should override it.
    async fn create_if_absent(&self, table: &str, key: &str, data: &[u8]) -> Result<bool> {
        if self.exists(table, key).await? {
            return Ok(false);
        }
        self.save(table, key, data).await?;
        Ok(true)
    }

    /// Fetch and parse a JSON document
    async fn get_json(&self, table: &str, key: &str) -> Result<Option<serde_json::Value>> {
        match self.get(table, key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::persistence(table, key, format!("stored document is not JSON: {}", e))),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Task Service Port
// =============================================================================

/// Port for the external task tracker.
///
/// Returns `Error::TaskCancelling` when an operator has requested cancellation.
#[async_trait]
pub trait TaskUpdater: Send + Sync {
    async fn update_task(&self, update: TaskUpdate) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type PluginTransportRef = Arc<dyn PluginTransport>;
pub type PluginStatusProbeRef = Arc<dyn PluginStatusProbe>;
pub type ResourceStoreRef = Arc<dyn ResourceStore>;
pub type TaskUpdaterRef = Arc<dyn TaskUpdater>;
