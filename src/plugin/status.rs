//! Plugin Status Check
//!
//! Validates a connection-method variant, authenticates against the plugin
//! and confirms its reported firmware version before any discovery work.

use crate::config::AggregatorConfig;
use crate::domain::ports::{AuthType, Device, Plugin};
use crate::error::{Error, Result};
use crate::plugin::session::{PluginSession, SessionContext};
use crate::plugin::transport::STATUS_PATH;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

// =============================================================================
// Connection Method Variant
// =============================================================================

/// Parsed `PluginType:PreferredAuth:PluginID` descriptor (e.g. `Compute:BasicAuth:GRF_v1.0.0`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMethodVariant {
    pub plugin_type: String,
    pub preferred_auth: AuthType,
    pub plugin_id: String,
    /// Part of the plugin ID after the first `_`
    pub firmware_version: String,
}

impl ConnectionMethodVariant {
    pub fn parse(variant: &str) -> Result<Self> {
        let parts: Vec<&str> = variant.split(':').collect();
        let [plugin_type, auth, plugin_id] = parts.as_slice() else {
            return Err(Error::InvalidConnectionMethod(variant.to_string()));
        };
        let firmware_version = plugin_id
            .split_once('_')
            .map(|(_, version)| version)
            .filter(|version| !version.is_empty())
            .ok_or_else(|| Error::InvalidConnectionMethod(variant.to_string()))?;
        if plugin_type.is_empty() {
            return Err(Error::InvalidConnectionMethod(variant.to_string()));
        }

        let parsed = Self {
            plugin_type: plugin_type.to_string(),
            preferred_auth: AuthType::parse(auth),
            plugin_id: plugin_id.to_string(),
            firmware_version: firmware_version.to_string(),
        };
        debug!(?parsed, "Parsed connection method variant");
        Ok(parsed)
    }
}

// =============================================================================
// Manager Address
// =============================================================================

/// Split a manager address into host and port.
///
/// IPv4/hostnames use `host:port`; a bare IPv6 literal is bracketed and has no
/// port; a bracketed IPv6 literal may carry a trailing `:port`.
pub fn split_manager_address(address: &str) -> (String, String) {
    if address.matches(':').count() > 2 {
        if !address.contains('[') {
            return (format!("[{}]", address), String::new());
        }
        return match address.rfind(':') {
            Some(index) if address[..index].ends_with(']') => {
                (address[..index].to_string(), address[index + 1..].to_string())
            }
            _ => (address.to_string(), String::new()),
        };
    }
    match address.split_once(':') {
        Some((host, port)) => (host.to_string(), port.to_string()),
        None => (address.to_string(), String::new()),
    }
}

// =============================================================================
// Status Response
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusResponse {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub event_message_bus: Option<EventMessageBus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMessageBus {
    #[serde(rename = "EmbQueue", default)]
    pub emb_queue: Vec<EmbQueue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbQueue {
    #[serde(rename = "QueueName")]
    pub queue_name: String,
}

impl StatusResponse {
    pub fn queue_names(&self) -> Vec<String> {
        self.event_message_bus
            .as_ref()
            .map(|bus| bus.emb_queue.iter().map(|q| q.queue_name.clone()).collect())
            .unwrap_or_default()
    }
}

/// Outcome of a successful status check
#[derive(Debug, Clone)]
pub struct StatusCheck {
    pub session: PluginSession,
    /// Event-message-bus queue names the plugin publishes on
    pub event_queues: Vec<String>,
}

// =============================================================================
// Status Check
// =============================================================================

/// Authenticate against the plugin behind `device` and verify its firmware.
///
/// Returns the established session for the discovery that follows.
pub async fn check_status(
    variant: &ConnectionMethodVariant,
    device: &Device,
    config: &AggregatorConfig,
    context: SessionContext,
) -> Result<StatusCheck> {
    if !config.is_plugin_type_supported(&variant.plugin_type) {
        return Err(Error::UnsupportedPluginType(variant.plugin_type.clone()));
    }

    let (ip, port) = split_manager_address(&device.manager_address);
    let plugin = Arc::new(Plugin {
        id: variant.plugin_id.clone(),
        ip,
        port,
        username: device.user_name.clone(),
        password: device.password.clone(),
        preferred_auth: variant.preferred_auth,
        plugin_type: variant.plugin_type.clone(),
        firmware_version: variant.firmware_version.clone(),
    });

    let session = PluginSession::establish(plugin, context, true).await?;
    let reply = session.get(STATUS_PATH).await?;
    let status: StatusResponse = serde_json::from_str(&reply.body)
        .map_err(|e| Error::malformed(STATUS_PATH, e))?;

    if status.version != variant.firmware_version {
        let err = Error::UnsupportedFirmwareVersion {
            plugin_id: variant.plugin_id.clone(),
            expected: variant.firmware_version.clone(),
            found: status.version,
        };
        error!(error = %err, "Plugin firmware check failed");
        return Err(err);
    }

    let event_queues = status.queue_names();
    info!(plugin = %variant.plugin_id, queues = ?event_queues, "Plugin status verified");
    Ok(StatusCheck {
        session,
        event_queues,
    })
}
