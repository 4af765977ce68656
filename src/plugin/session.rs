//! Plugin Session
//!
//! Establishes an authenticated channel to one plugin and performs every
//! outbound call of a discovery run through it.
//!
//! Auth negotiation:
//! - `BasicAuth`: every call carries the stored username/password
//! - `XAuthToken`: one `POST /ODIM/v1/Sessions` login, then the token is sent
//! - static: a caller-supplied token from the [`SessionRegistry`] is sent
//!
//! A connection-level failure is retried exactly once when status polling is
//! enabled and the liveness probe reports the plugin healthy. Auth rejections
//! and error statuses from a reachable plugin are never retried.

use crate::domain::ports::{
    AuthType, HttpMethod, Plugin, PluginRequest, PluginResponse, PluginStatusProbeRef,
    PluginTransportRef, RequestAuth,
};
use crate::error::{Error, Result};
use crate::metrics::CrawlMetrics;
use crate::plugin::translate::UrlTranslator;
use crate::plugin::transport::AUTH_TOKEN_HEADER;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Plugin session login endpoint
pub const SESSIONS_PATH: &str = "/ODIM/v1/Sessions";

// =============================================================================
// Session Registry
// =============================================================================

/// Per-process cache of plugin session tokens, keyed by plugin ID
#[derive(Debug, Default)]
pub struct SessionRegistry {
    tokens: RwLock<HashMap<String, String>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn store(&self, plugin_id: &str, token: &str) {
        self.tokens
            .write()
            .insert(plugin_id.to_string(), token.to_string());
    }

    pub fn token(&self, plugin_id: &str) -> Option<String> {
        self.tokens.read().get(plugin_id).cloned()
    }

    pub fn forget(&self, plugin_id: &str) -> Option<String> {
        self.tokens.write().remove(plugin_id)
    }
}

// =============================================================================
// Plugin Reply
// =============================================================================

/// A successful (200/201/202) plugin reply
#[derive(Debug, Clone)]
pub struct PluginReply {
    pub status: u16,
    /// Body rewritten into the northbound namespace
    pub body: String,
    /// `Location` header of a 202 reply
    pub location: Option<String>,
    /// `X-Auth-Token` header, set by session logins
    pub auth_token: Option<String>,
}

impl PluginReply {
    /// Parse the body as JSON, attributing failures to `path`
    pub fn json(&self, path: &str) -> Result<serde_json::Value> {
        serde_json::from_str(&self.body).map_err(|e| Error::malformed(path, e))
    }
}

// =============================================================================
// Plugin Session
// =============================================================================

/// Collaborators shared by every session of one process
#[derive(Clone)]
pub struct SessionContext {
    pub transport: PluginTransportRef,
    pub probe: Option<PluginStatusProbeRef>,
    pub translator: Arc<UrlTranslator>,
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<CrawlMetrics>,
}

/// An authenticated channel to one plugin
#[derive(Clone)]
pub struct PluginSession {
    plugin: Arc<Plugin>,
    auth: RequestAuth,
    context: SessionContext,
    status_poll: bool,
    device_info: Option<serde_json::Value>,
}

impl std::fmt::Debug for PluginSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSession")
            .field("plugin", &self.plugin.id)
            .field("auth", &self.plugin.preferred_auth)
            .field("status_poll", &self.status_poll)
            .finish()
    }
}

impl PluginSession {
    /// Negotiate authentication with a plugin.
    ///
    /// A failed `XAuthToken` login is returned as-is; it is fatal for the crawl.
    pub async fn establish(
        plugin: Arc<Plugin>,
        context: SessionContext,
        status_poll: bool,
    ) -> Result<Self> {
        let mut session = Self {
            auth: RequestAuth::None,
            plugin,
            context,
            status_poll,
            device_info: None,
        };

        session.auth = match session.plugin.preferred_auth {
            AuthType::BasicAuth => RequestAuth::Basic {
                username: session.plugin.username.clone(),
                password: session.plugin.password.clone(),
            },
            AuthType::XAuthToken => RequestAuth::Token(session.login().await?),
            AuthType::Static => match session.context.registry.token(&session.plugin.id) {
                Some(token) => RequestAuth::Token(token),
                None => {
                    warn!(plugin = %session.plugin.id, "No cached token for plugin, calling without credentials");
                    RequestAuth::None
                }
            },
        };

        debug!(plugin = %session.plugin.id, auth = %session.plugin.preferred_auth, "Plugin session established");
        Ok(session)
    }

    /// Attach the device-info payload forwarded with every call
    pub fn with_device_info(mut self, device_info: serde_json::Value) -> Self {
        self.device_info = Some(device_info);
        self
    }

    pub fn plugin(&self) -> &Plugin {
        &self.plugin
    }

    pub fn metrics(&self) -> &CrawlMetrics {
        &self.context.metrics
    }

    /// Drop the cached token and perform a fresh login
    pub async fn refresh(&mut self) -> Result<()> {
        if self.plugin.preferred_auth == AuthType::XAuthToken {
            self.context.registry.forget(&self.plugin.id);
            self.auth = RequestAuth::Token(self.login().await?);
        }
        Ok(())
    }

    /// Log in once; contact failures are not retried
    async fn login(&self) -> Result<String> {
        let credentials = serde_json::json!({
            "Username": self.plugin.username,
            "Password": self.plugin.password,
        });
        let request = self.request(HttpMethod::Post, SESSIONS_PATH, Some(credentials), &RequestAuth::None);
        let response = self.context.transport.send(request).await.map_err(|e| {
            self.context.metrics.record_fetch_failure();
            e
        })?;
        self.context.metrics.record_fetch();
        let reply = self.interpret(SESSIONS_PATH, response)?;
        let token = reply.auth_token.ok_or_else(|| {
            Error::malformed(SESSIONS_PATH, "session reply carries no X-Auth-Token header")
        })?;
        self.context.registry.store(&self.plugin.id, &token);
        info!(plugin = %self.plugin.id, "Created plugin session");
        Ok(token)
    }

    /// GET a northbound path
    pub async fn get(&self, path: &str) -> Result<PluginReply> {
        self.contact(HttpMethod::Get, path, self.device_info.clone()).await
    }

    /// Issue a call with the session's credentials
    pub async fn contact(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<PluginReply> {
        self.call(method, path, body, &self.auth).await
    }

    async fn call(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<serde_json::Value>,
        auth: &RequestAuth,
    ) -> Result<PluginReply> {
        let request = self.request(method, path, body, auth);
        let response = match self.context.transport.send(request.clone()).await {
            Ok(response) => response,
            Err(e) if e.is_contact_failure() => self.retry_after_probe(request, e).await?,
            Err(e) => return Err(e),
        };
        self.context.metrics.record_fetch();
        self.interpret(path, response)
    }

    fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<serde_json::Value>,
        auth: &RequestAuth,
    ) -> PluginRequest {
        let southbound = self.context.translator.to_southbound(path);
        PluginRequest {
            method,
            url: self.plugin.url_for(&southbound),
            path: southbound,
            auth: auth.clone(),
            body,
        }
    }

    async fn retry_after_probe(&self, request: PluginRequest, first: Error) -> Result<PluginResponse> {
        let diagnostic_url = self.plugin.url_for(&self.context.translator.to_northbound(&request.path));
        let unreachable = |reason: String| Error::UnreachablePlugin {
            url: diagnostic_url.clone(),
            reason,
        };

        let probe = match (&self.context.probe, self.status_poll) {
            (Some(probe), true) => probe,
            _ => {
                self.context.metrics.record_fetch_failure();
                return Err(unreachable(first.to_string()));
            }
        };

        if !probe.is_healthy(&self.plugin).await {
            self.context.metrics.record_fetch_failure();
            return Err(unreachable(first.to_string()));
        }

        self.context.metrics.record_probe_retry();
        info!(plugin = %self.plugin.id, url = %request.url, "Plugin is healthy, retrying call once");
        self.context.transport.send(request).await.map_err(|e| {
            self.context.metrics.record_fetch_failure();
            unreachable(e.to_string())
        })
    }

    fn interpret(&self, path: &str, response: PluginResponse) -> Result<PluginReply> {
        match response.status {
            200 | 201 | 202 => {
                let body = String::from_utf8_lossy(&response.body);
                let location = if response.status == 202 {
                    response.header("Location").map(str::to_string)
                } else {
                    None
                };
                Ok(PluginReply {
                    status: response.status,
                    body: self.context.translator.to_northbound(&body),
                    location,
                    auth_token: response.header(AUTH_TOKEN_HEADER).map(str::to_string),
                })
            }
            401 => {
                self.context.metrics.record_fetch_failure();
                Err(Error::Unauthorized {
                    url: self.plugin.url_for(path),
                })
            }
            status => {
                self.context.metrics.record_fetch_failure();
                Err(Error::UpstreamStatus {
                    status,
                    url: self.plugin.url_for(path),
                    body: String::from_utf8_lossy(&response.body).into_owned(),
                })
            }
        }
    }
}
