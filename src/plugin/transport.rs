//! Plugin Transport
//!
//! HTTPS transport to southbound plugins built on `reqwest`, and the default
//! liveness probe that polls the plugin status endpoint.

use crate::config::PluginContactConfig;
use crate::domain::ports::{
    HttpMethod, Plugin, PluginRequest, PluginResponse, PluginStatusProbe, PluginTransport,
    PluginTransportRef, RequestAuth,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// Plugin status endpoint
pub const STATUS_PATH: &str = "/ODIM/v1/Status";

/// Header carrying session tokens
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

// =============================================================================
// HTTP Transport
// =============================================================================

/// `reqwest`-backed plugin transport; one client shared by every call
pub struct HttpPluginTransport {
    client: reqwest::Client,
}

impl HttpPluginTransport {
    /// Build a transport from the plugin contact settings
    pub fn new(config: &PluginContactConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs);

        if let Some(path) = &config.root_ca_path {
            let pem = std::fs::read(path).map_err(|e| {
                Error::Configuration(format!("Failed to read CA {}: {}", path.display(), e))
            })?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl PluginTransport for HttpPluginTransport {
    async fn send(&self, request: PluginRequest) -> Result<PluginResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        builder = match &request.auth {
            RequestAuth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            RequestAuth::Token(token) => builder.header(AUTH_TOKEN_HEADER, token),
            RequestAuth::None => builder,
        };
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, url = %request.url, "Contacting plugin");

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::PluginTimeout {
                    url: request.url.clone(),
                }
            } else {
                Error::UnreachablePlugin {
                    url: request.url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| {
            Error::Internal(format!(
                "error while trying to read plugin response body: {}",
                e
            ))
        })?;

        Ok(PluginResponse {
            status,
            headers,
            body,
        })
    }
}

// =============================================================================
// Status Endpoint Probe
// =============================================================================

/// Liveness probe polling `GET /ODIM/v1/Status` with bounded exponential retry
pub struct StatusEndpointProbe {
    transport: PluginTransportRef,
    max_attempts: u32,
    initial_interval: Duration,
}

impl StatusEndpointProbe {
    pub fn new(transport: PluginTransportRef, config: &PluginContactConfig) -> Self {
        Self {
            transport,
            max_attempts: config.status_retry_attempts.max(1),
            initial_interval: config.status_retry_interval(),
        }
    }

    async fn probe_once(&self, plugin: &Plugin) -> Result<()> {
        let request = PluginRequest {
            method: HttpMethod::Get,
            url: plugin.url_for(STATUS_PATH),
            path: STATUS_PATH.to_string(),
            auth: RequestAuth::Basic {
                username: plugin.username.clone(),
                password: plugin.password.clone(),
            },
            body: None,
        };
        let response = self.transport.send(request).await?;
        if response.status == 200 {
            Ok(())
        } else {
            Err(Error::UpstreamStatus {
                status: response.status,
                url: plugin.url_for(STATUS_PATH),
                body: String::from_utf8_lossy(&response.body).into_owned(),
            })
        }
    }
}

#[async_trait]
impl PluginStatusProbe for StatusEndpointProbe {
    async fn is_healthy(&self, plugin: &Plugin) -> bool {
        let attempts = AtomicU32::new(0);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_elapsed_time(None)
            .build();

        let attempts_ref = &attempts;
        let max_attempts = self.max_attempts;
        let operation = move || async move {
            let attempt = attempts_ref.fetch_add(1, Ordering::Relaxed) + 1;
            match self.probe_once(plugin).await {
                Ok(()) => Ok(()),
                Err(e) if attempt >= max_attempts => Err(backoff::Error::permanent(e)),
                Err(e) => {
                    debug!(plugin = %plugin.id, attempt, error = %e, "Status probe failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        };

        match backoff::future::retry(policy, operation).await {
            Ok(()) => {
                info!(plugin = %plugin.id, "Plugin status is healthy");
                true
            }
            Err(e) => {
                warn!(plugin = %plugin.id, error = %e, "Plugin status check failed");
                false
            }
        }
    }
}
