//! HTTP plugin transport.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use cmsync_common::{Error, Result};

use crate::config::DispatchConfig;
use crate::transport::{PluginRequest, PluginTransport};

/// Version segment of the plugin REST API.
const API_VERSION: &str = "v1";

/// Talks to plugin services over HTTP.
///
/// URLs have the form `{service}/{dmi_base_path}/v1/{path}`; path segments
/// are percent-encoded, so handle ids may contain any character.
pub struct HttpPluginTransport {
    http: Client,
    config: DispatchConfig,
}

impl HttpPluginTransport {
    /// Create a transport with the given dispatch configuration.
    ///
    /// # Errors
    /// - Returns error if the HTTP client cannot be built
    pub fn new(config: DispatchConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("cmsync/0.1")
            .build()
            .map_err(|e| Error::PluginUnavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Build the full URL of a request.
    pub fn url(&self, request: &PluginRequest) -> Result<Url> {
        let mut url = Url::parse(request.service.trim_end_matches('/')).map_err(|e| {
            Error::InvalidInput(format!("Invalid plugin service '{}': {}", request.service, e))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                Error::InvalidInput(format!("Plugin service cannot be a base: {}", request.service))
            })?;
            segments.pop_if_empty();
            segments.extend(
                self.config
                    .dmi_base_path
                    .split('/')
                    .filter(|segment| !segment.is_empty()),
            );
            segments.push(API_VERSION);
            segments.extend(request.path.iter());
        }
        Ok(url)
    }

    async fn handle_response(&self, response: reqwest::Response, target: &str) -> Result<Value> {
        let status = response.status();

        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| Error::PluginUnavailable(format!("Failed to read response: {}", e)))?;
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&body)
                .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
        } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            Err(Error::PluginUnavailable(format!(
                "{} timed out upstream ({})",
                target, status
            )))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::PluginRejected(format!(
                "{} answered {} - {}",
                target, status, body
            )))
        }
    }
}

#[async_trait]
impl PluginTransport for HttpPluginTransport {
    async fn post(&self, request: PluginRequest) -> Result<Value> {
        let url = self.url(&request)?;
        let target = request.target();
        let timeout = self.config.timeout_for(request.kind);
        debug!("POST {} ({} timeout {:?})", url, request.kind, timeout);

        let response = self
            .http
            .post(url)
            .query(&request.query)
            .timeout(timeout)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::PluginUnavailable(format!("{} did not answer within {:?}", target, timeout))
                } else {
                    Error::PluginUnavailable(format!("Failed to reach {}: {}", target, e))
                }
            })?;

        self.handle_response(response, &target).await
    }
}
