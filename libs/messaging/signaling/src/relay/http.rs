//! HTTP polling relay
//!
//! Talks to a relay exposing:
//! - `GET  {base}/poll/{endpoint}` returning `{"messages": [...]}`
//! - `POST {base}/send/{from}/{target}/{operation}` with a JSON body
//!
//! Path segments are percent-encoded, so endpoint names and operations may
//! contain any characters except a bare `.` or `..`. The POST response body
//! is never interpreted.

use super::RelayTransport;
use crate::config::RelayConfig;
use crate::message::{validate_name, InboundMessage, OutboundMessage, PollResponse};
use crate::{Result, SignalError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

/// Relay reached over HTTP(S) with a pooled client
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRelay {
    /// Relay at `url` with default timeouts
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::from_config(&RelayConfig::with_url(url))
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        config.validate()?;
        let base_url = config.base_url()?;

        let client = reqwest::Client::builder()
            .pool_idle_timeout(config.pool_idle_timeout())
            .timeout(config.request_timeout())
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                SignalError::invalid_config(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base URL.
    ///
    /// Blank and dot segments are refused rather than silently collapsed.
    pub fn url_for(&self, segments: &[&str]) -> Result<Url> {
        for segment in segments {
            validate_name("path segment", segment)?;
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SignalError::invalid_config(format!(
                    "Relay URL '{}' cannot be used as a base",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl RelayTransport for HttpRelay {
    async fn poll(&self, endpoint: &str) -> Result<Vec<InboundMessage>> {
        let url = self.url_for(&["poll", endpoint])?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SignalError::transport(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignalError::relay_status(status.as_u16(), &url));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SignalError::transport(&url, e))?;

        let batch = PollResponse::from_json(&body)?.messages;
        debug!(endpoint, count = batch.len(), "Poll completed");
        Ok(batch)
    }

    async fn post(&self, message: &OutboundMessage) -> Result<()> {
        let url = self.url_for(&[
            "send",
            message.from(),
            message.target(),
            message.operation(),
        ])?;

        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(message.payload().to_owned())
            .send()
            .await
            .map_err(|e| SignalError::transport(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignalError::relay_status(status.as_u16(), &url));
        }

        Ok(())
    }

    fn describe(&self) -> String {
        format!("http relay at {}", self.base_url)
    }
}
