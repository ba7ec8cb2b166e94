//! HTTP poster for one sink
//!
//! Sends each queue payload as a single JSON `POST`. Any 2xx status is a delivery; anything
//! else, including a timeout, is a failure the worker retries.

use crate::error::{DeliveryError, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct HttpPoster {
    client: Client,
    url: String,
}

impl HttpPoster {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DeliveryError::config(format!(
                "sink URL must start with http:// or https://, got '{}'",
                url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("siphon/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Post `body`, returning the response status on success
    pub async fn post(&self, body: &[u8]) -> Result<u16> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            let text = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), response = %text, "Sink accepted payload");
        }
        Ok(status.as_u16())
    }
}
