//! JSON over HTTP, the only way providers talk to their backends

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Fetches JSON documents from a block-data backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JsonTransport: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value>;

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value>;
}

/// URL without its query string, which may carry an API key
fn redacted(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

/// `reqwest` transport with a per-call timeout
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JsonTransport for HttpTransport {
    async fn get_json(&self, url: &str) -> Result<Value> {
        let path = redacted(url);
        debug!("GET {}", path);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| e.without_url())
            .with_context(|| format!("GET {} failed", path))?;
        response
            .json()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("GET {} returned invalid JSON", path))
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let path = redacted(url);
        debug!("POST {}", path);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| e.without_url())
            .with_context(|| format!("POST {} failed", path))?;
        response
            .json()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("POST {} returned invalid JSON", path))
    }
}
