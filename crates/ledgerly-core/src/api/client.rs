//! reqwest-backed transport for the accounting backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::Value;
use tracing::debug;

use super::cancel::LatestWins;
use super::transport::{ApiReply, ApiRequest, Method, Transport};
use super::ApiError;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP transport for the accounting API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
/// Clones also share the latest-wins slot, so a request issued through any
/// clone supersedes the one in flight.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    inflight: LatestWins,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            inflight: LatestWins::new(),
        })
    }

    /// A client sharing the connection pool but with its own cancellation slot.
    pub fn detached(&self) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            inflight: LatestWins::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiReply, ApiError> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Delete => self.client.delete(&url),
        };
        builder = builder.header(header::ACCEPT, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        debug!(method = request.method.as_str(), url = %url, status, "Request completed");

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(ApiReply::new(status, body))
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiReply, ApiError> {
        self.inflight.run(self.execute(request)).await
    }
}
