//! JSON Fetching
//!
//! Data-source tools never touch the network directly; they go through a
//! [`JsonFetcher`] so tests can swap in canned responses.

mod mock;

pub use mock::MockFetcher;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, SourceError};

pub const USER_AGENT: &str = "Web3-Research-Copilot/2.0";

/// A GET request with query parameters and headers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Value of a query parameter, if present
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Fetcher trait (Strategy pattern)
///
/// `HttpFetcher` for real APIs, `MockFetcher` for tests and offline demos.
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Value>;
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JsonFetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Value> {
        tracing::debug!(url = %request.url, params = request.query.len(), "Fetching");

        let mut builder = self.client.get(&request.url).query(&request.query);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }
        Ok(response.json().await?)
    }
}
