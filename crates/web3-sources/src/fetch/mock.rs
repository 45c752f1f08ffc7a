//! Mock Fetcher
//!
//! Canned JSON keyed by URL and query parameters. Records every request.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::{JsonFetcher, Request};
use crate::error::{Result, SourceError};

struct Route {
    url: String,
    params: Vec<(String, String)>,
    body: Value,
}

impl Route {
    fn matches(&self, request: &Request) -> bool {
        self.url == request.url && self.params.iter().all(|(k, v)| request.param(k) == Some(v.as_str()))
    }
}

/// Fetcher returning canned responses
#[derive(Default)]
pub struct MockFetcher {
    routes: Vec<Route>,
    requests: Mutex<Vec<Request>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to any request for `url`
    #[must_use]
    pub fn with(self, url: impl Into<String>, body: Value) -> Self {
        self.with_params(url, &[], body)
    }

    /// Respond to requests for `url` carrying all of `params`
    #[must_use]
    pub fn with_params(mut self, url: impl Into<String>, params: &[(&str, &str)], body: Value) -> Self {
        self.routes.push(Route {
            url: url.into(),
            params: params.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
            body,
        });
        self
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl JsonFetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Value> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        // Most specific route wins
        self.routes
            .iter()
            .filter(|route| route.matches(request))
            .max_by_key(|route| route.params.len())
            .map(|route| route.body.clone())
            .ok_or_else(|| SourceError::Http {
                status: 404,
                url: request.url.clone(),
            })
    }
}
