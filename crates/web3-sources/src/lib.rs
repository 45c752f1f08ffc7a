//! # web3-sources
//!
//! Research tools backed by public Web3 data APIs.
//!
//! ```text
//! ┌──────────────┐   name/description/invoke   ┌──────────────────────┐
//! │  Researcher  │ ──────────────────────────▶ │ SourceTool (per op)  │
//! └──────────────┘                             └──────────┬───────────┘
//!                                                         │ DataSource::run
//!                        ┌────────────────┬───────────────┴──┐
//!                        ▼                ▼                  ▼
//!                   DefiLlama         Etherscan        CoinMarketCap
//!                        └────────────────┴──────────────────┘
//!                                         │ JsonFetcher
//!                                 HttpFetcher / MockFetcher
//! ```
//!
//! Every tool returns text. Failures (missing API keys, HTTP errors, unknown
//! assets) come back as `Error: ...` observations rather than Rust errors.

pub mod error;
pub mod fetch;
pub mod format;
pub mod providers;
pub mod source;

use std::sync::Arc;
use std::time::Duration;

use research_core::Tool;

pub use error::{Result, SourceError};
pub use fetch::{HttpFetcher, JsonFetcher, MockFetcher, Request};
pub use providers::{CoinMarketCap, DefiLlama, Etherscan};
pub use source::{DataSource, Operation, SourceTool, tools_for};

/// API keys and HTTP settings for the data sources
#[derive(Clone, Debug)]
pub struct SourcesConfig {
    pub etherscan_api_key: Option<String>,
    pub coinmarketcap_api_key: Option<String>,
    pub request_timeout: Duration,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            etherscan_api_key: None,
            coinmarketcap_api_key: None,
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl SourcesConfig {
    /// Read `ETHERSCAN_API_KEY` and `COINMARKETCAP_API_KEY`
    pub fn from_env() -> Self {
        let key = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            etherscan_api_key: key("ETHERSCAN_API_KEY"),
            coinmarketcap_api_key: key("COINMARKETCAP_API_KEY"),
            ..Self::default()
        }
    }
}

/// All data sources sharing one fetcher
pub fn sources(fetcher: Arc<dyn JsonFetcher>, config: &SourcesConfig) -> Vec<Arc<dyn DataSource>> {
    vec![
        Arc::new(DefiLlama::new(Arc::clone(&fetcher))),
        Arc::new(Etherscan::new(Arc::clone(&fetcher), config.etherscan_api_key.clone())),
        Arc::new(CoinMarketCap::new(fetcher, config.coinmarketcap_api_key.clone())),
    ]
}

/// Every tool from every source, in registration order
pub fn all_tools(fetcher: Arc<dyn JsonFetcher>, config: &SourcesConfig) -> Vec<Arc<dyn Tool>> {
    sources(fetcher, config).into_iter().flat_map(tools_for).collect()
}

/// Tools backed by live HTTP APIs
pub fn http_tools(config: &SourcesConfig) -> Result<Vec<Arc<dyn Tool>>> {
    let fetcher = HttpFetcher::new(config.request_timeout)?;
    Ok(all_tools(Arc::new(fetcher), config))
}
