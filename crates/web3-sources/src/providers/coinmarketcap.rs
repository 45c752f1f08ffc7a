//! CoinMarketCap
//!
//! Market-cap rankings, single-asset quotes and global market metrics.
//! Requires `COINMARKETCAP_API_KEY`.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, SourceError};
use crate::fetch::{JsonFetcher, Request};
use crate::format::{decimal, grouped, limit_arg, num, pct, text, truncate, usd};
use crate::source::{DataSource, Operation};

pub const API_URL: &str = "https://pro-api.coinmarketcap.com/v1";

const OPERATIONS: &[Operation] = &[
    Operation {
        id: "coinmarketcap_top",
        description: "Top cryptocurrencies by market cap with price, 24h change and volume. Input: number of assets (default 20)",
    },
    Operation {
        id: "coinmarketcap_asset",
        description: "Detailed analysis of one cryptocurrency: price, market cap, supply, price changes. Input: symbol (e.g. BTC, ETH)",
    },
    Operation {
        id: "coinmarketcap_global",
        description: "Global crypto market metrics: total market cap, volume, BTC and ETH dominance",
    },
];

const DEFAULT_LIMIT: usize = 20;

pub struct CoinMarketCap {
    fetcher: Arc<dyn JsonFetcher>,
    api_key: Option<String>,
}

impl CoinMarketCap {
    pub fn new(fetcher: Arc<dyn JsonFetcher>, api_key: Option<String>) -> Self {
        Self {
            fetcher,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// GET `endpoint`; a non-zero `status.error_code` is an API error
    async fn call(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        let key = self.api_key.as_deref().ok_or(SourceError::MissingApiKey("CoinMarketCap"))?;

        let mut request = Request::get(format!("{API_URL}{endpoint}"))
            .header("X-CMC_PRO_API_KEY", key)
            .header("Accept", "application/json");
        for (k, v) in params {
            request = request.query(*k, v);
        }
        let body = self.fetcher.fetch(&request).await?;

        let code = body["status"]["error_code"].as_i64().unwrap_or(0);
        if code != 0 {
            let message = body["status"]["error_message"].as_str().unwrap_or("Unknown error");
            return Err(SourceError::Api(format!("{message} (code {code})")));
        }
        Ok(body)
    }

    async fn top(&self, limit: usize) -> Result<String> {
        let body = self
            .call(
                "/cryptocurrency/listings/latest",
                &[("limit", limit.to_string()), ("convert", "USD".into())],
            )
            .await?;
        let listings = body["data"]
            .as_array()
            .ok_or_else(|| SourceError::UnexpectedResponse("no cryptocurrency data available".into()))?;

        let mut out = String::from("💰 **Top Cryptocurrencies by Market Cap:**\n\n");
        for asset in listings {
            let quote = &asset["quote"]["USD"];
            let _ = writeln!(out, "**{} ({})**", text(&asset["name"], "Unknown"), text(&asset["symbol"], ""));
            let _ = writeln!(out, "   - Price: ${}", grouped(decimal(&quote["price"]), 4));
            let _ = writeln!(out, "   - Market Cap: {}", usd(decimal(&quote["market_cap"])));
            let _ = writeln!(out, "   - 24h Change: {}", pct(num(&quote["percent_change_24h"]), 2));
            let _ = writeln!(out, "   - 24h Volume: {}\n", usd(decimal(&quote["volume_24h"])));
        }
        Ok(out)
    }

    async fn asset(&self, symbol: &str) -> Result<String> {
        let symbol = symbol.trim().trim_start_matches('$').to_uppercase();
        if symbol.is_empty() {
            return Err(SourceError::InvalidInput("a cryptocurrency symbol is required".into()));
        }

        let map = self.call("/cryptocurrency/map", &[("symbol", symbol.clone())]).await?;
        let id = map["data"][0]["id"]
            .as_i64()
            .ok_or_else(|| SourceError::NotFound(format!("Cryptocurrency '{symbol}'")))?;
        let id_key = id.to_string();

        let quotes = self
            .call("/cryptocurrency/quotes/latest", &[("id", id_key.clone()), ("convert", "USD".into())])
            .await?;
        // Metadata only adds the description and website.
        let info = self.call("/cryptocurrency/info", &[("id", id_key.clone())]).await.ok();

        let asset = &quotes["data"][&id_key];
        if asset.is_null() {
            return Err(SourceError::UnexpectedResponse(format!("no quote for {symbol}")));
        }
        let quote = &asset["quote"]["USD"];
        let ticker = text(&asset["symbol"], &symbol);

        let mut out = format!("📊 **{} ({ticker}) Analysis:**\n\n", text(&asset["name"], &symbol));
        let _ = writeln!(out, "**Price:** ${}", grouped(decimal(&quote["price"]), 6));
        let _ = writeln!(out, "**Market Cap:** {}", usd(decimal(&quote["market_cap"])));
        let _ = writeln!(out, "**Volume (24h):** {}", usd(decimal(&quote["volume_24h"])));
        let _ = writeln!(
            out,
            "**Circulating Supply:** {} {ticker}",
            grouped(decimal(&asset["circulating_supply"]), 0)
        );
        let max_supply = if asset["max_supply"].is_number() {
            grouped(decimal(&asset["max_supply"]), 0)
        } else {
            "Unlimited".to_string()
        };
        let _ = writeln!(out, "**Max Supply:** {max_supply}\n");

        out.push_str("**Price Changes:**\n");
        for (label, key) in [
            ("1h", "percent_change_1h"),
            ("24h", "percent_change_24h"),
            ("7d", "percent_change_7d"),
            ("30d", "percent_change_30d"),
        ] {
            let _ = writeln!(out, "   - {label}: {}", pct(num(&quote[key]), 2));
        }

        if let Some(info) = info.as_ref().map(|i| &i["data"][&id_key]) {
            if let Some(description) = info["description"].as_str().filter(|d| !d.is_empty()) {
                let _ = writeln!(out, "\n**Description:** {}", truncate(description, 300));
            }
            if let Some(website) = info["urls"]["website"][0].as_str() {
                let _ = writeln!(out, "\n**Website:** {website}");
            }
        }
        Ok(out)
    }

    async fn global(&self) -> Result<String> {
        let body = self.call("/global-metrics/quotes/latest", &[("convert", "USD".into())]).await?;
        let metrics = &body["data"];
        let quote = &metrics["quote"]["USD"];

        let mut out = String::from("🌍 **Global Crypto Market Metrics:**\n\n");
        let _ = writeln!(out, "**Total Market Cap:** {}", usd(decimal(&quote["total_market_cap"])));
        let _ = writeln!(out, "**24h Volume:** {}", usd(decimal(&quote["total_volume_24h"])));
        let _ = writeln!(out, "**Bitcoin Dominance:** {:.1}%", num(&metrics["btc_dominance"]));
        let _ = writeln!(out, "**Ethereum Dominance:** {:.1}%", num(&metrics["eth_dominance"]));
        let _ = writeln!(
            out,
            "**Active Cryptocurrencies:** {}",
            grouped(decimal(&metrics["active_cryptocurrencies"]), 0)
        );
        let _ = writeln!(out, "**Active Exchanges:** {}\n", grouped(decimal(&metrics["active_exchanges"]), 0));
        out.push_str("**Market Changes:**\n");
        let _ = writeln!(
            out,
            "   - 24h Change: {}",
            pct(num(&quote["total_market_cap_yesterday_percentage_change"]), 2)
        );
        Ok(out)
    }
}

#[async_trait]
impl DataSource for CoinMarketCap {
    fn name(&self) -> &'static str {
        "CoinMarketCap"
    }

    fn operations(&self) -> &'static [Operation] {
        OPERATIONS
    }

    async fn run(&self, operation: &str, input: &str) -> Result<String> {
        match operation {
            "coinmarketcap_top" => self.top(limit_arg(input, DEFAULT_LIMIT)).await,
            "coinmarketcap_asset" => self.asset(input).await,
            "coinmarketcap_global" => self.global().await,
            other => Err(SourceError::InvalidInput(format!("unknown CoinMarketCap operation {other}"))),
        }
    }
}
