//! Etherscan
//!
//! Ethereum network stats, wallet lookups and the gas oracle.
//! Requires `ETHERSCAN_API_KEY`.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;

use crate::error::{Result, SourceError};
use crate::fetch::{JsonFetcher, Request};
use crate::format::{decimal, grouped, short_address, usd};
use crate::source::{DataSource, Operation};

pub const API_URL: &str = "https://api.etherscan.io/api";

const OPERATIONS: &[Operation] = &[
    Operation {
        id: "etherscan_eth_stats",
        description: "Ethereum network statistics: ETH price, total supply and market cap",
    },
    Operation {
        id: "etherscan_wallet",
        description: "Analyze an Ethereum wallet for balance, transaction count and activity. Input: wallet address (0x...)",
    },
    Operation {
        id: "etherscan_gas_prices",
        description: "Current Ethereum gas prices (safe, standard, fast) and estimated transfer costs",
    },
];

const WEI_PER_ETH: Decimal = dec!(1_000_000_000_000_000_000);
const GWEI_PER_ETH: Decimal = dec!(1_000_000_000);
const TRANSFER_GAS: Decimal = dec!(21_000);

pub struct Etherscan {
    fetcher: Arc<dyn JsonFetcher>,
    api_key: Option<String>,
}

impl Etherscan {
    pub fn new(fetcher: Arc<dyn JsonFetcher>, api_key: Option<String>) -> Self {
        Self {
            fetcher,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Call `module`/`action`; `status: "0"` responses are API errors
    async fn call(&self, module: &str, action: &str, params: &[(&str, &str)]) -> Result<Value> {
        let key = self.api_key.as_deref().ok_or(SourceError::MissingApiKey("Etherscan"))?;

        let mut request = Request::get(API_URL).query("module", module).query("action", action);
        for (k, v) in params {
            request = request.query(*k, *v);
        }
        let body = self.fetcher.fetch(&request.query("apikey", key)).await?;

        if body["status"].as_str() == Some("0") {
            let message = body["message"].as_str().unwrap_or("Unknown error");
            let detail = body["result"].as_str().filter(|r| !r.is_empty());
            return Err(SourceError::Api(match detail {
                Some(detail) => format!("{message}: {detail}"),
                None => message.to_string(),
            }));
        }
        if let Some(error) = body["error"]["message"].as_str() {
            return Err(SourceError::Api(error.to_string()));
        }
        Ok(body)
    }

    async fn eth_stats(&self) -> Result<String> {
        let price = self.call("stats", "ethprice", &[]).await?;
        let supply = self.call("stats", "ethsupply", &[]).await?;

        let eth_usd = decimal(&price["result"]["ethusd"]);
        let supply_eth = decimal(&supply["result"]) / WEI_PER_ETH;

        let mut out = String::from("⚡ **Ethereum Network Statistics:**\n\n");
        let _ = writeln!(out, "**ETH Price:** ${}", grouped(eth_usd, 2));
        let _ = writeln!(out, "**Total Supply:** {} ETH", grouped(supply_eth, 0));
        let _ = writeln!(out, "**Market Cap:** {}", usd(eth_usd * supply_eth));
        Ok(out)
    }

    async fn wallet(&self, address: &str) -> Result<String> {
        let address = address.trim();
        if !is_address(address) {
            return Err(SourceError::InvalidInput(format!(
                "'{address}' is not an Ethereum address (expected 0x followed by 40 hex characters)"
            )));
        }

        let balance = self
            .call("account", "balance", &[("address", address), ("tag", "latest")])
            .await?;
        // Count is a nice-to-have; a failure here should not hide the balance.
        let tx_count = self
            .call("proxy", "eth_getTransactionCount", &[("address", address), ("tag", "latest")])
            .await
            .ok()
            .and_then(|body| body["result"].as_str().and_then(parse_hex))
            .unwrap_or(0);

        let balance_eth = decimal(&balance["result"]) / WEI_PER_ETH;

        let mut out = format!("👛 **Wallet Analysis: {}**\n\n", short_address(address));
        let _ = writeln!(out, "**ETH Balance:** {} ETH", grouped(balance_eth, 4));
        let _ = writeln!(out, "**Transaction Count:** {}", grouped(Decimal::from(tx_count), 0));
        let _ = writeln!(out, "**Activity Level:** {}", activity_level(tx_count));
        Ok(out)
    }

    async fn gas_prices(&self) -> Result<String> {
        let body = self.call("gastracker", "gasoracle", &[]).await?;
        let oracle = &body["result"];
        let safe = decimal(&oracle["SafeGasPrice"]);
        let standard = decimal(&oracle["ProposeGasPrice"]);
        let fast = decimal(&oracle["FastGasPrice"]);

        let mut out = String::from("⛽ **Ethereum Gas Tracker:**\n\n");
        let _ = writeln!(out, "**Safe Gas Price:** {} Gwei", safe.normalize());
        let _ = writeln!(out, "**Standard Gas Price:** {} Gwei", standard.normalize());
        let _ = writeln!(out, "**Fast Gas Price:** {} Gwei", fast.normalize());
        out.push_str("\n**Estimated TX Costs (simple transfer):**\n");
        let _ = writeln!(out, "   - Safe: ~{} ETH", grouped(transfer_cost(safe), 6));
        let _ = writeln!(out, "   - Fast: ~{} ETH", grouped(transfer_cost(fast), 6));
        Ok(out)
    }
}

#[async_trait]
impl DataSource for Etherscan {
    fn name(&self) -> &'static str {
        "Etherscan"
    }

    fn operations(&self) -> &'static [Operation] {
        OPERATIONS
    }

    async fn run(&self, operation: &str, input: &str) -> Result<String> {
        match operation {
            "etherscan_eth_stats" => self.eth_stats().await,
            "etherscan_wallet" => self.wallet(input).await,
            "etherscan_gas_prices" => self.gas_prices().await,
            other => Err(SourceError::InvalidInput(format!("unknown Etherscan operation {other}"))),
        }
    }
}

fn is_address(s: &str) -> bool {
    s.len() == 42 && s.starts_with("0x") && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_hex(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

/// ETH for a plain 21k-gas transfer at `gwei`
fn transfer_cost(gwei: Decimal) -> Decimal {
    gwei * TRANSFER_GAS / GWEI_PER_ETH
}

const fn activity_level(tx_count: u64) -> &'static str {
    match tx_count {
        10_001.. => "🔥 Very Active",
        1_001..=10_000 => "🟢 Active",
        101..=1_000 => "🟡 Moderate",
        11..=100 => "🔵 Light",
        _ => "⚪ New/Inactive",
    }
}
