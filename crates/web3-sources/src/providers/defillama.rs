//! DeFiLlama
//!
//! Protocol TVL rankings, chain ecosystems, yield pools and stablecoins.
//! Public API, no key required.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::{Result, SourceError};
use crate::fetch::{JsonFetcher, Request};
use crate::format::{decimal, float_arg, is_positive, limit_arg, num, optional_arg, pct, share, text, truncate, usd};
use crate::source::{DataSource, Operation};

pub const API_URL: &str = "https://api.llama.fi";
pub const YIELDS_URL: &str = "https://yields.llama.fi";
pub const STABLECOINS_URL: &str = "https://stablecoins.llama.fi";

const OPERATIONS: &[Operation] = &[
    Operation {
        id: "defillama_protocols",
        description: "DeFi protocol rankings by TVL with 1d/7d/1m trends and momentum. Input: number of protocols (default 20)",
    },
    Operation {
        id: "defillama_protocol",
        description: "Deep dive on one DeFi protocol: TVL, rank, performance, chain distribution. Input: protocol name",
    },
    Operation {
        id: "defillama_chains",
        description: "Blockchain ecosystem TVL. Input: chain name for a single chain, or 'all' to compare chains",
    },
    Operation {
        id: "defillama_yields",
        description: "Yield farming opportunities with risk scoring. Input: minimum APY (default 5.0)",
    },
    Operation {
        id: "defillama_stablecoins",
        description: "Stablecoin market analysis with market share and chain distribution",
    },
];

const DEFAULT_PROTOCOL_LIMIT: usize = 20;
const DEFAULT_MIN_APY: f64 = 5.0;
const YIELD_LIMIT: usize = 15;
const CHAIN_LIMIT: usize = 15;
const STABLECOIN_LIMIT: usize = 10;
const MIN_POOL_TVL: f64 = 100_000.0;
const STABLE_SYMBOLS: &[&str] = &["USDC", "USDT", "DAI", "FRAX"];

pub struct DefiLlama {
    fetcher: Arc<dyn JsonFetcher>,
}

impl DefiLlama {
    pub fn new(fetcher: Arc<dyn JsonFetcher>) -> Self {
        Self { fetcher }
    }

    async fn list(&self, url: String) -> Result<Vec<Value>> {
        match self.fetcher.fetch(&Request::get(url.clone())).await? {
            Value::Array(items) => Ok(items),
            _ => Err(SourceError::UnexpectedResponse(format!("expected a list from {url}"))),
        }
    }

    async fn protocols(&self, limit: usize) -> Result<String> {
        let mut protocols: Vec<Value> = self
            .list(format!("{API_URL}/protocols"))
            .await?
            .into_iter()
            .filter(|p| is_positive(&p["tvl"]))
            .collect();
        protocols.sort_by(|a, b| num(&b["tvl"]).total_cmp(&num(&a["tvl"])));

        let mut out = String::from("🏆 **Protocol Rankings by TVL:**\n\n");
        for (i, p) in protocols.iter().take(limit).enumerate() {
            let (d1, d7, m1) = (num(&p["change_1d"]), num(&p["change_7d"]), num(&p["change_1m"]));
            let chains = p["chains"].as_array().map(Vec::as_slice).unwrap_or_default();

            let _ = writeln!(out, "{}. **{}** {}", i + 1, text(&p["name"], "Unknown"), momentum_marker(d1, d7, m1));
            let _ = writeln!(out, "   - TVL: {}", usd(decimal(&p["tvl"])));
            let _ = writeln!(out, "   - Changes: 1d: {} | 7d: {} | 1m: {}", pct(d1, 1), pct(d7, 1), pct(m1, 1));
            let _ = writeln!(out, "   - Category: {} | Chains: {}", text(&p["category"], "Unknown"), chains.len());
            if !chains.is_empty() && chains.len() <= 3 {
                let names: Vec<&str> = chains.iter().filter_map(Value::as_str).collect();
                let _ = writeln!(out, "   - Networks: {}", names.join(", "));
            }
            out.push('\n');
        }
        Ok(out)
    }

    async fn protocol(&self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SourceError::InvalidInput("a protocol name is required".into()));
        }
        let needle = name.to_lowercase();
        let protocols = self.list(format!("{API_URL}/protocols")).await?;
        let (rank, protocol) = protocols
            .iter()
            .enumerate()
            .find(|(_, p)| text(&p["name"], "").to_lowercase().contains(&needle))
            .ok_or_else(|| SourceError::NotFound(format!("Protocol '{name}'")))?;

        // Detail is optional; the listing entry is enough for the summary.
        let detail = match protocol["slug"].as_str() {
            Some(slug) => self.fetcher.fetch(&Request::get(format!("{API_URL}/protocol/{slug}"))).await.ok(),
            None => None,
        };

        let mut out = format!("🔍 **{} Deep Analysis:**\n\n", text(&protocol["name"], name));
        out.push_str("**📊 Current Metrics:**\n");
        let _ = writeln!(out, "   - TVL: {}", usd(decimal(&protocol["tvl"])));
        let _ = writeln!(out, "   - Rank: #{}", rank + 1);
        let _ = writeln!(out, "   - Category: {}", text(&protocol["category"], "Unknown"));

        out.push_str("\n**📈 Performance:**\n");
        for (period, key) in [("1 Day", "change_1d"), ("7 Days", "change_7d"), ("1 Month", "change_1m")] {
            let change = num(&protocol[key]);
            let marker = if change > 0.0 {
                "🟢"
            } else if change < -2.0 {
                "🔴"
            } else {
                "🟡"
            };
            let _ = writeln!(out, "   - {period}: {} {marker}", pct(change, 1));
        }

        let chains: Vec<&str> = protocol["chains"]
            .as_array()
            .map(|c| c.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if !chains.is_empty() {
            let _ = writeln!(out, "\n**⛓️ Multi-Chain Presence ({} chains):**", chains.len());
            for chain in chains.iter().take(5) {
                let _ = writeln!(out, "   - {chain}");
            }
            if chains.len() > 5 {
                let _ = writeln!(out, "   - ... and {} more", chains.len() - 5);
            }
        }

        if let Some(distribution) = detail.as_ref().map(chain_distribution).filter(|d| !d.is_empty()) {
            let total: Decimal = distribution.iter().map(|(_, tvl)| *tvl).sum();
            out.push_str("\n**🔗 Chain Distribution:**\n");
            for (chain, tvl) in distribution.iter().take(5) {
                let _ = writeln!(out, "   - {chain}: {} ({:.1}%)", usd(*tvl), share(*tvl, total));
            }
        }

        if let Some(description) = protocol["description"].as_str().filter(|d| !d.is_empty()) {
            let _ = writeln!(out, "\n**📝 Description:**\n{}", truncate(description, 200));
        }
        if let Some(url) = protocol["url"].as_str().filter(|u| !u.is_empty()) {
            let _ = writeln!(out, "\n**🌐 Website:** {url}");
        }
        Ok(out)
    }

    async fn chains(&self, chain: Option<&str>) -> Result<String> {
        let mut chains = self.list(format!("{API_URL}/chains")).await?;

        let Some(wanted) = chain else {
            chains.sort_by(|a, b| num(&b["tvl"]).total_cmp(&num(&a["tvl"])));
            let mut out = String::from("⛓️ **Multi-Chain Ecosystem Rankings:**\n\n");
            for (i, c) in chains.iter().take(CHAIN_LIMIT).enumerate() {
                let tvl = num(&c["tvl"]);
                let d7 = num(&c["change_7d"]);
                let strength = if tvl > 1e10 {
                    "🔥"
                } else if tvl > 1e9 {
                    "💪"
                } else if tvl > 1e8 {
                    "🌱"
                } else {
                    "📈"
                };
                let trend = if d7 > 5.0 {
                    "📈"
                } else if d7 > -5.0 {
                    "📊"
                } else {
                    "📉"
                };
                let _ = writeln!(out, "{}. **{}** {strength} {trend}", i + 1, text(&c["name"], "Unknown"));
                let _ = writeln!(out, "   - TVL: {}", usd(decimal(&c["tvl"])));
                let _ = writeln!(out, "   - Momentum: 1d: {} | 7d: {}\n", pct(num(&c["change_1d"]), 1), pct(d7, 1));
            }
            return Ok(out);
        };

        let needle = wanted.to_lowercase();
        let chain = chains
            .iter()
            .find(|c| text(&c["name"], "").to_lowercase().contains(&needle))
            .ok_or_else(|| SourceError::NotFound(format!("Chain '{wanted}'")))?;
        let chain_name = text(&chain["name"], wanted);

        let mut out = format!("⛓️ **{chain_name} Ecosystem Analysis:**\n\n");
        out.push_str("**💰 Financial Metrics:**\n");
        let _ = writeln!(out, "   - Total TVL: {}", usd(decimal(&chain["tvl"])));
        let _ = writeln!(out, "   - 24h Change: {}", pct(num(&chain["change_1d"]), 1));
        let _ = writeln!(out, "   - 7d Change: {}", pct(num(&chain["change_7d"]), 1));
        let _ = writeln!(out, "   - 1m Change: {}", pct(num(&chain["change_1m"]), 1));

        // Protocol breakdown is a bonus; skip it if the listing fails.
        if let Ok(protocols) = self.list(format!("{API_URL}/protocols")).await {
            let lowered = chain_name.to_lowercase();
            let on_chain: Vec<&Value> = protocols
                .iter()
                .filter(|p| {
                    p["chains"]
                        .as_array()
                        .is_some_and(|cs| cs.iter().filter_map(Value::as_str).any(|c| c.to_lowercase() == lowered))
                })
                .collect();

            out.push_str("\n**🏗️ Ecosystem Health:**\n");
            let _ = writeln!(out, "   - Active Protocols: {}", on_chain.len());
            if let Some(top) = on_chain.iter().max_by(|a, b| num(&a["tvl"]).total_cmp(&num(&b["tvl"]))) {
                let _ = writeln!(
                    out,
                    "   - Largest Protocol: {} ({})",
                    text(&top["name"], "Unknown"),
                    usd(decimal(&top["tvl"]))
                );

                let mut categories: HashMap<&str, usize> = HashMap::new();
                for p in &on_chain {
                    *categories.entry(text(&p["category"], "Unknown")).or_default() += 1;
                }
                let mut categories: Vec<_> = categories.into_iter().collect();
                categories.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
                out.push_str("   - Top Categories:\n");
                for (category, count) in categories.into_iter().take(3) {
                    let _ = writeln!(out, "     • {category}: {count} protocols");
                }
            }
        }
        Ok(out)
    }

    async fn yields(&self, min_apy: f64) -> Result<String> {
        let body = self.fetcher.fetch(&Request::get(format!("{YIELDS_URL}/pools"))).await?;
        let pools = body["data"].as_array().map(Vec::as_slice).unwrap_or_default();

        let mut scored: Vec<(&Value, f64)> = pools
            .iter()
            .filter_map(|pool| {
                let apy = pool["apy"].as_f64()?;
                let tvl = pool["tvlUsd"].as_f64()?;
                (apy >= min_apy && tvl > MIN_POOL_TVL).then(|| (pool, risk_score(apy, tvl, text(&pool["symbol"], ""))))
            })
            .collect();
        // Risk-adjusted return
        scored.sort_by(|(a, ra), (b, rb)| (num(&b["apy"]) * rb.max(0.1)).total_cmp(&(num(&a["apy"]) * ra.max(0.1))));

        let mut out = format!("💰 **Yield Opportunities (>{min_apy}% APY):**\n\n");
        if scored.is_empty() {
            out.push_str("No pools match the minimum APY with enough liquidity.\n");
        }
        for (i, (pool, risk)) in scored.iter().take(YIELD_LIMIT).enumerate() {
            let (marker, label) = if *risk >= 2.0 {
                ("🟢", "Low Risk")
            } else if *risk >= 1.0 {
                ("🟡", "Med Risk")
            } else {
                ("🔴", "High Risk")
            };
            let _ = writeln!(
                out,
                "{}. **{}** ({}) {marker}",
                i + 1,
                text(&pool["project"], "Unknown"),
                text(&pool["chain"], "Unknown")
            );
            let _ = writeln!(out, "   - Pool: {}", text(&pool["symbol"], "Unknown"));
            let _ = writeln!(out, "   - APY: {:.1}% | TVL: {}", num(&pool["apy"]), usd(decimal(&pool["tvlUsd"])));
            let _ = writeln!(out, "   - Risk Level: {label}");
            if is_positive(&pool["apyBase"]) && is_positive(&pool["apyReward"]) {
                let _ = writeln!(
                    out,
                    "   - Base APY: {:.1}% | Reward APY: {:.1}%",
                    num(&pool["apyBase"]),
                    num(&pool["apyReward"])
                );
            }
            out.push('\n');
        }
        Ok(out)
    }

    async fn stablecoins(&self) -> Result<String> {
        let body = self
            .fetcher
            .fetch(&Request::get(format!("{STABLECOINS_URL}/stablecoins")).query("includePrices", "true"))
            .await?;
        let assets: Vec<&Value> = body["peggedAssets"]
            .as_array()
            .map(|a| a.iter().take(STABLECOIN_LIMIT).collect())
            .unwrap_or_default();

        let caps: Vec<Decimal> = assets.iter().map(|s| decimal(&s["circulating"]["peggedUSD"])).collect();
        let total: Decimal = caps.iter().copied().sum();

        let mut out = String::from("💵 **Stablecoin Market Analysis:**\n\n");
        out.push_str("**📊 Market Overview:**\n");
        let _ = writeln!(out, "   - Total Market Cap: {}", usd(total));
        let _ = writeln!(out, "   - Active Stablecoins: {}\n", assets.len());

        out.push_str("**🏆 Top Stablecoins:**\n");
        for (i, (stable, cap)) in assets.iter().zip(&caps).enumerate() {
            let mut chains: Vec<(&str, Decimal)> = stable["chainCirculating"]
                .as_object()
                .map(|m| m.iter().map(|(chain, v)| (chain.as_str(), chain_amount(v))).collect())
                .unwrap_or_default();
            chains.sort_by(|a, b| b.1.cmp(&a.1));

            let _ = writeln!(
                out,
                "{}. **{} ({})**",
                i + 1,
                text(&stable["name"], "Unknown"),
                text(&stable["symbol"], "Unknown")
            );
            let _ = writeln!(out, "   - Market Cap: {} ({:.1}%)", usd(*cap), share(*cap, total));
            let _ = writeln!(out, "   - Chains: {}", chains.len());
            if !chains.is_empty() {
                let top: Vec<String> = chains
                    .iter()
                    .take(3)
                    .map(|(c, amount)| format!("{c}: {}", usd(*amount)))
                    .collect();
                let _ = writeln!(out, "   - Top Chains: {}", top.join(", "));
            }
            out.push('\n');
        }
        Ok(out)
    }
}

#[async_trait]
impl DataSource for DefiLlama {
    fn name(&self) -> &'static str {
        "DeFiLlama"
    }

    fn operations(&self) -> &'static [Operation] {
        OPERATIONS
    }

    async fn run(&self, operation: &str, input: &str) -> Result<String> {
        match operation {
            "defillama_protocols" => self.protocols(limit_arg(input, DEFAULT_PROTOCOL_LIMIT)).await,
            "defillama_protocol" => self.protocol(input).await,
            "defillama_chains" => self.chains(optional_arg(input)).await,
            "defillama_yields" => self.yields(float_arg(input, DEFAULT_MIN_APY)).await,
            "defillama_stablecoins" => self.stablecoins().await,
            other => Err(SourceError::InvalidInput(format!("unknown DeFiLlama operation {other}"))),
        }
    }
}

/// Weighted 1d/7d/1m change
fn momentum_marker(d1: f64, d7: f64, m1: f64) -> &'static str {
    let momentum = d1.mul_add(0.5, d7.mul_add(0.3, m1 * 0.2));
    if momentum > 5.0 {
        "🚀"
    } else if momentum > 0.0 {
        "📈"
    } else if momentum > -5.0 {
        "📉"
    } else {
        "💥"
    }
}

/// Deeper liquidity, moderate APY and stablecoin pairs all lower the risk
fn risk_score(apy: f64, tvl: f64, symbol: &str) -> f64 {
    let mut score = 0.0;
    if tvl > 10_000_000.0 {
        score += 1.0;
    } else if tvl > 1_000_000.0 {
        score += 0.5;
    }
    if apy < 20.0 {
        score += 1.0;
    } else if apy < 50.0 {
        score += 0.5;
    }
    let symbol = symbol.to_uppercase();
    if STABLE_SYMBOLS.iter().any(|s| symbol.contains(s)) {
        score += 1.0;
    }
    score
}

/// Current TVL per chain from a protocol detail payload, largest first
fn chain_distribution(detail: &Value) -> Vec<(String, Decimal)> {
    let mut out: Vec<(String, Decimal)> = detail["currentChainTvls"]
        .as_object()
        .map(|m| {
            m.iter()
                // Skip synthetic buckets like "borrowed" or "Ethereum-staking"
                .filter(|(chain, _)| !chain.contains('-') && chain.chars().next().is_some_and(char::is_uppercase))
                .map(|(chain, tvl)| (chain.clone(), decimal(tvl)))
                .collect()
        })
        .unwrap_or_default();
    out.sort_by(|a, b| b.1.cmp(&a.1));
    out
}

/// `chainCirculating` entries are either plain numbers or `{current: {peggedUSD}}`
fn chain_amount(value: &Value) -> Decimal {
    if value.is_number() {
        decimal(value)
    } else {
        decimal(&value["current"]["peggedUSD"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MockFetcher;
    use serde_json::json;

    fn protocols_fixture() -> Value {
        json!([
            {"name": "Lido", "slug": "lido", "tvl": 30_000_000_000.0_f64, "change_1d": 1.0, "change_7d": 2.0, "change_1m": 3.0,
             "category": "Liquid Staking", "chains": ["Ethereum", "Solana"], "description": "Liquid staking", "url": "https://lido.fi"},
            {"name": "Aave V3", "slug": "aave-v3", "tvl": 20_000_000_000.0_f64, "change_1d": -1.0, "change_7d": -8.0, "change_1m": -20.0,
             "category": "Lending", "chains": ["Ethereum", "Arbitrum", "Polygon", "Base"]},
            {"name": "Broken", "tvl": null},
            {"name": "Uniswap V3", "slug": "uniswap-v3", "tvl": 5_000_000_000.0_f64, "category": "Dexes", "chains": ["Ethereum", "Arbitrum"]}
        ])
    }

    fn llama(fetcher: MockFetcher) -> DefiLlama {
        DefiLlama::new(Arc::new(fetcher))
    }

    #[tokio::test]
    async fn test_protocol_rankings_skip_invalid_tvl() {
        let source = llama(MockFetcher::new().with(format!("{API_URL}/protocols"), protocols_fixture()));
        let out = source.run("defillama_protocols", "2").await.unwrap();

        assert!(out.contains("1. **Lido** 📈"));
        assert!(out.contains("   - TVL: $30,000,000,000"));
        assert!(out.contains("2. **Aave V3** 💥"));
        assert!(out.contains("Networks: Ethereum, Solana"));
        assert!(!out.contains("Uniswap"));
        assert!(!out.contains("Broken"));
    }

    #[tokio::test]
    async fn test_protocol_deep_dive_with_chain_distribution() {
        let fetcher = MockFetcher::new()
            .with(format!("{API_URL}/protocols"), protocols_fixture())
            .with(
                format!("{API_URL}/protocol/aave-v3"),
                json!({"currentChainTvls": {"Ethereum": 15_000_000_000.0_f64, "Arbitrum": 5_000_000_000.0_f64, "borrowed": 1.0, "Ethereum-borrowed": 2.0}}),
            );
        let out = llama(fetcher).run("defillama_protocol", "aave").await.unwrap();

        assert!(out.starts_with("🔍 **Aave V3 Deep Analysis:**"));
        assert!(out.contains("Rank: #2"));
        assert!(out.contains("Ethereum: $15,000,000,000 (75.0%)"));
        assert!(!out.contains("... and"));
        assert!(!out.contains("borrowed"));
    }

    #[tokio::test]
    async fn test_unknown_protocol() {
        let source = llama(MockFetcher::new().with(format!("{API_URL}/protocols"), protocols_fixture()));
        let err = source.run("defillama_protocol", "nonexistent").await.unwrap_err();
        assert_eq!(err.to_string(), "Protocol 'nonexistent' not found");
    }

    #[tokio::test]
    async fn test_chains_all_and_single() {
        let fetcher = MockFetcher::new()
            .with(
                format!("{API_URL}/chains"),
                json!([
                    {"name": "Arbitrum", "tvl": 3_000_000_000.0_f64, "change_1d": 0.5, "change_7d": 6.0},
                    {"name": "Ethereum", "tvl": 60_000_000_000.0_f64, "change_1d": 0.1, "change_7d": -1.0}
                ]),
            )
            .with(format!("{API_URL}/protocols"), protocols_fixture());
        let source = llama(fetcher);

        let all = source.run("defillama_chains", "all").await.unwrap();
        assert!(all.find("Ethereum").unwrap() < all.find("Arbitrum").unwrap());
        assert!(all.contains("1. **Ethereum** 🔥 📊"));

        let one = source.run("defillama_chains", "arbitrum").await.unwrap();
        assert!(one.starts_with("⛓️ **Arbitrum Ecosystem Analysis:**"));
        assert!(one.contains("Active Protocols: 2"));
        assert!(one.contains("Largest Protocol: Aave V3 ($20,000,000,000)"));
    }

    #[tokio::test]
    async fn test_yields_filter_and_rank() {
        let fetcher = MockFetcher::new().with(
            format!("{YIELDS_URL}/pools"),
            json!({"data": [
                {"project": "curve", "chain": "Ethereum", "symbol": "USDC-USDT", "apy": 8.0, "tvlUsd": 50_000_000.0_f64, "apyBase": 3.0, "apyReward": 5.0},
                {"project": "degen", "chain": "Base", "symbol": "PEPE-WETH", "apy": 400.0, "tvlUsd": 200_000.0_f64},
                {"project": "tiny", "chain": "Base", "symbol": "USDC", "apy": 30.0, "tvlUsd": 5_000.0_f64},
                {"project": "low", "chain": "Ethereum", "symbol": "ETH", "apy": 2.0, "tvlUsd": 50_000_000.0_f64},
                {"project": "null", "apy": null, "tvlUsd": 1_000_000.0_f64}
            ]}),
        );
        let out = llama(fetcher).run("defillama_yields", "5").await.unwrap();

        assert!(out.contains("1. **degen** (Base) 🔴"));
        assert!(out.contains("2. **curve** (Ethereum) 🟢"));
        assert!(out.contains("Base APY: 3.0% | Reward APY: 5.0%"));
        assert!(!out.contains("tiny"));
        assert!(!out.contains("**low**"));
    }

    #[tokio::test]
    async fn test_stablecoin_shares() {
        let fetcher = MockFetcher::new().with(
            format!("{STABLECOINS_URL}/stablecoins"),
            json!({"peggedAssets": [
                {"name": "Tether", "symbol": "USDT", "circulating": {"peggedUSD": 75.0},
                 "chainCirculating": {"Tron": {"current": {"peggedUSD": 50.0}}, "Ethereum": {"current": {"peggedUSD": 25.0}}}},
                {"name": "USD Coin", "symbol": "USDC", "circulating": {"peggedUSD": 25.0}}
            ]}),
        );
        let out = llama(fetcher).run("defillama_stablecoins", "").await.unwrap();

        assert!(out.contains("Total Market Cap: $100"));
        assert!(out.contains("Market Cap: $75 (75.0%)"));
        assert!(out.contains("Top Chains: Tron: $50, Ethereum: $25"));
        assert!(out.contains("Chains: 0"));
    }

    #[test]
    fn test_risk_score() {
        assert!((risk_score(8.0, 50_000_000.0, "usdc-dai") - 3.0).abs() < f64::EPSILON);
        assert!(risk_score(400.0, 200_000.0, "PEPE").abs() < f64::EPSILON);
    }
}
