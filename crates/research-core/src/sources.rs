//! Provider Normalization
//!
//! Maps tool ids to the human-readable data-source names cited next to an
//! answer. Rules are case-insensitive substring matches checked in order;
//! ids that match nothing are cited as-is.

use std::collections::BTreeSet;

/// Ordered substring → provider-name rules
#[derive(Clone, Debug)]
pub struct ProviderTable {
    rules: Vec<(String, String)>,
}

impl Default for ProviderTable {
    fn default() -> Self {
        Self::new()
            .rule("defillama", "DeFiLlama")
            .rule("etherscan", "Etherscan")
            .rule("coinmarketcap", "CoinMarketCap")
            .rule("cmc", "CoinMarketCap")
            .rule("dune", "Dune Analytics")
            .rule("nansen", "Nansen")
            .rule("artemis", "Artemis")
    }
}

impl ProviderTable {
    /// Empty table: every id passes through unchanged
    pub const fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule; earlier rules win
    #[must_use]
    pub fn rule(mut self, pattern: impl Into<String>, provider: impl Into<String>) -> Self {
        self.rules.push((pattern.into().to_lowercase(), provider.into()));
        self
    }

    /// Provider name for a tool id
    pub fn normalize(&self, tool_id: &str) -> String {
        let lowered = tool_id.to_lowercase();
        self.rules
            .iter()
            .find(|(pattern, _)| lowered.contains(pattern.as_str()))
            .map_or_else(|| tool_id.to_string(), |(_, provider)| provider.clone())
    }

    /// Distinct provider names for a sequence of tool ids, sorted
    pub fn sources<'a, I>(&self, tool_ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        tool_ids
            .into_iter()
            .map(|id| self.normalize(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
