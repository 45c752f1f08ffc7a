//! Data-Source Providers

pub mod coinmarketcap;
pub mod defillama;
pub mod etherscan;

pub use coinmarketcap::CoinMarketCap;
pub use defillama::DefiLlama;
pub use etherscan::Etherscan;
