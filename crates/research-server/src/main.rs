//! Web3 Research Co-Pilot HTTP Server
//!
//! Axum-based server exposing the research loop over REST, with DeFiLlama,
//! Etherscan and CoinMarketCap tools registered at startup.

mod app;
mod handlers;
mod state;

use std::sync::Arc;

use research_core::{LlmProvider, ResearchConfig, Researcher};
use research_runtime::{GeminiProvider, OllamaProvider};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use web3_sources::SourcesConfig;

use crate::state::AppState;

/// Chosen backend and the model to ask it for
struct Backend {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

/// `LLM_PROVIDER` picks the backend; without it, Gemini is used when a key is set
fn select_backend() -> anyhow::Result<Backend> {
    let requested = std::env::var("LLM_PROVIDER").ok().map(|p| p.trim().to_lowercase());
    let has_gemini_key = std::env::var("GEMINI_API_KEY").is_ok_and(|k| !k.trim().is_empty());

    match requested.as_deref() {
        Some("gemini") => gemini(),
        Some("ollama") => Ok(ollama()),
        Some(other) if !other.is_empty() => anyhow::bail!("unknown LLM_PROVIDER '{other}' (expected gemini or ollama)"),
        _ if has_gemini_key => gemini(),
        _ => {
            tracing::warn!("GEMINI_API_KEY not set, falling back to Ollama");
            Ok(ollama())
        }
    }
}

fn gemini() -> anyhow::Result<Backend> {
    let provider = GeminiProvider::from_env()?;
    Ok(Backend {
        model: provider.model().to_string(),
        provider: Arc::new(provider),
    })
}

fn ollama() -> Backend {
    let provider = OllamaProvider::from_env();
    Backend {
        model: provider.model().to_string(),
        provider: Arc::new(provider),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize LLM provider
    let backend = select_backend()?;
    let name = backend.provider.name().to_string();
    match backend.provider.health_check().await {
        Ok(true) => tracing::info!("✓ {} ready (model {})", name, backend.model),
        Ok(false) | Err(_) => tracing::warn!("⚠ {} not ready - research requests will fail", name),
    }

    // Data-source tools
    let sources = SourcesConfig::from_env();
    if sources.etherscan_api_key.is_none() {
        tracing::warn!("⚠ ETHERSCAN_API_KEY not set - Etherscan tools will report it");
    }
    if sources.coinmarketcap_api_key.is_none() {
        tracing::warn!("⚠ COINMARKETCAP_API_KEY not set - CoinMarketCap tools will report it");
    }
    let tools = web3_sources::http_tools(&sources)?;

    // Research loop
    let mut config = ResearchConfig::from_env()?;
    config.generation.model = backend.model.clone();
    tracing::info!(
        max_iterations = config.max_iterations,
        wall_clock_secs = config.max_wall_clock.as_secs(),
        on_exhausted = ?config.on_exhausted,
        "Research configuration"
    );

    let researcher = Researcher::builder()
        .provider(backend.provider)
        .tools(tools)
        .config(config)
        .build()?;

    let names = researcher.available_tools();
    tracing::info!("Registered {} tools:", names.len());
    for name in &names {
        tracing::info!("  • {}", name);
    }

    let app = app::router(AppState::new(researcher));

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 research server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health        - Health check");
    tracing::info!("  GET  /api/tools     - List research tools");
    tracing::info!("  POST /api/research  - Run a research query");

    axum::serve(listener, app).await?;

    Ok(())
}
