//! # research-runtime
//!
//! LLM backends for the research loop.
//!
//! ## Providers
//!
//! - **Gemini** (default): Google Generative Language API over HTTPS
//! - **Ollama**: Local LLM inference via Ollama
//!
//! ## Usage
//!
//! ```rust,ignore
//! use research_runtime::GeminiProvider;
//!
//! let provider = GeminiProvider::from_env()?;
//! let researcher = Researcher::builder()
//!     .provider(Arc::new(provider))
//!     .tools(web3_sources::all_tools())
//!     .build()?;
//! ```

#[cfg(feature = "gemini")]
pub mod gemini;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "gemini")]
pub use gemini::{GeminiConfig, GeminiProvider};

#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};

// Re-export core types for convenience
pub use research_core::{AgentError, LlmProvider, Message, Researcher, Result, Role, Tool, ToolRegistry};
