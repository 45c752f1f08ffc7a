//! Model Backends
//!
//! The research loop talks to a language model only through [`LlmProvider`].
//! Backends (Gemini, Ollama, the scripted test double) live outside this
//! crate and are injected at construction.
//!
//! ```rust,ignore
//! let provider: Arc<dyn LlmProvider> = Arc::new(GeminiProvider::from_env()?);
//! let reply = provider.complete(&messages, &GenerationOptions::default()).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;

/// Sampling settings sent with every model call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Backend model id ("gemini-1.5-flash", "llama3.2", ...)
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

const fn default_temperature() -> f32 {
    0.3
}

const fn default_max_tokens() -> u32 {
    2048
}

const fn default_top_p() -> f32 {
    0.9
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            // Cut the reply before the model writes its own observation.
            stop_sequences: vec!["\nObservation:".into()],
        }
    }
}

/// A tool request the backend reported natively instead of as text
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredCall {
    pub tool: String,
    #[serde(default)]
    pub argument: String,
}

/// One model reply
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,

    /// Model that actually answered
    pub model: String,

    pub usage: Option<TokenUsage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<StructuredCall>,

    pub finish_reason: Option<FinishReason>,
}

impl Completion {
    /// Text reply that finished normally
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            usage: None,
            tool_call: None,
            finish_reason: Some(FinishReason::Stop),
        }
    }

    /// True when generation stopped on the token limit
    pub fn is_truncated(&self) -> bool {
        self.finish_reason == Some(FinishReason::Length)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

/// Strategy trait for model backends
///
/// Errors returned from [`complete`](LlmProvider::complete) end the research
/// run, so implementations should retry transient failures themselves if
/// they want them hidden.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short backend label ("gemini", "ollama")
    fn name(&self) -> &str;

    /// Whether the backend is reachable and configured
    async fn health_check(&self) -> Result<bool>;

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion>;
}
