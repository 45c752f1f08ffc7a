//! Local Ollama backend
//!
//! Used when no Gemini key is configured. Research prompts built for Gemini
//! run unchanged: a Gemini model id in the options is swapped for the local
//! model.

use async_trait::async_trait;
use ollama_rs::{
    Ollama,
    generation::chat::{ChatMessage, ChatMessageResponse, MessageRole, request::ChatMessageRequest},
    models::ModelOptions,
};
use research_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider},
};

#[derive(Clone, Debug)]
pub struct OllamaConfig {
    pub host: String,
    pub port: u16,
    /// Local model answering research prompts
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            model: "llama3.2".into(),
        }
    }
}

impl OllamaConfig {
    /// `OLLAMA_HOST`, `OLLAMA_PORT`, `OLLAMA_MODEL`, each falling back to the default
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            config.host = host;
        }
        if let Some(port) = std::env::var("OLLAMA_PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            config.model = model;
        }
        config
    }
}

pub struct OllamaProvider {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaProvider {
    pub fn from_config(config: OllamaConfig) -> Self {
        Self {
            client: Ollama::new(config.host.clone(), config.port),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::from_config(OllamaConfig::from_env())
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => MessageRole::System,
                    Role::User => MessageRole::User,
                    Role::Assistant => MessageRole::Assistant,
                };
                ChatMessage::new(role, m.content.clone())
            })
            .collect()
    }

    fn to_completion(response: ChatMessageResponse, model: &str, max_tokens: u32) -> Completion {
        let generated = response.final_data.as_ref().and_then(|d| u64::try_from(d.eval_count).ok());
        let mut completion = Completion::text(response.message.content, model);
        if generated.is_some_and(|n| hit_token_limit(n, max_tokens)) {
            completion.finish_reason = Some(FinishReason::Length);
        }
        completion
    }

    fn model_options(opts: &GenerationOptions) -> ModelOptions {
        let options = ModelOptions::default()
            .temperature(opts.temperature)
            .top_p(opts.top_p)
            .num_predict(i32::try_from(opts.max_tokens).unwrap_or(i32::MAX));
        if opts.stop_sequences.is_empty() {
            options
        } else {
            options.stop(opts.stop_sequences.clone())
        }
    }

    fn resolve_model<'a>(&'a self, requested: &'a str) -> &'a str {
        if requested.is_empty() || requested.starts_with("gemini") {
            &self.config.model
        } else {
            requested
        }
    }

    /// Installed tags look like "llama3.2:latest"
    fn is_installed(installed: &str, wanted: &str) -> bool {
        installed == wanted || installed.split(':').next() == Some(wanted)
    }
}

/// Ollama stops with done_reason "length" exactly when eval_count reaches num_predict
fn hit_token_limit(generated: u64, max_tokens: u32) -> bool {
    max_tokens > 0 && generated >= u64::from(max_tokens)
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn health_check(&self) -> Result<bool> {
        let models = match self.client.list_local_models().await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!("Ollama not reachable at {}:{}: {}", self.config.host, self.config.port, e);
                return Ok(false);
            }
        };

        let ready = models.iter().any(|m| Self::is_installed(&m.name, &self.config.model));
        if !ready {
            tracing::warn!("Ollama model '{}' is not pulled", self.config.model);
        }
        Ok(ready)
    }

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        let model = self.resolve_model(&options.model);
        tracing::debug!(model, messages = messages.len(), "Sending Ollama chat request");

        let request = ChatMessageRequest::new(model.to_string(), Self::chat_messages(messages))
            .options(Self::model_options(options));

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| AgentError::ProviderUnavailable(format!("Ollama: {e}")))?;

        Ok(Self::to_completion(response, model, options.max_tokens))
    }
}
