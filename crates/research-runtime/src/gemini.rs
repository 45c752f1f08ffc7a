//! Gemini LLM Provider
//!
//! Talks to the Google Generative Language REST API (`generateContent`).
//! The system message becomes `systemInstruction`; the rest map to
//! `user`/`model` turns.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use research_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, StructuredCall, TokenUsage},
};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini provider configuration
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: String,

    /// Default model when the request leaves it empty
    pub model: String,

    pub base_url: String,

    /// HTTP request timeout
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gemini-1.5-flash".into(),
            base_url: DEFAULT_BASE_URL.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Read `GEMINI_API_KEY` (required) and `GEMINI_MODEL`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AgentError::Config("GEMINI_API_KEY is not set".into()))?;

        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            if !model.trim().is_empty() {
                config.model = model;
            }
        }
        Ok(config)
    }
}

/// Gemini LLM provider
pub struct GeminiProvider {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiProvider {
    pub fn from_config(config: GeminiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_config(GeminiConfig::from_env()?)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn resolve_model<'a>(&'a self, requested: &'a str) -> &'a str {
        if requested.is_empty() { &self.config.model } else { requested }
    }

    fn build_request(messages: &[Message], options: &GenerationOptions) -> GenerateRequest {
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let contents = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Content {
                role: Some(if m.role == Role::Assistant { "model" } else { "user" }.into()),
                parts: vec![Part::text(m.content.clone())],
            })
            .collect();

        GenerateRequest {
            system_instruction: (!system.is_empty()).then(|| Content {
                role: None,
                parts: vec![Part::text(system)],
            }),
            contents,
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
                top_p: options.top_p,
                stop_sequences: options.stop_sequences.clone(),
            },
        }
    }

    fn convert_response(response: GenerateResponse, model: &str) -> Result<Completion> {
        let candidate = response.candidates.into_iter().next().ok_or_else(|| {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".into());
            AgentError::Provider(format!("Gemini returned no answer: {reason}"))
        })?;

        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        let tool_call = parts.iter().find_map(|p| p.function_call.as_ref()).map(FunctionCall::to_structured);
        let content = parts.into_iter().map(|p| p.text).collect::<String>();

        let finish_reason = candidate.finish_reason.as_deref().map(|reason| match reason {
            "MAX_TOKENS" => FinishReason::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => FinishReason::ContentFilter,
            _ if tool_call.is_some() => FinishReason::ToolUse,
            _ => FinishReason::Stop,
        });

        let mut completion = Completion::text(content, model);
        completion.finish_reason = finish_reason;
        completion.tool_call = tool_call;
        completion.usage = response.usage_metadata.map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });
        Ok(completion)
    }

    fn status_error(status: StatusCode, body: &str) -> AgentError {
        let (detail, rpc_status) = serde_json::from_str::<ErrorEnvelope>(body).map_or_else(
            |_| (body.chars().take(200).collect::<String>(), None),
            |e| (e.error.message, e.error.status),
        );

        // A bad key comes back as 400 INVALID_ARGUMENT, not 401.
        let bad_key = rpc_status.as_deref() == Some("INVALID_ARGUMENT") && detail.contains("API key");
        if bad_key || matches!(rpc_status.as_deref(), Some("UNAUTHENTICATED" | "PERMISSION_DENIED")) {
            return AgentError::Auth(detail);
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::Auth(detail),
            StatusCode::TOO_MANY_REQUESTS => AgentError::RateLimited(detail),
            s if s.is_server_error() => AgentError::ProviderUnavailable(format!("{s}: {detail}")),
            s => AgentError::Provider(format!("{s}: {detail}")),
        }
    }

    fn transport_error(e: &reqwest::Error) -> AgentError {
        if e.is_timeout() {
            AgentError::ProviderUnavailable(format!("Gemini request timed out: {e}"))
        } else {
            AgentError::ProviderUnavailable(e.to_string())
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.config.api_key.is_empty())
    }

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        let model = self.resolve_model(&options.model);
        let url = format!("{}/models/{model}:generateContent", self.config.base_url);
        let body = Self::build_request(messages, options);

        tracing::debug!(model, messages = messages.len(), "Sending Gemini request");

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| Self::transport_error(&e))?;
        if !status.is_success() {
            return Err(Self::status_error(status, &text));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)?;
        Self::convert_response(parsed, model)
    }
}

// Wire types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text,
            function_call: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

impl FunctionCall {
    /// Tools take one string; a lone string arg is passed as-is, anything else as JSON
    fn to_structured(&self) -> StructuredCall {
        let argument = match &self.args {
            serde_json::Value::Null => String::new(),
            serde_json::Value::Object(map) if map.is_empty() => String::new(),
            serde_json::Value::Object(map) if map.len() == 1 => match map.values().next() {
                Some(serde_json::Value::String(s)) => s.clone(),
                _ => self.args.to_string(),
            },
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        StructuredCall {
            tool: self.name.clone(),
            argument,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    /// gRPC-style status name, e.g. "INVALID_ARGUMENT"
    #[serde(default)]
    status: Option<String>,
}
