//! Error Types
//!
//! None of these reach a caller of `Researcher::research`; they are folded
//! into the run result. Construction and configuration return them directly.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    /// Backend rejected or failed the request
    #[error("Provider error: {0}")]
    Provider(String),

    /// Backend could not be reached
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Duplicate tool id: {0}")]
    DuplicateTool(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Whether the same call may succeed if repeated later
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_) | Self::RateLimited(_))
    }

    /// Stable tag recorded in the run result
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::RateLimited(_) => "rate_limited",
            Self::Auth(_) => "auth",
            Self::DuplicateTool(_) => "duplicate_tool",
            Self::Config(_) => "config",
            Self::Json(_) => "json",
        }
    }
}
