//! Error Types for Data Sources

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SourceError>;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("{0} API key not configured")]
    MissingApiKey(&'static str),

    #[error("API request failed: HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("API error: {0}")]
    Api(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("API request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
