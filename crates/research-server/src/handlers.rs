//! HTTP Handlers

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use research_core::RunResult;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: String,
    pub provider_connected: bool,
    pub tools: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    /// Provider the tool is cited as
    pub source: String,
}

#[derive(Debug, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider = state.researcher.provider();
    let provider_connected = provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider: provider.name().to_string(),
        provider_connected,
        tools: state.researcher.available_tools().len(),
    })
}

/// Registered tools with their cited provider
pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolInfo>> {
    let researcher = &state.researcher;
    let providers = researcher.provider_table();

    Json(
        researcher
            .tools()
            .iter()
            .map(|tool| ToolInfo {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                source: providers.normalize(tool.name()),
            })
            .collect(),
    )
}

/// Run one research query
///
/// Every well-formed request gets a 200 with a `RunResult`; research
/// failures are described inside it.
pub async fn research(
    State(state): State<AppState>,
    payload: Result<Json<ResearchRequest>, JsonRejection>,
) -> Result<Json<RunResult>, (StatusCode, Json<ErrorResponse>)> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!("Rejected research request: {}", rejection.body_text());
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: rejection.body_text(),
                code: "INVALID_REQUEST".into(),
            }),
        )
    })?;

    tracing::info!(query = %request.query, "Research request");
    let result = state.researcher.research(&request.query).await;

    if let Some(error) = &result.error {
        tracing::warn!(kind = %error.kind, detail = %error.detail, "Research did not complete");
    }
    Ok(Json(result))
}
