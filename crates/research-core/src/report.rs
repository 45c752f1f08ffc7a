//! Run Result Extraction
//!
//! Turns a terminated [`ResearchRun`] into the caller-facing [`RunResult`].
//! Extraction is a pure function of the run, so it can be repeated.

use serde::{Deserialize, Serialize};

use crate::run::{ResearchRun, RunStatus, Step, Termination};
use crate::sources::ProviderTable;

pub const NO_TOOLS_ANSWER: &str = "No data sources connected. Please add API tools first.";
pub const EMPTY_QUERY_ANSWER: &str = "Please ask a question about crypto, DeFi or on-chain data.";

/// What to surface when the budget runs out before a final answer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Return the latest tool observation with a notice; fails when nothing was gathered
    #[default]
    BestEffort,
    /// Return only the exhausted notice
    Fail,
}

impl std::str::FromStr for ExhaustionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "best_effort" | "best-effort" | "force" => Ok(Self::BestEffort),
            "fail" => Ok(Self::Fail),
            other => Err(format!("unknown exhaustion policy: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoToolsConfigured,
    EmptyQuery,
    BudgetExhausted,
    ModelCallFailure,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoToolsConfigured => "no_tools_configured",
            Self::EmptyQuery => "empty_query",
            Self::BudgetExhausted => "budget_exhausted",
            Self::ModelCallFailure => "model_call_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub detail: String,
}

/// Result of one research query
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Never empty
    pub answer: String,
    /// Distinct provider names, sorted
    pub sources: Vec<String>,
    /// Executed tool calls in invocation order
    pub steps: Vec<Step>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

/// Build the caller-facing result for a terminated run
pub fn extract(run: &ResearchRun, providers: &ProviderTable, policy: ExhaustionPolicy) -> RunResult {
    let sources = providers.sources(run.trace().iter().map(|s| s.invocation.tool_id.as_str()));
    let steps = run.trace().to_vec();

    if run.status() == RunStatus::Completed {
        if let Some(answer) = run.final_answer() {
            return RunResult {
                answer: answer.to_string(),
                sources,
                steps,
                success: true,
                error: None,
            };
        }
    }

    let (answer, error) = failure_answer(run, policy);
    RunResult {
        answer,
        sources,
        steps,
        success: false,
        error: Some(error),
    }
}

fn failure_answer(run: &ResearchRun, policy: ExhaustionPolicy) -> (String, RunError) {
    let error = |kind, detail: String| RunError { kind, detail };

    match run.termination() {
        Some(Termination::NoTools) => (
            NO_TOOLS_ANSWER.to_string(),
            error(ErrorKind::NoToolsConfigured, "tool registry is empty".into()),
        ),
        Some(Termination::EmptyQuery) => (
            EMPTY_QUERY_ANSWER.to_string(),
            error(ErrorKind::EmptyQuery, "query is empty".into()),
        ),
        Some(Termination::ModelFailure { kind, message }) => (
            format!("Error processing query: {message}"),
            error(ErrorKind::ModelCallFailure, format!("{kind}: {message}")),
        ),
        Some(Termination::IterationLimit { max_iterations }) => {
            let notice = format!(
                "I couldn't reach a final answer within {max_iterations} research steps. Please try a more specific question."
            );
            exhausted(run, policy, notice, format!("iteration limit of {max_iterations} reached"))
        }
        Some(Termination::Deadline { budget_ms }) => {
            let notice = format!(
                "I couldn't reach a final answer within the {} time limit. Please try a more specific question.",
                format_budget(*budget_ms)
            );
            exhausted(run, policy, notice, format!("deadline of {budget_ms} ms elapsed"))
        }
        Some(Termination::FinalAnswer) | None => (
            "The research run ended without an answer.".to_string(),
            error(ErrorKind::BudgetExhausted, format!("run ended with status {:?}", run.status())),
        ),
    }
}

fn exhausted(run: &ResearchRun, policy: ExhaustionPolicy, notice: String, detail: String) -> (String, RunError) {
    let answer = match (policy, run.last_tool_observation()) {
        (ExhaustionPolicy::BestEffort, Some(observation)) => {
            format!("{notice}\n\nMost recent data gathered:\n{observation}")
        }
        _ => notice,
    };
    (
        answer,
        RunError {
            kind: ErrorKind::BudgetExhausted,
            detail,
        },
    )
}

fn format_budget(ms: u64) -> String {
    if ms >= 1000 && ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}
