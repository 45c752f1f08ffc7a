//! Orchestration Run State
//!
//! One `ResearchRun` exists per query. Only the research loop mutates it;
//! callers get it back frozen once it reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::tool::ToolInvocation;

/// Lifecycle state of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Exhausted,
    Failed,
}

impl RunStatus {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Why a run stopped
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum Termination {
    FinalAnswer,
    IterationLimit { max_iterations: usize },
    Deadline { budget_ms: u64 },
    ModelFailure { kind: String, message: String },
    NoTools,
    EmptyQuery,
}

/// One executed tool call and the text it returned
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based iteration the call was decided in
    pub iteration: usize,
    pub invocation: ToolInvocation,
    pub observation: String,
    pub elapsed_ms: u64,
    /// The tool did not answer in time; the observation is a placeholder
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl Step {
    /// First `max_chars` characters of the observation, with an ellipsis when cut
    pub fn observation_preview(&self, max_chars: usize) -> String {
        match self.observation.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}...", &self.observation[..cut]),
            None => self.observation.clone(),
        }
    }
}

/// Why the loop fed a synthetic observation back instead of a tool result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    UnknownTool,
    MalformedDecision,
    ModelTimeout,
}

/// Everything the model has seen so far, in causal order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    /// Index into the run's trace
    Tool { step: usize },
    Correction {
        iteration: usize,
        kind: CorrectionKind,
        /// Model text that triggered the correction
        log: String,
        observation: String,
    },
}

/// Ephemeral state of one research query
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResearchRun {
    id: Uuid,
    query: String,
    status: RunStatus,
    iteration_count: usize,
    trace: Vec<Step>,
    transcript: Vec<TranscriptEntry>,
    final_answer: Option<String>,
    termination: Option<Termination>,
    started_at: DateTime<Utc>,
    elapsed_ms: u64,
}

impl ResearchRun {
    pub(crate) fn start(query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            status: RunStatus::Running,
            iteration_count: 0,
            trace: Vec::new(),
            transcript: Vec::new(),
            final_answer: None,
            termination: None,
            started_at: Utc::now(),
            elapsed_ms: 0,
        }
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub const fn status(&self) -> RunStatus {
        self.status
    }

    pub const fn iteration_count(&self) -> usize {
        self.iteration_count
    }

    /// Executed tool calls in invocation order
    pub fn trace(&self) -> &[Step] {
        &self.trace
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    pub const fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub const fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Most recent observation a tool actually returned
    pub fn last_tool_observation(&self) -> Option<&str> {
        self.trace
            .iter()
            .rev()
            .find(|s| !s.timed_out)
            .map(|s| s.observation.as_str())
    }

    pub(crate) fn begin_iteration(&mut self) -> usize {
        debug_assert!(!self.status.is_terminal());
        self.iteration_count += 1;
        self.iteration_count
    }

    pub(crate) fn record_step(&mut self, invocation: ToolInvocation, observation: String, elapsed: Duration) {
        self.push_step(invocation, observation, elapsed, false);
    }

    /// A call cut off by its timeout; still a step, but not data
    pub(crate) fn record_timed_out_step(&mut self, invocation: ToolInvocation, observation: String, elapsed: Duration) {
        self.push_step(invocation, observation, elapsed, true);
    }

    fn push_step(&mut self, invocation: ToolInvocation, observation: String, elapsed: Duration, timed_out: bool) {
        debug_assert!(!self.status.is_terminal());
        let step = self.trace.len();
        self.trace.push(Step {
            iteration: self.iteration_count,
            invocation,
            observation,
            elapsed_ms: millis(elapsed),
            timed_out,
        });
        self.transcript.push(TranscriptEntry::Tool { step });
    }

    pub(crate) fn record_correction(&mut self, kind: CorrectionKind, log: String, observation: String) {
        debug_assert!(!self.status.is_terminal());
        self.transcript.push(TranscriptEntry::Correction {
            iteration: self.iteration_count,
            kind,
            log,
            observation,
        });
    }

    pub(crate) fn complete(&mut self, answer: String, elapsed: Duration) {
        self.final_answer = Some(answer);
        self.finish(RunStatus::Completed, Termination::FinalAnswer, elapsed);
    }

    pub(crate) fn exhaust(&mut self, cause: Termination, elapsed: Duration) {
        self.finish(RunStatus::Exhausted, cause, elapsed);
    }

    pub(crate) fn fail(&mut self, cause: Termination, elapsed: Duration) {
        self.finish(RunStatus::Failed, cause, elapsed);
    }

    fn finish(&mut self, status: RunStatus, cause: Termination, elapsed: Duration) {
        debug_assert!(!self.status.is_terminal(), "run terminated twice");
        self.status = status;
        self.termination = Some(cause);
        self.elapsed_ms = millis(elapsed);
    }
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_preview_is_char_safe() {
        let step = Step {
            iteration: 1,
            invocation: ToolInvocation::new("gas", ""),
            observation: "⛽ 12 Gwei".into(),
            elapsed_ms: 0,
            timed_out: false,
        };
        assert_eq!(step.observation_preview(1), "⛽...");
        assert_eq!(step.observation_preview(100), "⛽ 12 Gwei");
        assert_eq!(step.observation, "⛽ 12 Gwei");
    }

    #[test]
    fn test_run_lifecycle() {
        let mut run = ResearchRun::start("gas?");
        assert_eq!(run.status(), RunStatus::Running);

        assert_eq!(run.begin_iteration(), 1);
        run.record_correction(CorrectionKind::UnknownTool, "Action: nope".into(), "bad tool".into());
        assert_eq!(run.transcript().len(), 1);
        assert!(run.last_tool_observation().is_none());

        run.begin_iteration();
        run.record_step(ToolInvocation::new("gas", ""), "12 Gwei".into(), Duration::from_millis(3));
        assert_eq!(run.trace().len(), 1);
        assert_eq!(run.trace()[0].iteration, 2);
        assert_eq!(run.transcript().len(), 2);

        run.begin_iteration();
        run.record_timed_out_step(ToolInvocation::new("gas", ""), "no reply".into(), Duration::from_millis(5));
        assert_eq!(run.trace().len(), 2);
        assert_eq!(run.last_tool_observation(), Some("12 Gwei"));

        run.complete("done".into(), Duration::from_millis(10));
        assert_eq!(run.status(), RunStatus::Completed);
        assert_eq!(run.final_answer(), Some("done"));
        assert_eq!(run.termination(), Some(&Termination::FinalAnswer));
        assert_eq!(run.elapsed_ms(), 10);
    }
}
