//! # research-core
//!
//! Tool orchestration for the Web3 research co-pilot: a provider-agnostic
//! ReAct loop that routes questions to data-source tools and reports the
//! answer with its sources and step trace.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Researcher                            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │  Research   │  │    Tool     │  │   LlmProvider       │  │
//! │  │    Loop     │──│  Registry   │──│   (Strategy)        │  │
//! │  └──────┬──────┘  └─────────────┘  └─────────────────────┘  │
//! │         │ Prompt ─▶ model ─▶ Decision ─▶ tool ─▶ Observation │
//! │         ▼                                                    │
//! │     RunResult { answer, sources, steps, success, error }    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The core only sees tools through the [`Tool`] contract (name, description,
//! one string in, text out) and never looks inside them.

pub mod error;
pub mod message;
pub mod mock;
pub mod parser;
pub mod prompt;
pub mod provider;
pub mod report;
pub mod research;
pub mod run;
pub mod sources;
pub mod tool;

pub use error::{AgentError, Result};
pub use message::{Message, Role};
pub use parser::{Decision, MalformedReason};
pub use provider::LlmProvider;
pub use report::{ErrorKind, ExhaustionPolicy, RunError, RunResult};
pub use research::{ResearchConfig, Researcher, ResearcherBuilder};
pub use run::{ResearchRun, RunStatus, Step, Termination};
pub use sources::ProviderTable;
pub use tool::{FnTool, Tool, ToolInvocation, ToolRegistry};
