//! Research Loop
//!
//! Implements the ReAct (Reason + Act) cycle behind [`Researcher::research`]:
//! render the prompt, ask the model, parse its decision, run at most one
//! tool, feed the observation back, and stop on a final answer or when the
//! iteration/time budget runs out.
//!
//! A `Researcher` is built explicitly (see [`ResearcherBuilder`]) and owned
//! by whoever serves queries; dropping it releases the provider and tools.
//! It keeps no per-run state, so concurrent `research` calls are fine. Each
//! run works on the tool snapshot taken when it started; `add_tool` swaps in
//! a new snapshot without disturbing runs in flight.

use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::{Instant, timeout};

use crate::error::{AgentError, Result};
use crate::parser::{Decision, MalformedReason, parse_completion};
use crate::prompt::{DEFAULT_SYSTEM_PROMPT, PromptTemplate};
use crate::provider::{GenerationOptions, LlmProvider};
use crate::report::{ExhaustionPolicy, RunResult, extract};
use crate::run::{CorrectionKind, ResearchRun, Termination, millis};
use crate::sources::ProviderTable;
use crate::tool::{Tool, ToolInvocation, ToolRegistry};

/// Research loop configuration
#[derive(Clone, Debug)]
pub struct ResearchConfig {
    /// Framing placed ahead of the tool catalog
    pub system_prompt: String,

    /// Model round-trips allowed per run
    pub max_iterations: usize,

    /// Overall deadline, measured from run start
    pub max_wall_clock: Duration,

    /// Budget for a single model call
    pub model_call_timeout: Duration,

    /// Budget for a single tool call
    pub tool_call_timeout: Duration,

    /// What to answer when the budget runs out
    pub on_exhausted: ExhaustionPolicy,

    /// Generation options
    pub generation: GenerationOptions,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 5,
            max_wall_clock: Duration::from_secs(60),
            model_call_timeout: Duration::from_secs(30),
            tool_call_timeout: Duration::from_secs(20),
            on_exhausted: ExhaustionPolicy::BestEffort,
            generation: GenerationOptions::default(),
        }
    }
}

impl ResearchConfig {
    /// Defaults overridden by `RESEARCH_*` environment variables
    ///
    /// - `RESEARCH_MAX_ITERATIONS`
    /// - `RESEARCH_TIMEOUT_SECS`
    /// - `RESEARCH_MODEL_TIMEOUT_SECS`
    /// - `RESEARCH_TOOL_TIMEOUT_SECS`
    /// - `RESEARCH_ON_EXHAUSTED` (`best_effort` or `fail`)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(n) = env_parse::<usize>("RESEARCH_MAX_ITERATIONS")? {
            config.max_iterations = n;
        }
        if let Some(secs) = env_parse::<u64>("RESEARCH_TIMEOUT_SECS")? {
            config.max_wall_clock = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("RESEARCH_MODEL_TIMEOUT_SECS")? {
            config.model_call_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("RESEARCH_TOOL_TIMEOUT_SECS")? {
            config.tool_call_timeout = Duration::from_secs(secs);
        }
        if let Some(policy) = env_parse::<ExhaustionPolicy>("RESEARCH_ON_EXHAUSTED")? {
            config.on_exhausted = policy;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }
        if self.max_wall_clock.is_zero() {
            return Err(AgentError::Config("max_wall_clock must be positive".into()));
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| AgentError::Config(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Tools plus the prompt rendered for them
struct Catalog {
    tools: ToolRegistry,
    template: PromptTemplate,
}

impl Catalog {
    fn new(tools: ToolRegistry, framing: &str) -> Self {
        let template = PromptTemplate::build(framing, &tools);
        Self { tools, template }
    }
}

/// The research orchestrator
pub struct Researcher {
    provider: Arc<dyn LlmProvider>,
    catalog: RwLock<Arc<Catalog>>,
    providers: ProviderTable,
    config: ResearchConfig,
}

impl Researcher {
    /// Create a new researcher
    pub fn new(provider: Arc<dyn LlmProvider>, tools: ToolRegistry, config: ResearchConfig) -> Self {
        let catalog = Catalog::new(tools, &config.system_prompt);
        Self {
            provider,
            catalog: RwLock::new(Arc::new(catalog)),
            providers: ProviderTable::default(),
            config,
        }
    }

    /// Create with default configuration
    pub fn with_defaults(provider: Arc<dyn LlmProvider>, tools: ToolRegistry) -> Self {
        Self::new(provider, tools, ResearchConfig::default())
    }

    pub fn builder() -> ResearcherBuilder {
        ResearcherBuilder::new()
    }

    /// Register a tool and rebuild the cached prompt
    ///
    /// Runs already in flight keep the snapshot they started with.
    pub fn add_tool(&self, tool: Arc<dyn Tool>) {
        let mut guard = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        let mut tools = guard.tools.clone();
        tracing::debug!(tool = %tool.name(), "Adding tool");
        tools.register_shared(tool);
        *guard = Arc::new(Catalog::new(tools, &self.config.system_prompt));
    }

    fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Answer a question; never fails, failures are described in the result
    pub async fn research(&self, query: &str) -> RunResult {
        let run = self.run(query).await;
        self.extract(&run)
    }

    /// Caller-facing result for a run produced by [`Researcher::run`]
    pub fn extract(&self, run: &ResearchRun) -> RunResult {
        extract(run, &self.providers, self.config.on_exhausted)
    }

    /// Drive one query to a terminal state and return the full run
    pub async fn run(&self, query: &str) -> ResearchRun {
        let started = Instant::now();
        let catalog = self.snapshot();
        let mut run = ResearchRun::start(query.trim());

        if run.query().is_empty() {
            run.fail(Termination::EmptyQuery, started.elapsed());
            return run;
        }
        if catalog.tools.is_empty() {
            tracing::warn!("Research requested with no tools registered");
            run.fail(Termination::NoTools, started.elapsed());
            return run;
        }

        let deadline = started + self.config.max_wall_clock;
        let budget_ms = millis(self.config.max_wall_clock);

        loop {
            if run.iteration_count() >= self.config.max_iterations {
                run.exhaust(
                    Termination::IterationLimit {
                        max_iterations: self.config.max_iterations,
                    },
                    started.elapsed(),
                );
                break;
            }
            let Some(remaining) = time_left(deadline) else {
                run.exhaust(Termination::Deadline { budget_ms }, started.elapsed());
                break;
            };

            let iteration = run.begin_iteration();
            let messages = catalog.template.render(&run);
            let call_budget = remaining.min(self.config.model_call_timeout);
            tracing::debug!(run_id = %run.id(), iteration, "Calling model");

            let call = self.provider.complete(&messages, &self.config.generation);
            let completion = match timeout(call_budget, call).await {
                Ok(Ok(completion)) => completion,
                Ok(Err(e)) => {
                    tracing::error!(run_id = %run.id(), iteration, error = %e, "Model call failed");
                    run.fail(
                        Termination::ModelFailure {
                            kind: e.kind().into(),
                            message: e.to_string(),
                        },
                        started.elapsed(),
                    );
                    break;
                }
                Err(_) => {
                    if time_left(deadline).is_none() {
                        run.exhaust(Termination::Deadline { budget_ms }, started.elapsed());
                        break;
                    }
                    tracing::warn!(run_id = %run.id(), iteration, "Model call timed out");
                    run.record_correction(
                        CorrectionKind::ModelTimeout,
                        String::new(),
                        format!(
                            "The previous response timed out after {} ms. Continue with the next step.",
                            millis(call_budget)
                        ),
                    );
                    continue;
                }
            };
            if completion.is_truncated() {
                tracing::warn!(run_id = %run.id(), iteration, "Model reply hit the token limit");
            }

            match parse_completion(&completion, &catalog.tools) {
                Decision::FinalAnswer { text } => {
                    run.complete(text, started.elapsed());
                    break;
                }
                Decision::ToolRequest(invocation) => {
                    let Some(remaining) = time_left(deadline) else {
                        run.exhaust(Termination::Deadline { budget_ms }, started.elapsed());
                        break;
                    };
                    self.invoke_tool(&catalog, &mut run, invocation, remaining).await;
                }
                Decision::Malformed {
                    raw,
                    reason: MalformedReason::UnknownTool { tool_id },
                } => {
                    tracing::warn!(run_id = %run.id(), iteration, tool = %tool_id, "Model requested unknown tool");
                    let valid = catalog.tools.names().join(", ");
                    run.record_correction(
                        CorrectionKind::UnknownTool,
                        raw.trim().to_string(),
                        format!("{tool_id} is not a valid tool, try one of [{valid}]."),
                    );
                }
                Decision::Malformed { raw, reason } => {
                    tracing::warn!(run_id = %run.id(), iteration, %reason, "Could not parse model output");
                    run.record_correction(
                        CorrectionKind::MalformedDecision,
                        raw.trim().to_string(),
                        format!(
                            "Invalid format: {reason}. Reply with an 'Action:' line and an 'Action Input:' line, or with a 'Final Answer:' line."
                        ),
                    );
                }
            }
        }

        tracing::info!(
            run_id = %run.id(),
            status = ?run.status(),
            iterations = run.iteration_count(),
            tool_calls = run.trace().len(),
            elapsed_ms = run.elapsed_ms(),
            "Research run finished"
        );
        run
    }

    async fn invoke_tool(
        &self,
        catalog: &Catalog,
        run: &mut ResearchRun,
        invocation: ToolInvocation,
        remaining: Duration,
    ) {
        let Some(tool) = catalog.tools.get(&invocation.tool_id) else {
            // The parser only yields registered ids for this snapshot.
            return;
        };
        let budget = remaining.min(self.config.tool_call_timeout);
        tracing::debug!(
            run_id = %run.id(),
            tool = %invocation.tool_id,
            argument = %invocation.argument,
            "Executing tool"
        );

        let call_started = Instant::now();
        match timeout(budget, tool.invoke(&invocation.argument)).await {
            Ok(observation) => run.record_step(invocation, observation, call_started.elapsed()),
            Err(_) => {
                tracing::warn!(run_id = %run.id(), tool = %invocation.tool_id, "Tool call timed out");
                let observation =
                    format!("Tool '{}' did not respond within {} ms.", invocation.tool_id, millis(budget));
                run.record_timed_out_step(invocation, observation, call_started.elapsed());
            }
        }
    }

    /// Snapshot of registered tool ids, in catalog order
    pub fn available_tools(&self) -> Vec<String> {
        self.snapshot().tools.names().into_iter().map(String::from).collect()
    }

    /// Snapshot of the current registry
    pub fn tools(&self) -> ToolRegistry {
        self.snapshot().tools.clone()
    }

    /// System prompt currently used for new runs
    pub fn system_prompt(&self) -> String {
        self.snapshot().template.system_prompt().to_string()
    }

    /// Provider-name lookup used for citations
    pub const fn provider_table(&self) -> &ProviderTable {
        &self.providers
    }

    /// Get the LLM provider
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Get configuration
    pub const fn config(&self) -> &ResearchConfig {
        &self.config
    }
}

fn time_left(deadline: Instant) -> Option<Duration> {
    deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
}

/// Builder for Researcher configuration
pub struct ResearcherBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolRegistry,
    providers: ProviderTable,
    config: ResearchConfig,
}

impl Default for ResearcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResearcherBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolRegistry::new(),
            providers: ProviderTable::default(),
            config: ResearchConfig::default(),
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    #[must_use]
    pub fn tools<I>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Tool>>,
    {
        for tool in tools {
            self.tools.register_shared(tool);
        }
        self
    }

    #[must_use]
    pub fn config(mut self, config: ResearchConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn provider_table(mut self, providers: ProviderTable) -> Self {
        self.providers = providers;
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    #[must_use]
    pub const fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    #[must_use]
    pub const fn max_wall_clock(mut self, budget: Duration) -> Self {
        self.config.max_wall_clock = budget;
        self
    }

    #[must_use]
    pub const fn on_exhausted(mut self, policy: ExhaustionPolicy) -> Self {
        self.config.on_exhausted = policy;
        self
    }

    pub fn build(self) -> Result<Researcher> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        self.config.validate()?;

        let mut researcher = Researcher::new(provider, self.tools, self.config);
        researcher.providers = self.providers;
        Ok(researcher)
    }
}
