//! End-to-end behavior of the research loop against a scripted model.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use research_core::mock::{Scripted, ScriptedProvider};
use research_core::parser::FINAL_ANSWER_LABEL;
use research_core::{
    AgentError, ErrorKind, ExhaustionPolicy, FnTool, ProviderTable, RunStatus, Researcher, Termination, Tool,
    ToolRegistry,
};

fn gas_and_tvl() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(FnTool::new("getGasPrice", "Current Ethereum gas price", |_| "12 Gwei".into()));
    tools.register(FnTool::new("getTvlTop10", "Top 10 DeFi protocols by TVL", |_| "1. Aave".into()));
    tools
}

fn researcher(provider: Arc<ScriptedProvider>, tools: ToolRegistry) -> Researcher {
    Researcher::builder()
        .provider(provider)
        .tools(tools.iter().cloned())
        .provider_table(ProviderTable::default().rule("gas", "Etherscan"))
        .build()
        .unwrap()
}

#[tokio::test]
async fn gas_price_scenario() {
    let provider = Arc::new(ScriptedProvider::new([
        "Thought: I should look up the gas price.\nAction: getGasPrice\nAction Input: \"\"",
        "Thought: I now know the final answer\nFinal Answer: Current gas price is 12 Gwei.",
    ]));
    let researcher = researcher(provider.clone(), gas_and_tvl());

    let result = researcher.research("What is the gas price right now?").await;

    assert!(result.success);
    assert_eq!(result.answer, "Current gas price is 12 Gwei.");
    assert_eq!(result.sources, vec!["Etherscan".to_string()]);
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].invocation.tool_id, "getGasPrice");
    assert_eq!(result.steps[0].invocation.argument, "");
    assert_eq!(result.steps[0].observation, "12 Gwei");
    assert!(result.error.is_none());

    // Second round-trip saw the first observation.
    let prompts = provider.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1][1].content.contains("Observation: 12 Gwei"));
}

#[tokio::test]
async fn empty_registry_short_circuits() {
    let provider = Arc::new(ScriptedProvider::new(["Final Answer: should never be asked"]));
    let researcher = researcher(provider.clone(), ToolRegistry::new());

    let result = researcher.research("What is TVL?").await;

    assert!(!result.success);
    assert!(result.answer.starts_with("No data sources connected"));
    assert!(result.sources.is_empty());
    assert!(result.steps.is_empty());
    assert_eq!(result.error.unwrap().kind, ErrorKind::NoToolsConfigured);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn direct_answer_has_no_steps() {
    let provider = Arc::new(ScriptedProvider::new(["Final Answer: Bitcoin launched in 2009."]));
    let result = researcher(provider, gas_and_tvl()).research("When did Bitcoin launch?").await;

    assert!(result.success);
    assert!(result.steps.is_empty());
    assert!(result.sources.is_empty());
    assert!(!result.answer.contains(FINAL_ANSWER_LABEL));
}

#[tokio::test]
async fn iteration_budget_is_enforced() {
    let provider = Arc::new(ScriptedProvider::repeating("Action: getGasPrice\nAction Input: "));
    let researcher = Researcher::builder()
        .provider(provider.clone())
        .tools(gas_and_tvl().iter().cloned())
        .max_iterations(3)
        .build()
        .unwrap();

    let run = researcher.run("Keep checking gas").await;

    assert_eq!(run.status(), RunStatus::Exhausted);
    assert_eq!(run.iteration_count(), 3);
    assert_eq!(run.trace().len(), 3);
    assert_eq!(provider.calls(), 3);
    assert_eq!(run.termination(), Some(&Termination::IterationLimit { max_iterations: 3 }));

    let result = researcher.extract(&run);
    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, ErrorKind::BudgetExhausted);
    // Best effort: the gathered data is surfaced.
    assert!(result.answer.contains("12 Gwei"));
}

#[tokio::test]
async fn fail_policy_does_not_surface_partial_data() {
    let provider = Arc::new(ScriptedProvider::repeating("Action: getGasPrice\nAction Input: "));
    let researcher = Researcher::builder()
        .provider(provider)
        .tools(gas_and_tvl().iter().cloned())
        .max_iterations(2)
        .on_exhausted(ExhaustionPolicy::Fail)
        .build()
        .unwrap();

    let result = researcher.research("Keep checking gas").await;
    assert!(!result.success);
    assert!(!result.answer.is_empty());
    assert!(!result.answer.contains("12 Gwei"));
    assert_eq!(result.steps.len(), 2);
}

#[tokio::test]
async fn unknown_tool_is_recoverable() {
    let provider = Arc::new(ScriptedProvider::new([
        "Action: getWeather\nAction Input: Paris",
        "Action: getTvlTop10\nAction Input: ",
        "Final Answer: Aave leads by TVL.",
    ]));
    let researcher = researcher(provider.clone(), gas_and_tvl());

    let result = researcher.research("Which protocol has the most TVL?").await;

    assert!(result.success);
    assert_eq!(result.answer, "Aave leads by TVL.");
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.sources, vec!["getTvlTop10".to_string()]);

    let second_prompt = &provider.prompts()[1][1].content;
    assert!(second_prompt.contains("getWeather is not a valid tool, try one of [getGasPrice, getTvlTop10]."));
}

#[tokio::test]
async fn malformed_output_gets_corrective_observation() {
    let provider = Arc::new(ScriptedProvider::new([
        "Gas is probably cheap today.",
        "Final Answer: Gas is 12 Gwei.",
    ]));
    let researcher = researcher(provider.clone(), gas_and_tvl());

    let run = researcher.run("gas?").await;
    assert_eq!(run.status(), RunStatus::Completed);
    assert_eq!(run.iteration_count(), 2);
    assert!(run.trace().is_empty());
    assert!(provider.prompts()[1][1].content.contains("Invalid format"));
}

#[tokio::test]
async fn only_malformed_output_exhausts() {
    let provider = Arc::new(ScriptedProvider::repeating("no structure here"));
    let researcher = Researcher::builder()
        .provider(provider)
        .tools(gas_and_tvl().iter().cloned())
        .max_iterations(4)
        .build()
        .unwrap();

    let run = researcher.run("gas?").await;
    assert_eq!(run.status(), RunStatus::Exhausted);
    assert_eq!(run.iteration_count(), 4);

    // Nothing real was gathered, so best effort degrades to the notice.
    let result = researcher.extract(&run);
    assert!(!result.answer.contains("Most recent data"));
}

#[tokio::test]
async fn model_failure_is_fatal() {
    let provider = Arc::new(ScriptedProvider::from_steps([
        Scripted::reply("Action: getGasPrice\nAction Input: "),
        Scripted::error(|| AgentError::Auth("invalid API key".into())),
        Scripted::reply("Final Answer: unreachable"),
    ]));
    let researcher = researcher(provider.clone(), gas_and_tvl());

    let run = researcher.run("gas?").await;
    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(provider.calls(), 2);

    let result = researcher.extract(&run);
    assert!(!result.success);
    assert_eq!(result.steps.len(), 1);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::ModelCallFailure);
    assert!(error.detail.contains("invalid API key"));
    assert!(result.answer.starts_with("Error processing query:"));
}

#[tokio::test]
async fn wall_clock_deadline_never_hangs() {
    let provider = Arc::new(ScriptedProvider::from_steps([Scripted::delayed(
        Duration::from_millis(100),
        "Final Answer: too late",
    )]));
    let researcher = Researcher::builder()
        .provider(provider)
        .tools(gas_and_tvl().iter().cloned())
        .max_wall_clock(Duration::from_millis(1))
        .build()
        .unwrap();

    let started = Instant::now();
    let run = researcher.run("gas?").await;

    assert!(started.elapsed() < Duration::from_millis(90));
    assert!(matches!(run.status(), RunStatus::Exhausted | RunStatus::Failed));
    assert!(matches!(run.termination(), Some(Termination::Deadline { budget_ms: 1 })));
    assert!(run.final_answer().is_none());
    assert!(!researcher.extract(&run).answer.is_empty());
}

#[tokio::test]
async fn extraction_is_idempotent_and_deduplicates() {
    let provider = Arc::new(ScriptedProvider::new([
        "Action: defillama_protocols\nAction Input: 5",
        "Action: defillama_protocols\nAction Input: 10",
        "Action: etherscan_gas_prices\nAction Input: ",
        "Final Answer: done",
    ]));
    let mut tools = ToolRegistry::new();
    tools.register(FnTool::new("defillama_protocols", "Protocols", |n| format!("top {n}")));
    tools.register(FnTool::new("etherscan_gas_prices", "Gas", |_| "12 Gwei".into()));
    let researcher = researcher(provider, tools);

    let run = researcher.run("compare").await;
    let first = researcher.extract(&run);
    let second = researcher.extract(&run);

    assert_eq!(first.sources, vec!["DeFiLlama".to_string(), "Etherscan".to_string()]);
    assert_eq!(serde_json::to_string(&first.sources).unwrap(), serde_json::to_string(&second.sources).unwrap());
    assert_eq!(serde_json::to_string(&first.steps).unwrap(), serde_json::to_string(&second.steps).unwrap());
    assert_eq!(first.steps.iter().map(|s| s.observation.as_str()).collect::<Vec<_>>(), ["top 5", "top 10", "12 Gwei"]);
}

#[tokio::test]
async fn tool_error_text_passes_through() {
    let provider = Arc::new(ScriptedProvider::new([
        "Action: getGasPrice\nAction Input: ",
        "Final Answer: The gas source is unavailable.",
    ]));
    let mut tools = ToolRegistry::new();
    tools.register(FnTool::new("getGasPrice", "Gas", |_| "Error: Etherscan API key not configured".into()));
    let researcher = researcher(provider.clone(), tools);

    let result = researcher.research("gas?").await;
    assert!(result.success);
    assert_eq!(result.steps[0].observation, "Error: Etherscan API key not configured");
    assert!(provider.prompts()[1][1].content.contains("Observation: Error: Etherscan API key not configured"));
}

#[tokio::test]
async fn runs_use_registry_snapshot_from_start() {
    struct GatedTool {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Tool for GatedTool {
        fn name(&self) -> &str {
            "getGasPrice"
        }
        fn description(&self) -> &str {
            "Gas"
        }
        async fn invoke(&self, _argument: &str) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            "12 Gwei".into()
        }
    }

    let provider = Arc::new(ScriptedProvider::new([
        "Action: getGasPrice\nAction Input: ",
        "Action: getTvlTop10\nAction Input: ",
        "Final Answer: done",
    ]));
    let gated = Arc::new(GatedTool {
        calls: AtomicUsize::new(0),
    });
    let researcher = Arc::new(
        Researcher::builder()
            .provider(provider)
            .tools([gated.clone() as Arc<dyn Tool>])
            .build()
            .unwrap(),
    );

    let handle = {
        let researcher = Arc::clone(&researcher);
        tokio::spawn(async move { researcher.run("gas then tvl").await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    researcher.add_tool(Arc::new(FnTool::new("getTvlTop10", "TVL", |_| "Aave".into())));

    let run = handle.await.unwrap();
    assert_eq!(gated.calls.load(Ordering::SeqCst), 1);
    // The in-flight run never saw the late registration.
    assert_eq!(run.trace().len(), 1);
    assert_eq!(researcher.available_tools(), vec!["getGasPrice".to_string(), "getTvlTop10".to_string()]);
}
