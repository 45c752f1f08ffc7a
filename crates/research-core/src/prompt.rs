//! Prompt Builder
//!
//! Renders the ReAct instruction set: system framing, the tool catalog and
//! the response-format contract go into a system message that is built once
//! per registry state; the question and the scratchpad of prior steps go
//! into the user message each iteration.

use crate::message::Message;
use crate::parser::{ACTION_INPUT_LABEL, ACTION_LABEL, FINAL_ANSWER_LABEL, OBSERVATION_LABEL, THOUGHT_LABEL};
use crate::run::{ResearchRun, TranscriptEntry};
use crate::tool::ToolRegistry;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a Web3 Research Co-Pilot. Answer questions about cryptocurrency, DeFi, and blockchain data using the available tools.";

/// System prompt rendered for one registry state
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    system: String,
}

impl PromptTemplate {
    /// Render framing, tool catalog and format contract
    pub fn build(framing: &str, tools: &ToolRegistry) -> Self {
        let mut system = String::from(framing.trim());
        system.push_str("\n\nTOOLS:\n");
        for tool in tools.iter() {
            system.push_str(&format!("{}: {}\n", tool.name(), tool.description()));
        }

        let tool_names = tools.names().join(", ");
        system.push_str(&format!(
            "\nUse the following format:\n\n\
             Question: the input question you must answer\n\
             {THOUGHT_LABEL} you should always think about what to do\n\
             {ACTION_LABEL} the action to take, should be one of [{tool_names}]\n\
             {ACTION_INPUT_LABEL} the input to the action (may be empty)\n\
             {OBSERVATION_LABEL} the result of the action\n\
             ... (this Thought/Action/Action Input/Observation can repeat N times)\n\
             {THOUGHT_LABEL} I now know the final answer\n\
             {FINAL_ANSWER_LABEL} the final answer to the original input question\n\n\
             Only write one Action per response and stop after its Action Input.\n"
        ));

        Self { system }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system
    }

    /// Messages for the next model round-trip
    pub fn render(&self, run: &ResearchRun) -> Vec<Message> {
        vec![
            Message::system(self.system.clone()),
            Message::user(render_scratchpad(run)),
        ]
    }
}

/// Question followed by every prior thought/action/observation
pub fn render_scratchpad(run: &ResearchRun) -> String {
    let mut pad = format!("Question: {}\n{THOUGHT_LABEL}", run.query());
    for entry in run.transcript() {
        let (log, observation) = match entry {
            TranscriptEntry::Tool { step } => {
                let step = &run.trace()[*step];
                (step.invocation.log.as_str(), step.observation.as_str())
            }
            TranscriptEntry::Correction { log, observation, .. } => (log.as_str(), observation.as_str()),
        };
        let thought = log.strip_prefix(THOUGHT_LABEL).unwrap_or(log).trim();
        if !thought.is_empty() {
            pad.push(' ');
            pad.push_str(thought);
        }
        pad.push_str(&format!("\n{OBSERVATION_LABEL} {observation}\n{THOUGHT_LABEL}"));
    }
    pad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::CorrectionKind;
    use crate::tool::{FnTool, ToolInvocation};
    use std::time::Duration;

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(FnTool::new("getGasPrice", "Current Ethereum gas prices", |_| "12 Gwei".into()));
        tools.register(FnTool::new("getTvlTop10", "Top 10 protocols by TVL", |_| "Aave".into()));
        tools
    }

    #[test]
    fn test_catalog_lists_tools_in_order() {
        let template = PromptTemplate::build(DEFAULT_SYSTEM_PROMPT, &registry());
        let system = template.system_prompt();

        let gas = system.find("getGasPrice: Current Ethereum gas prices").unwrap();
        let tvl = system.find("getTvlTop10: Top 10 protocols by TVL").unwrap();
        assert!(gas < tvl);
        assert!(system.contains("should be one of [getGasPrice, getTvlTop10]"));
        assert!(system.contains(FINAL_ANSWER_LABEL));
    }

    #[test]
    fn test_scratchpad_replays_transcript() {
        let mut run = ResearchRun::start("What is gas?");
        run.begin_iteration();
        run.record_correction(
            CorrectionKind::UnknownTool,
            "Action: gas".into(),
            "gas is not a valid tool".into(),
        );
        run.begin_iteration();
        run.record_step(
            ToolInvocation::new("getGasPrice", "").with_log("Action: getGasPrice\nAction Input:"),
            "12 Gwei".into(),
            Duration::ZERO,
        );

        let pad = render_scratchpad(&run);
        assert!(pad.starts_with("Question: What is gas?\n"));
        let correction = pad.find("Observation: gas is not a valid tool").unwrap();
        let real = pad.find("Observation: 12 Gwei").unwrap();
        assert!(correction < real);
        assert!(pad.ends_with(THOUGHT_LABEL));
    }

    #[test]
    fn test_render_produces_system_and_user() {
        let template = PromptTemplate::build(DEFAULT_SYSTEM_PROMPT, &registry());
        let messages = template.render(&ResearchRun::start("gas?"));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, template.system_prompt());
        assert_eq!(messages[1].content, "Question: gas?\nThought:");
    }
}
