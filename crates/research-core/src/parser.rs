//! Decision Parser
//!
//! Turns one model output into exactly one [`Decision`]. Understands the
//! ReAct text format (`Action:` / `Action Input:` / `Final Answer:`), a
//! fenced ```` ```tool ```` JSON block, and native tool calls reported by the
//! provider. Narration around the decision is ignored. Parsing is pure.

use serde::{Deserialize, Serialize};

use crate::provider::Completion;
use crate::tool::{ToolInvocation, ToolRegistry};

pub const FINAL_ANSWER_LABEL: &str = "Final Answer:";
pub const ACTION_LABEL: &str = "Action:";
pub const ACTION_INPUT_LABEL: &str = "Action Input:";
pub const OBSERVATION_LABEL: &str = "Observation:";
pub const THOUGHT_LABEL: &str = "Thought:";

const TOOL_BLOCK_START: &str = "```tool";
const TOOL_BLOCK_END: &str = "```";

/// Markdown wrappers models put around labels
const EMPHASIS: [char; 3] = ['*', '_', '`'];

/// Labels that belong to the scratchpad, never to an answer
const SCRATCHPAD_LABELS: [&str; 3] = [THOUGHT_LABEL, OBSERVATION_LABEL, ACTION_LABEL];

/// What the model decided to do
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    ToolRequest(ToolInvocation),
    FinalAnswer { text: String },
    Malformed { raw: String, reason: MalformedReason },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum MalformedReason {
    Empty,
    MissingAction,
    MissingActionInput,
    EmptyFinalAnswer,
    ActionAndFinalAnswer,
    UnknownTool { tool_id: String },
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty model output"),
            Self::MissingAction => write!(f, "no action or final answer found"),
            Self::MissingActionInput => write!(f, "action given without an 'Action Input:' line"),
            Self::EmptyFinalAnswer => write!(f, "final answer was empty"),
            Self::ActionAndFinalAnswer => write!(f, "output contained both an action and a final answer"),
            Self::UnknownTool { tool_id } => write!(f, "unknown tool: {tool_id}"),
        }
    }
}

#[derive(Deserialize)]
struct ToolBlock {
    tool: String,
    #[serde(default, alias = "arguments", alias = "input")]
    argument: serde_json::Value,
}

/// Parse a provider completion, preferring a native tool call when present
pub fn parse_completion(completion: &Completion, tools: &ToolRegistry) -> Decision {
    if let Some(call) = &completion.tool_call {
        let invocation = ToolInvocation::new(clean_tool_id(&call.tool), call.argument.trim())
            .with_log(completion.content.trim());
        return check_known(invocation, tools, &completion.content);
    }
    parse_decision(&completion.content, tools)
}

/// Parse raw model text into a decision
pub fn parse_decision(raw: &str, tools: &ToolRegistry) -> Decision {
    if raw.trim().is_empty() {
        return malformed(raw, MalformedReason::Empty);
    }

    if let Some(invocation) = parse_tool_block(raw) {
        return check_known(invocation, tools, raw);
    }

    let text = strip_hallucinated_observation(raw);
    let action = parse_action(text);
    let final_answer = parse_final_answer(text);

    match (action, final_answer) {
        (Some(_), Some(_)) => malformed(raw, MalformedReason::ActionAndFinalAnswer),
        (Some(Ok(invocation)), None) => check_known(invocation, tools, raw),
        (Some(Err(reason)), None) => malformed(raw, reason),
        (None, Some(answer)) if answer.is_empty() => malformed(raw, MalformedReason::EmptyFinalAnswer),
        (None, Some(text)) => Decision::FinalAnswer { text },
        (None, None) => malformed(raw, MalformedReason::MissingAction),
    }
}

fn malformed(raw: &str, reason: MalformedReason) -> Decision {
    Decision::Malformed {
        raw: raw.to_string(),
        reason,
    }
}

fn check_known(invocation: ToolInvocation, tools: &ToolRegistry, raw: &str) -> Decision {
    if tools.contains(&invocation.tool_id) {
        Decision::ToolRequest(invocation)
    } else {
        malformed(
            raw,
            MalformedReason::UnknownTool {
                tool_id: invocation.tool_id,
            },
        )
    }
}

/// Drop anything from the first `Observation:` line after an action onwards;
/// the model cannot have seen a real observation yet.
fn strip_hallucinated_observation(raw: &str) -> &str {
    let Some(action) = find_line_label(raw, ACTION_LABEL, 0) else {
        return raw;
    };
    find_line_label(raw, OBSERVATION_LABEL, action.line).map_or(raw, |cut| &raw[..cut.line])
}

/// A label found at the start of a line
#[derive(Clone, Copy, Debug)]
struct LabelAt {
    /// Where the label (or its opening emphasis) starts
    line: usize,
    /// Where the value after the label starts
    value: usize,
}

/// Byte length of `label` at the start of `s`, counting markdown emphasis
/// around it, so `**Action:**` and `**Final Answer**:` both match.
fn label_len(s: &str, label: &str) -> Option<usize> {
    let name = label.trim_end_matches(':');
    let rest = s.trim_start_matches(EMPHASIS).strip_prefix(name)?;
    let rest = rest.trim_start_matches(EMPHASIS).strip_prefix(':')?;
    let rest = rest.trim_start_matches(EMPHASIS);
    Some(s.len() - rest.len())
}

/// First line at or after byte `from` that starts with `label`
fn find_line_label(text: &str, label: &str, from: usize) -> Option<LabelAt> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        if start < from {
            continue;
        }
        let trimmed = line.trim_start();
        let line_at = start + (line.len() - trimmed.len());
        if let Some(len) = label_len(trimmed, label) {
            return Some(LabelAt {
                line: line_at,
                value: line_at + len,
            });
        }
    }
    None
}

fn starts_with_label(line: &str, labels: &[&str]) -> bool {
    let trimmed = line.trim_start();
    labels.iter().any(|label| label_len(trimmed, label).is_some())
}

/// Text after the last `Final Answer:`, ending before any later scratchpad line
fn parse_final_answer(text: &str) -> Option<String> {
    let name = FINAL_ANSWER_LABEL.trim_end_matches(':');
    let value = text.rmatch_indices(name).find_map(|(at, _)| {
        let opened = text[..at].trim_end_matches(EMPHASIS).len();
        label_len(&text[opened..], FINAL_ANSWER_LABEL).map(|len| opened + len)
    })?;

    let answer = &text[value..];
    // Offset 1 skips the remainder of the label's own line.
    let end = SCRATCHPAD_LABELS
        .iter()
        .filter_map(|label| find_line_label(answer, label, 1))
        .map(|at| at.line)
        .min()
        .unwrap_or(answer.len());
    Some(answer[..end].trim().to_string())
}

fn parse_action(text: &str) -> Option<Result<ToolInvocation, MalformedReason>> {
    let action = find_line_label(text, ACTION_LABEL, 0)?;
    let name_line = text[action.value..].lines().next().unwrap_or_default();
    let tool_id = clean_tool_id(name_line);
    if tool_id.is_empty() {
        return Some(Err(MalformedReason::MissingAction));
    }

    let Some(input) = find_line_label(text, ACTION_INPUT_LABEL, action.line) else {
        return Some(Err(MalformedReason::MissingActionInput));
    };

    let mut argument = String::new();
    for (i, line) in text[input.value..].lines().enumerate() {
        if i > 0 {
            if starts_with_label(line, &[THOUGHT_LABEL, FINAL_ANSWER_LABEL]) {
                break;
            }
            argument.push('\n');
        }
        argument.push_str(line);
    }

    Some(Ok(ToolInvocation::new(tool_id, clean_argument(&argument)).with_log(text.trim())))
}

fn parse_tool_block(raw: &str) -> Option<ToolInvocation> {
    let start = raw.find(TOOL_BLOCK_START)?;
    let after = &raw[start + TOOL_BLOCK_START.len()..];
    let end = after.find(TOOL_BLOCK_END)?;
    let block: ToolBlock = serde_json::from_str(after[..end].trim()).ok()?;

    let argument = match block.argument {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    };
    Some(ToolInvocation::new(clean_tool_id(&block.tool), argument.trim()).with_log(raw.trim()))
}

fn clean_tool_id(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_end_matches('.')
        .trim_matches(|c| matches!(c, '`' | '"' | '\'' | '[' | ']' | '*'))
        .trim();
    trimmed.split('(').next().unwrap_or_default().trim().to_string()
}

fn clean_argument(raw: &str) -> String {
    let trimmed = raw.trim();
    for quote in ['"', '\'', '`'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].trim().to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StructuredCall;
    use crate::tool::FnTool;

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(FnTool::new("get_gas_prices", "Gas prices", |_| "12 Gwei".into()));
        tools.register(FnTool::new("defillama_protocols", "Top protocols", |_| "Aave".into()));
        tools
    }

    #[test]
    fn test_parse_react_action() {
        let raw = "Thought: I need gas data.\nAction: get_gas_prices\nAction Input: \"\"";
        match parse_decision(raw, &registry()) {
            Decision::ToolRequest(call) => {
                assert_eq!(call.tool_id, "get_gas_prices");
                assert_eq!(call.argument, "");
                assert!(call.log.starts_with("Thought: I need gas data."));
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_action_input_keeps_multiline_json() {
        let raw = "Action: defillama_protocols\nAction Input: {\n  \"limit\": 5\n}\n";
        let Decision::ToolRequest(call) = parse_decision(raw, &registry()) else {
            panic!("expected tool request");
        };
        assert_eq!(call.argument, "{\n  \"limit\": 5\n}");
    }

    #[test]
    fn test_hallucinated_observation_is_discarded() {
        let raw = "Action: defillama_protocols\nAction Input: 10\nObservation: Aave is first\nThought: I now know\nFinal Answer: Aave";
        let Decision::ToolRequest(call) = parse_decision(raw, &registry()) else {
            panic!("expected tool request");
        };
        assert_eq!(call.argument, "10");
        assert!(!call.log.contains("Observation"));
    }

    #[test]
    fn test_final_answer_strips_label() {
        let raw = "Thought: I now know the final answer\nFinal Answer:  Current gas price is 12 Gwei.  \n";
        assert_eq!(
            parse_decision(raw, &registry()),
            Decision::FinalAnswer {
                text: "Current gas price is 12 Gwei.".into()
            }
        );
    }

    #[test]
    fn test_final_answer_drops_markdown_framing() {
        for raw in [
            "**Final Answer:** Current gas price is 12 Gwei.",
            "**Final Answer**: Current gas price is 12 Gwei.",
            "Thought: done\n_Final Answer:_ Current gas price is 12 Gwei.",
        ] {
            assert_eq!(
                parse_decision(raw, &registry()),
                Decision::FinalAnswer {
                    text: "Current gas price is 12 Gwei.".into()
                },
                "{raw}"
            );
        }
    }

    #[test]
    fn test_final_answer_stops_at_scratchpad_lines() {
        for tail in ["\nThought: done", "\nObservation: none", "\n  **Thought:** that is all"] {
            let raw = format!("Final Answer: Current gas price is 12 Gwei.\nIt was 15 Gwei yesterday.{tail}");
            let Decision::FinalAnswer { text } = parse_decision(&raw, &registry()) else {
                panic!("expected final answer for {raw:?}");
            };
            assert_eq!(text, "Current gas price is 12 Gwei.\nIt was 15 Gwei yesterday.");
        }
    }

    #[test]
    fn test_final_answer_only_scratchpad_is_empty() {
        let decision = parse_decision("Final Answer:\nThought: I should check gas first", &registry());
        assert!(matches!(
            decision,
            Decision::Malformed {
                reason: MalformedReason::EmptyFinalAnswer,
                ..
            }
        ));
    }

    #[test]
    fn test_emphasized_action_labels() {
        let raw = "**Thought:** I need gas data.\n**Action:** get_gas_prices\n**Action Input:** \"\"";
        let Decision::ToolRequest(call) = parse_decision(raw, &registry()) else {
            panic!("expected tool request");
        };
        assert_eq!(call.tool_id, "get_gas_prices");
        assert_eq!(call.argument, "");
    }

    #[test]
    fn test_action_without_input_is_malformed() {
        let raw = "Thought: I need gas data.\nAction: get_gas_prices";
        assert_eq!(
            parse_decision(raw, &registry()),
            Decision::Malformed {
                raw: raw.into(),
                reason: MalformedReason::MissingActionInput,
            }
        );
    }

    #[test]
    fn test_similar_labels_do_not_match() {
        assert!(label_len("Action Input: 5", ACTION_LABEL).is_none());
        assert!(label_len("Actions: none", ACTION_LABEL).is_none());
        assert_eq!(label_len("**Action:** x", ACTION_LABEL), Some(11));
    }

    #[test]
    fn test_empty_final_answer_is_malformed() {
        let decision = parse_decision("Final Answer:   ", &registry());
        assert!(matches!(
            decision,
            Decision::Malformed {
                reason: MalformedReason::EmptyFinalAnswer,
                ..
            }
        ));
    }

    #[test]
    fn test_action_and_final_answer_is_ambiguous() {
        let raw = "Final Answer: maybe\nAction: get_gas_prices\nAction Input: ";
        assert!(matches!(
            parse_decision(raw, &registry()),
            Decision::Malformed {
                reason: MalformedReason::ActionAndFinalAnswer,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_tool_is_malformed() {
        let raw = "Action: get_weather\nAction Input: Paris";
        assert_eq!(
            parse_decision(raw, &registry()),
            Decision::Malformed {
                raw: raw.into(),
                reason: MalformedReason::UnknownTool {
                    tool_id: "get_weather".into()
                },
            }
        );
    }

    #[test]
    fn test_free_text_is_malformed() {
        for raw in ["", "   ", "I think the gas price is low today."] {
            assert!(matches!(parse_decision(raw, &registry()), Decision::Malformed { .. }));
        }
    }

    #[test]
    fn test_tool_id_decorations_are_stripped() {
        let raw = "Action: `get_gas_prices()`\nAction Input: none";
        let Decision::ToolRequest(call) = parse_decision(raw, &registry()) else {
            panic!("expected tool request");
        };
        assert_eq!(call.tool_id, "get_gas_prices");
    }

    #[test]
    fn test_fenced_tool_block() {
        let raw = "Let me check.\n```tool\n{\"tool\": \"defillama_protocols\", \"argument\": \"5\"}\n```\nOne moment.";
        let Decision::ToolRequest(call) = parse_decision(raw, &registry()) else {
            panic!("expected tool request");
        };
        assert_eq!(call.tool_id, "defillama_protocols");
        assert_eq!(call.argument, "5");
    }

    #[test]
    fn test_structured_call_wins_over_text() {
        let mut completion = Completion::text("Final Answer: ignored", "test");
        completion.tool_call = Some(StructuredCall {
            tool: "get_gas_prices".into(),
            argument: String::new(),
        });
        assert!(matches!(
            parse_completion(&completion, &registry()),
            Decision::ToolRequest(ref call) if call.tool_id == "get_gas_prices"
        ));
    }

    #[test]
    fn test_parsing_is_deterministic() {
        let tools = registry();
        let raw = "Thought: x\nAction: get_gas_prices\nAction Input: now";
        assert_eq!(parse_decision(raw, &tools), parse_decision(raw, &tools));
    }
}
