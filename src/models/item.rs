use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::usage::Usage;
use crate::errors::{ProviderError, ProviderResult};

/// Markers delimiting an internal thinking segment inside response text.
pub const THINK_START: &str = "<think>";
pub const THINK_END: &str = "</think>";

/// Non-owning reference to the agent an item belongs to. Items never keep
/// agents alive; the registry that resolves ids is owned elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        AgentId(name.into())
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(name: &str) -> Self {
        AgentId(name.to_string())
    }
}

fn expect_type(raw: &Value, expected: &str) -> ProviderResult<()> {
    match raw.get("type").and_then(Value::as_str) {
        Some(t) if t == expected => Ok(()),
        other => Err(ProviderError::model(format!(
            "expected a '{}' payload, got {:?}",
            expected, other
        ))),
    }
}

/// A message generated by the model, with its backend-native payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageOutputItem {
    pub agent: AgentId,
    pub raw: Value,
}

impl MessageOutputItem {
    pub fn new(agent: AgentId, raw: Value) -> ProviderResult<Self> {
        expect_type(&raw, "message")?;
        Ok(Self { agent, raw })
    }

    /// All text blocks of this message, space-joined.
    pub fn text_content(&self) -> String {
        text_message_output(self)
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallItem {
    pub agent: AgentId,
    pub raw: Value,
}

impl ToolCallItem {
    pub fn new(agent: AgentId, raw: Value) -> ProviderResult<Self> {
        expect_type(&raw, "function_call")?;
        Ok(Self { agent, raw })
    }

    pub fn call_id(&self) -> &str {
        self.raw.get("call_id").and_then(Value::as_str).unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.raw.get("name").and_then(Value::as_str).unwrap_or("")
    }

    pub fn arguments(&self) -> &str {
        self.raw
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

/// The result of running a requested tool, with the materialized output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallOutputItem {
    pub agent: AgentId,
    pub raw: Value,
    pub output: String,
}

impl ToolCallOutputItem {
    pub fn new(agent: AgentId, raw: Value) -> ProviderResult<Self> {
        expect_type(&raw, "function_call_output")?;
        let output = raw
            .get("output")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        Ok(Self { agent, raw, output })
    }

    pub fn call_id(&self) -> &str {
        self.raw.get("call_id").and_then(Value::as_str).unwrap_or("")
    }
}

/// A transfer of control from one agent to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffItem {
    pub agent: AgentId,
    pub raw: Value,
    pub source_agent: AgentId,
    pub target_agent: AgentId,
}

impl HandoffItem {
    pub fn new(
        agent: AgentId,
        raw: Value,
        source_agent: AgentId,
        target_agent: AgentId,
    ) -> ProviderResult<Self> {
        // Handoffs are recorded from whatever input item carried them, so
        // only the presence of a discriminator is required.
        if raw.get("type").and_then(Value::as_str).is_none() {
            return Err(ProviderError::model(
                "handoff payload is missing a type discriminator",
            ));
        }
        Ok(Self {
            agent,
            raw,
            source_agent,
            target_agent,
        })
    }
}

/// An internal reasoning step reported by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningItem {
    pub agent: AgentId,
    pub raw: Value,
}

impl ReasoningItem {
    pub fn new(agent: AgentId, raw: Value) -> ProviderResult<Self> {
        expect_type(&raw, "reasoning")?;
        Ok(Self { agent, raw })
    }
}

/// One canonical unit of a finalized response's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunItem {
    Message(MessageOutputItem),
    ToolCall(ToolCallItem),
    ToolCallOutput(ToolCallOutputItem),
    Handoff(HandoffItem),
    Reasoning(ReasoningItem),
}

impl RunItem {
    /// Stable discriminator used for serialization and pattern matching
    /// downstream.
    pub fn type_name(&self) -> &'static str {
        match self {
            RunItem::Message(_) => "message_output_item",
            RunItem::ToolCall(_) => "tool_call_item",
            RunItem::ToolCallOutput(_) => "tool_call_output_item",
            RunItem::Handoff(_) => "handoff_item",
            RunItem::Reasoning(_) => "reasoning_item",
        }
    }

    pub fn agent(&self) -> &AgentId {
        match self {
            RunItem::Message(item) => &item.agent,
            RunItem::ToolCall(item) => &item.agent,
            RunItem::ToolCallOutput(item) => &item.agent,
            RunItem::Handoff(item) => &item.agent,
            RunItem::Reasoning(item) => &item.agent,
        }
    }

    pub fn raw(&self) -> &Value {
        match self {
            RunItem::Message(item) => &item.raw,
            RunItem::ToolCall(item) => &item.raw,
            RunItem::ToolCallOutput(item) => &item.raw,
            RunItem::Handoff(item) => &item.raw,
            RunItem::Reasoning(item) => &item.raw,
        }
    }

    /// Project this item back into the wire input-item shape the backend
    /// expects for the next turn. Field loss here breaks tool follow-up,
    /// so each variant copies its identifying fields explicitly.
    pub fn to_input_item(&self) -> Value {
        match self {
            RunItem::Message(item) => json!({
                "type": "message",
                "role": item.raw.get("role").cloned().unwrap_or_else(|| json!("assistant")),
                "content": item.raw.get("content").cloned().unwrap_or_else(|| json!([])),
            }),
            RunItem::ToolCall(item) => json!({
                "type": "function_call",
                "id": item.raw.get("id").cloned().unwrap_or_else(|| json!(item.call_id())),
                "call_id": item.call_id(),
                "name": item.name(),
                "arguments": item.arguments(),
            }),
            RunItem::ToolCallOutput(item) => json!({
                "type": "function_call_output",
                "call_id": item.call_id(),
                "output": item.output,
            }),
            RunItem::Handoff(item) => item.raw.clone(),
            RunItem::Reasoning(item) => item.raw.clone(),
        }
    }
}

/// A finalized response from a model: ordered output items plus usage.
///
/// Built incrementally while streaming, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub id: String,
    pub output: Vec<RunItem>,
    pub usage: Option<Usage>,
    pub model: Option<String>,
    pub created_at: Option<i64>,
    /// Correlates this response back to a conversation turn.
    pub referenceable_id: Option<String>,
}

impl ModelResponse {
    /// Project every output item into the input shape for the next turn.
    pub fn to_input_items(&self) -> Vec<Value> {
        self.output.iter().map(RunItem::to_input_item).collect()
    }
}

/// Input to a model request: a bare user string or an existing list of
/// wire input items.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Text(String),
    Items(Vec<Value>),
}

impl From<&str> for Input {
    fn from(text: &str) -> Self {
        Input::Text(text.to_string())
    }
}

impl From<String> for Input {
    fn from(text: String) -> Self {
        Input::Text(text)
    }
}

impl From<Vec<Value>> for Input {
    fn from(items: Vec<Value>) -> Self {
        Input::Items(items)
    }
}

/// Normalize input into a fresh list of wire input items. The result never
/// aliases a list passed in.
pub fn input_to_new_input_list(input: &Input) -> Vec<Value> {
    match input {
        Input::Text(text) => vec![json!({
            "type": "message",
            "role": "user",
            "content": text,
        })],
        Input::Items(items) => items.clone(),
    }
}

fn block_text(block: &Value) -> Option<&str> {
    match block.get("type").and_then(Value::as_str) {
        Some("output_text") => block.get("text").and_then(Value::as_str),
        _ => None,
    }
}

/// The last text content block of a message payload, or `None` when the
/// last block is a refusal or the content list is empty.
pub fn extract_last_text(message: &Value) -> Option<String> {
    let last = message.get("content")?.as_array()?.last()?;
    block_text(last).map(str::to_string)
}

/// Like `extract_last_text`, but a refusal is still reported as content.
/// Bare-string content passes through; empty content yields `""`.
pub fn extract_last_content(message: &Value) -> String {
    let Some(content) = message.get("content") else {
        return String::new();
    };
    if let Some(text) = content.as_str() {
        return text.to_string();
    }
    let Some(last) = content.as_array().and_then(|blocks| blocks.last()) else {
        return String::new();
    };
    match last.get("type").and_then(Value::as_str) {
        Some("output_text") => last
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        Some("refusal") => last
            .get("refusal")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        _ => String::new(),
    }
}

/// Space-join of all text blocks in one message item.
pub fn text_message_output(item: &MessageOutputItem) -> String {
    let texts: Vec<&str> = item
        .raw
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| blocks.iter().filter_map(block_text).collect())
        .unwrap_or_default();
    texts.join(" ")
}

/// Space-join of the text of every message item in a sequence. Empty input
/// yields an empty string.
pub fn text_message_outputs(items: &[RunItem]) -> String {
    let texts: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
            RunItem::Message(message) => Some(text_message_output(message)),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect();
    texts.join(" ")
}

/// Strip thinking markers from response text. Each marker-delimited
/// segment surfaces as its own line in source order; text with no markers
/// passes through unchanged.
pub fn format_content(content: &str) -> String {
    if !content.contains(THINK_START) {
        return content.to_string();
    }
    let pattern = format!(
        "(?s){}(.*?){}",
        regex::escape(THINK_START),
        regex::escape(THINK_END)
    );
    let re = Regex::new(&pattern).unwrap();
    let segments: Vec<&str> = re
        .captures_iter(content)
        .filter_map(|captures| captures.get(1).map(|m| m.as_str()))
        .collect();
    if segments.is_empty() {
        // unterminated marker: strip the tokens, keep the text
        return content.replace(THINK_START, "").replace(THINK_END, "");
    }
    segments.join("\n")
}

/// Build the `function_call_output` wire item for a completed tool call.
pub fn tool_call_output_item(tool_call: &Value, output: &str) -> Value {
    json!({
        "type": "function_call_output",
        "call_id": tool_call.get("call_id").cloned().unwrap_or_else(|| json!("")),
        "output": output,
    })
}
