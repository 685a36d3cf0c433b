use regex::Regex;
use serde_json::{json, Value};

use super::base::ToolDefinition;
use crate::errors::{ProviderError, ProviderResult};
use crate::models::item::{AgentId, MessageOutputItem, RunItem, ToolCallItem};

/// Convert canonical input items into chat-completions message specs.
pub fn input_items_to_chat_messages(items: &[Value]) -> Vec<Value> {
    let mut messages = Vec::new();

    for item in items {
        match item.get("type").and_then(Value::as_str) {
            Some("function_call") => {
                let name = item.get("name").and_then(Value::as_str).unwrap_or("");
                messages.push(json!({
                    "role": "assistant",
                    "content": Value::Null,
                    "tool_calls": [{
                        "id": item.get("call_id").cloned().unwrap_or_else(|| json!("")),
                        "type": "function",
                        "function": {
                            "name": sanitize_function_name(name),
                            "arguments": item.get("arguments").cloned()
                                .unwrap_or_else(|| json!("{}")),
                        }
                    }]
                }));
            }
            Some("function_call_output") => {
                messages.push(json!({
                    "role": "tool",
                    "content": item.get("output").cloned().unwrap_or_else(|| json!("")),
                    "tool_call_id": item.get("call_id").cloned().unwrap_or_else(|| json!("")),
                }));
            }
            _ => {
                // message items, and anything message-shaped
                messages.push(json!({
                    "role": item.get("role").cloned().unwrap_or_else(|| json!("user")),
                    "content": chat_content(item.get("content")),
                }));
            }
        }
    }

    messages
}

/// Flatten input-item content into the plain text chat messages carry.
fn chat_content(content: Option<&Value>) -> Value {
    match content {
        None => json!(""),
        Some(Value::Array(blocks)) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| match block.get("type").and_then(Value::as_str) {
                    Some("output_text") => block.get("text").and_then(Value::as_str),
                    Some("refusal") => block.get("refusal").and_then(Value::as_str),
                    _ => None,
                })
                .collect();
            json!(texts.join(" "))
        }
        Some(other) => other.clone(),
    }
}

/// Convert tool definitions to the chat-completions tool spec, rejecting
/// duplicate names.
pub fn tools_to_chat_spec(tools: &[ToolDefinition]) -> ProviderResult<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(ProviderError::Config(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }
        result.push(tool.to_chat_spec());
    }

    Ok(result)
}

/// Convert tool definitions to the responses-mode flat tool spec.
pub fn tools_to_responses_spec(tools: &[ToolDefinition]) -> ProviderResult<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(ProviderError::Config(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }
        result.push(tool.to_responses_spec());
    }

    Ok(result)
}

/// Convert a chat-completions response body into canonical items: a
/// message item for text content plus one tool-call item per call.
pub fn chat_response_to_items(response: &Value, agent: &AgentId) -> ProviderResult<Vec<RunItem>> {
    let message = &response["choices"][0]["message"];
    let mut items = Vec::new();

    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            let raw = json!({
                "type": "message",
                "role": "assistant",
                "content": [{"type": "output_text", "text": text, "annotations": []}],
            });
            items.push(RunItem::Message(MessageOutputItem::new(
                agent.clone(),
                raw,
            )?));
        }
    }

    if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default();
            let name = tool_call["function"]["name"].as_str().unwrap_or_default();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default();

            if !is_valid_function_name(name) {
                return Err(ProviderError::model(format!(
                    "tool call {} has an invalid function name {:?}, it must match [a-zA-Z0-9_-]+",
                    id, name
                )));
            }

            let raw = json!({
                "type": "function_call",
                "id": id,
                "call_id": id,
                "name": name,
                "arguments": arguments,
            });
            items.push(RunItem::ToolCall(ToolCallItem::new(agent.clone(), raw)?));
        }
    }

    Ok(items)
}

pub fn sanitize_function_name(name: &str) -> String {
    let re = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    re.replace_all(name, "_").to_string()
}

pub fn is_valid_function_name(name: &str) -> bool {
    let re = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
    re.is_match(name)
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}
