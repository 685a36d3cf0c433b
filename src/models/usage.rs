use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token and request counters for model API usage.
///
/// Immutable: `add` produces a new value, never mutates in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(requests: u64, input_tokens: u64, output_tokens: u64, total_tokens: u64) -> Self {
        Self {
            requests,
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Merge two usage ledgers. Commutative and associative, with the
    /// default (all-zero) value as identity.
    pub fn add(&self, other: &Usage) -> Usage {
        Usage {
            requests: self.requests + other.requests,
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }

    /// Read usage out of a chat-completions response body, counting one
    /// request. The total is computed when the backend omits it.
    pub fn from_chat_payload(data: &Value) -> Usage {
        let usage = data.get("usage").cloned().unwrap_or(Value::Null);

        let input_tokens = usage
            .get("prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let output_tokens = usage
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let total_tokens = usage
            .get("total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(input_tokens + output_tokens);

        Usage::new(1, input_tokens, output_tokens, total_tokens)
    }

    /// Read usage out of a responses-mode response body.
    pub fn from_responses_payload(data: &Value) -> Usage {
        let usage = data.get("usage").cloned().unwrap_or(Value::Null);

        let input_tokens = usage
            .get("input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let output_tokens = usage
            .get("output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let total_tokens = usage
            .get("total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(input_tokens + output_tokens);

        Usage::new(1, input_tokens, output_tokens, total_tokens)
    }
}
