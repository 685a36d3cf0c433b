use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{json, Value};

use crate::errors::ProviderResult;
use crate::models::chunk::StreamChunk;
use crate::models::item::{AgentId, Input, ModelResponse};

/// A tool the model may call, in the internal shape. Projections into the
/// two backend calling conventions live on this type.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Chat-completions tool spec: nested under a `function` key.
    pub fn to_chat_spec(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }

    /// Responses-mode tool spec: flat.
    pub fn to_responses_spec(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

/// Per-request generation settings. All optional; `Default` sends nothing.
#[derive(Debug, Clone, Default)]
pub struct ModelSettings {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tool_choice: Option<String>,
    pub parallel_tool_calls: Option<bool>,
    pub tools: Vec<ToolDefinition>,
}

/// A model bound to one backend calling convention.
///
/// `agent` is the identifier stamped onto every item of the response so
/// the runtime can attribute output without the item owning the agent.
#[async_trait]
pub trait Model: Send + Sync {
    /// Request a completion and return the finalized response.
    async fn get_response(
        &self,
        agent: &AgentId,
        system: Option<&str>,
        input: Input,
        settings: &ModelSettings,
    ) -> ProviderResult<ModelResponse>;

    /// Request a streamed completion. The returned stream is lazy and
    /// single-pass; dropping it abandons the request.
    async fn stream_response(
        &self,
        agent: &AgentId,
        system: Option<&str>,
        input: Input,
        settings: &ModelSettings,
    ) -> ProviderResult<BoxStream<'static, ProviderResult<StreamChunk>>>;
}
