use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use super::base::{Model, ModelSettings};
use super::client::ApiClient;
use super::stream::{response_lines, RawFrame, DONE_SENTINEL};
use super::utils::tools_to_responses_spec;
use crate::errors::{ProviderError, ProviderResult};
use crate::models::chunk::{ChunkChoice, ChunkDelta, StreamChunk};
use crate::models::item::{
    input_to_new_input_list, AgentId, Input, MessageOutputItem, ModelResponse, ReasoningItem,
    RunItem, ToolCallItem, ToolCallOutputItem,
};
use crate::models::usage::Usage;

/// A model speaking the responses calling convention, where output items
/// arrive already in the canonical item wire shape.
pub struct ResponsesModel {
    model: String,
    client: Arc<ApiClient>,
}

impl ResponsesModel {
    pub fn new(model: impl Into<String>, client: Arc<ApiClient>) -> Self {
        Self {
            model: model.into(),
            client,
        }
    }

    fn build_payload(
        &self,
        system: Option<&str>,
        input: &Input,
        settings: &ModelSettings,
        stream: bool,
    ) -> ProviderResult<Value> {
        let mut payload = json!({
            "model": self.model,
            "input": input_to_new_input_list(input),
        });
        let body = payload.as_object_mut().unwrap();

        if let Some(system) = system {
            body.insert("instructions".to_string(), json!(system));
        }
        if !settings.tools.is_empty() {
            body.insert(
                "tools".to_string(),
                json!(tools_to_responses_spec(&settings.tools)?),
            );
        }
        if let Some(tool_choice) = &settings.tool_choice {
            body.insert("tool_choice".to_string(), json!(tool_choice));
        }
        if let Some(temperature) = settings.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = settings.top_p {
            body.insert("top_p".to_string(), json!(top_p));
        }
        if let Some(max_tokens) = settings.max_tokens {
            body.insert("max_output_tokens".to_string(), json!(max_tokens));
        }
        if stream {
            body.insert("stream".to_string(), json!(true));
        }

        Ok(payload)
    }

    async fn post(&self, payload: &Value) -> ProviderResult<reqwest::Response> {
        let url = self.client.responses_url();
        let response = self.client.http().post(&url, payload).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::model(format!(
                "backend returned {}: {}",
                status, body
            )));
        }
        Ok(response)
    }
}

/// Map one element of a responses-mode `output` array into the taxonomy.
fn output_to_item(item: &Value, agent: &AgentId) -> ProviderResult<Option<RunItem>> {
    let run_item = match item.get("type").and_then(Value::as_str) {
        Some("message") => Some(RunItem::Message(MessageOutputItem::new(
            agent.clone(),
            item.clone(),
        )?)),
        Some("function_call") => Some(RunItem::ToolCall(ToolCallItem::new(
            agent.clone(),
            item.clone(),
        )?)),
        Some("function_call_output") => Some(RunItem::ToolCallOutput(ToolCallOutputItem::new(
            agent.clone(),
            item.clone(),
        )?)),
        Some("reasoning") => Some(RunItem::Reasoning(ReasoningItem::new(
            agent.clone(),
            item.clone(),
        )?)),
        other => {
            debug!(item_type = ?other, "skipping unrecognized output item");
            None
        }
    };
    Ok(run_item)
}

#[async_trait]
impl Model for ResponsesModel {
    async fn get_response(
        &self,
        agent: &AgentId,
        system: Option<&str>,
        input: Input,
        settings: &ModelSettings,
    ) -> ProviderResult<ModelResponse> {
        let payload = self.build_payload(system, &input, settings, false)?;
        let data = self
            .client
            .http()
            .post_json(&self.client.responses_url(), &payload)
            .await?;

        if let Some(error) = data.get("error") {
            if !error.is_null() {
                return Err(ProviderError::model(format!("backend error: {}", error)));
            }
        }

        let mut output = Vec::new();
        if let Some(items) = data.get("output").and_then(Value::as_array) {
            for item in items {
                if let Some(run_item) = output_to_item(item, agent)? {
                    output.push(run_item);
                }
            }
        }

        let id = data
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("resp_{}", Uuid::new_v4()));

        Ok(ModelResponse {
            referenceable_id: Some(id.clone()),
            id,
            output,
            usage: Some(Usage::from_responses_payload(&data)),
            model: data.get("model").and_then(Value::as_str).map(str::to_string),
            created_at: data.get("created_at").and_then(Value::as_i64),
        })
    }

    async fn stream_response(
        &self,
        _agent: &AgentId,
        system: Option<&str>,
        input: Input,
        settings: &ModelSettings,
    ) -> ProviderResult<BoxStream<'static, ProviderResult<StreamChunk>>> {
        let payload = self.build_payload(system, &input, settings, true)?;
        let response = self.post(&payload).await?;
        let model = self.model.clone();

        // Responses-mode SSE events are translated into the canonical
        // chunk shape so both calling conventions expose one stream type.
        Ok(Box::pin(try_stream! {
            let mut frames = response_lines(response);
            while let Some(frame) = frames.next().await {
                let RawFrame::Line(line) = frame? else { continue };
                let payload = line.strip_prefix("data: ").unwrap_or(&line).trim();
                if payload.is_empty() || payload.starts_with("event:") {
                    continue;
                }
                if payload == DONE_SENTINEL {
                    break;
                }

                let event: Value = serde_json::from_str(payload).map_err(|e| {
                    ProviderError::model_with(
                        format!("failed to parse JSON from stream: {:?}", payload),
                        e,
                    )
                })?;

                match event.get("type").and_then(Value::as_str) {
                    Some("response.output_text.delta") => {
                        let delta = event
                            .get("delta")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string();
                        yield StreamChunk {
                            id: event
                                .get("item_id")
                                .and_then(Value::as_str)
                                .unwrap_or("")
                                .to_string(),
                            object: "chat.completion.chunk".to_string(),
                            created: chrono::Utc::now().timestamp(),
                            model: model.clone(),
                            choices: vec![ChunkChoice {
                                index: 0,
                                delta: ChunkDelta {
                                    content: Some(delta),
                                    ..ChunkDelta::default()
                                },
                                finish_reason: None,
                            }],
                            usage: None,
                        };
                    }
                    Some("response.completed") => {
                        let response = event.get("response").cloned().unwrap_or(Value::Null);
                        yield StreamChunk {
                            id: response
                                .get("id")
                                .and_then(Value::as_str)
                                .unwrap_or("")
                                .to_string(),
                            object: "chat.completion.chunk".to_string(),
                            created: chrono::Utc::now().timestamp(),
                            model: model.clone(),
                            choices: vec![ChunkChoice {
                                index: 0,
                                delta: ChunkDelta::default(),
                                finish_reason: Some("stop".to_string()),
                            }],
                            usage: response.get("usage").cloned(),
                        };
                        break;
                    }
                    other => {
                        debug!(event_type = ?other, "skipping unrecognized stream event");
                    }
                }
            }
        }))
    }
}
