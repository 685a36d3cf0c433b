use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{json, Value};
use uuid::Uuid;

use super::base::{Model, ModelSettings};
use super::client::ApiClient;
use super::stream::ChunkStream;
use super::utils::{
    chat_response_to_items, check_context_length_error, input_items_to_chat_messages,
    tools_to_chat_spec,
};
use crate::errors::{ProviderError, ProviderResult};
use crate::models::chunk::StreamChunk;
use crate::models::item::{input_to_new_input_list, AgentId, Input, ModelResponse};
use crate::models::usage::Usage;

/// A model speaking the chat-completions calling convention.
pub struct ChatCompletionsModel {
    model: String,
    client: Arc<ApiClient>,
}

impl ChatCompletionsModel {
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
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.extend(input_items_to_chat_messages(&input_to_new_input_list(input)));

        let mut payload = json!({
            "model": self.model,
            "messages": messages,
        });
        let body = payload.as_object_mut().unwrap();

        if !settings.tools.is_empty() {
            body.insert("tools".to_string(), json!(tools_to_chat_spec(&settings.tools)?));
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
            body.insert("max_tokens".to_string(), json!(max_tokens));
        }
        if let Some(parallel) = settings.parallel_tool_calls {
            body.insert("parallel_tool_calls".to_string(), json!(parallel));
        }
        if stream {
            body.insert("stream".to_string(), json!(true));
            body.insert("stream_options".to_string(), json!({"include_usage": true}));
        }

        Ok(payload)
    }

    async fn post(&self, payload: &Value) -> ProviderResult<reqwest::Response> {
        let url = self.client.chat_completions_url();
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

#[async_trait]
impl Model for ChatCompletionsModel {
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
            .post_json(&self.client.chat_completions_url(), &payload)
            .await?;

        if let Some(error) = data.get("error") {
            if !error.is_null() {
                if let Some(context_error) = check_context_length_error(error) {
                    return Err(ProviderError::model(context_error.to_string()));
                }
                return Err(ProviderError::model(format!("backend error: {}", error)));
            }
        }

        let output = chat_response_to_items(&data, agent)?;
        let usage = Usage::from_chat_payload(&data);
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("resp_{}", Uuid::new_v4()));

        Ok(ModelResponse {
            referenceable_id: Some(id.clone()),
            id,
            output,
            usage: Some(usage),
            model: data.get("model").and_then(Value::as_str).map(str::to_string),
            created_at: data.get("created").and_then(Value::as_i64),
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
        Ok(ChunkStream::from_response(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item::RunItem;
    use crate::providers::client::Credentials;
    use anyhow::Result;
    use futures::StreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(response: ResponseTemplate) -> (MockServer, ChatCompletionsModel) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test_api_key"))
            .respond_with(response)
            .mount(&server)
            .await;

        let client = ApiClient::new(Credentials {
            api_key: "test_api_key".to_string(),
            base_url: server.uri(),
            ..Credentials::default()
        })
        .unwrap();
        let model = ChatCompletionsModel::new("gpt-4o", Arc::new(client));
        (server, model)
    }

    #[tokio::test]
    async fn test_get_response_basic() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello! How can I assist you today?",
                    "tool_calls": null
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 15,
                "total_tokens": 27
            }
        });
        let (_, model) = setup(ResponseTemplate::new(200).set_body_json(response_body)).await;

        let response = model
            .get_response(
                &AgentId::new("assistant"),
                Some("You are a helpful assistant."),
                Input::from("Hello?"),
                &ModelSettings::default(),
            )
            .await?;

        assert_eq!(response.id, "chatcmpl-123");
        assert_eq!(response.model.as_deref(), Some("gpt-4o"));
        assert_eq!(response.created_at, Some(1700000000));
        assert_eq!(response.usage, Some(Usage::new(1, 12, 15, 27)));
        assert_eq!(response.output.len(), 1);
        match &response.output[0] {
            RunItem::Message(message) => {
                assert_eq!(message.text_content(), "Hello! How can I assist you today?");
                assert_eq!(message.agent, AgentId::new("assistant"));
            }
            other => panic!("expected message item, got {}", other.type_name()),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_get_response_tool_call() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-tool",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": {
                            "name": "get_weather",
                            "arguments": "{\"location\":\"San Francisco, CA\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 20, "completion_tokens": 15, "total_tokens": 35}
        });
        let (_, model) = setup(ResponseTemplate::new(200).set_body_json(response_body)).await;

        let response = model
            .get_response(
                &AgentId::new("assistant"),
                None,
                Input::from("What's the weather in San Francisco?"),
                &ModelSettings::default(),
            )
            .await?;

        match &response.output[0] {
            RunItem::ToolCall(call) => {
                assert_eq!(call.name(), "get_weather");
                assert_eq!(call.call_id(), "call_123");
                assert_eq!(call.arguments(), "{\"location\":\"San Francisco, CA\"}");
            }
            other => panic!("expected tool call item, got {}", other.type_name()),
        }

        // the projection for the next turn keeps the call fields
        let items = response.to_input_items();
        assert_eq!(items[0]["call_id"], "call_123");
        assert_eq!(items[0]["name"], "get_weather");
        Ok(())
    }

    #[tokio::test]
    async fn test_payload_includes_settings() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "temperature": 0.7,
                "top_p": 0.9,
                "max_tokens": 100,
                "messages": [{"role": "system", "content": "sys"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "c",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(Credentials {
            api_key: "k".to_string(),
            base_url: server.uri(),
            ..Credentials::default()
        })?;
        let model = ChatCompletionsModel::new("gpt-4o", Arc::new(client));
        let settings = ModelSettings {
            temperature: Some(0.7),
            top_p: Some(0.9),
            max_tokens: Some(100),
            ..ModelSettings::default()
        };
        model
            .get_response(&AgentId::new("a"), Some("sys"), Input::from("hi"), &settings)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_server_error_is_a_model_error() {
        let (_, model) = setup(ResponseTemplate::new(500)).await;
        let err = model
            .get_response(
                &AgentId::new("a"),
                None,
                Input::from("Hello?"),
                &ModelSettings::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Model { .. }));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_error_body_is_surfaced() {
        let response_body = json!({
            "error": {"code": "context_length_exceeded", "message": "too long"}
        });
        let (_, model) = setup(ResponseTemplate::new(200).set_body_json(response_body)).await;
        let err = model
            .get_response(
                &AgentId::new("a"),
                None,
                Input::from("Hello?"),
                &ModelSettings::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Context length exceeded"));
    }

    #[tokio::test]
    async fn test_stream_response() -> Result<()> {
        let body = concat!(
            "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\" world\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let (_, model) = setup(
            ResponseTemplate::new(200)
                .set_body_raw(body, "text/event-stream"),
        )
        .await;

        let mut stream = model
            .stream_response(
                &AgentId::new("a"),
                None,
                Input::from("Hello?"),
                &ModelSettings::default(),
            )
            .await?;

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(content) = &chunk.choices[0].delta.content {
                text.push_str(content);
            }
        }
        assert_eq!(text, "Hello world");
        Ok(())
    }
}
