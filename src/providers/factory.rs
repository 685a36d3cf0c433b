use std::sync::Arc;

use tokio::sync::OnceCell;

use super::base::Model;
use super::chat::ChatCompletionsModel;
use super::client::{ApiClient, Credentials};
use super::responses::ResponsesModel;
use crate::errors::{ProviderError, ProviderResult};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Which calling convention new models target when the config is silent.
const USE_RESPONSES_BY_DEFAULT: bool = false;

/// Provider configuration as handed down by the configuration layer.
/// Either explicit credentials or a pre-built client, never both.
#[derive(Clone, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub use_responses: Option<bool>,
    pub client: Option<Arc<ApiClient>>,
}

impl ProviderConfig {
    fn has_credentials(&self) -> bool {
        self.api_key.is_some()
            || self.base_url.is_some()
            || self.organization.is_some()
            || self.project.is_some()
    }
}

/// Hands out `Model` instances for one backend, building the underlying
/// client on first use so that missing credentials only surface when a
/// model is actually requested.
pub struct ModelProvider {
    config: ProviderConfig,
    use_responses: bool,
    client: OnceCell<Arc<ApiClient>>,
}

impl ModelProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        if config.client.is_some() && config.has_credentials() {
            return Err(ProviderError::Config(
                "a pre-built client and explicit credentials are mutually exclusive".to_string(),
            ));
        }
        Ok(Self {
            use_responses: config.use_responses.unwrap_or(USE_RESPONSES_BY_DEFAULT),
            config,
            client: OnceCell::new(),
        })
    }

    async fn client(&self) -> ProviderResult<Arc<ApiClient>> {
        if let Some(client) = &self.config.client {
            return Ok(Arc::clone(client));
        }
        let client = self
            .client
            .get_or_try_init(|| async {
                let api_key = self.config.api_key.clone().ok_or_else(|| {
                    ProviderError::model("no API key configured for this provider")
                })?;
                let client = ApiClient::new(Credentials {
                    api_key,
                    base_url: self
                        .config
                        .base_url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                    organization: self.config.organization.clone(),
                    project: self.config.project.clone(),
                })?;
                Ok::<_, ProviderError>(Arc::new(client))
            })
            .await?;
        Ok(Arc::clone(client))
    }

    /// Build a model targeting this provider's backend. `name` falls back
    /// to [`DEFAULT_MODEL`] when not given.
    pub async fn get_model(&self, name: Option<&str>) -> ProviderResult<Box<dyn Model>> {
        let client = self.client().await?;
        let name = name.unwrap_or(DEFAULT_MODEL);
        if self.use_responses {
            Ok(Box::new(ResponsesModel::new(name, client)))
        } else {
            Ok(Box::new(ChatCompletionsModel::new(name, client)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item::{AgentId, Input};
    use crate::providers::base::ModelSettings;
    use anyhow::Result;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_client_and_credentials_conflict() {
        let client = Arc::new(
            ApiClient::new(Credentials {
                api_key: "k".to_string(),
                base_url: "http://localhost".to_string(),
                ..Credentials::default()
            })
            .unwrap(),
        );
        let result = ModelProvider::new(ProviderConfig {
            api_key: Some("k".to_string()),
            client: Some(client),
            ..ProviderConfig::default()
        });
        assert!(matches!(result, Err(ProviderError::Config(_))));
    }

    #[tokio::test]
    async fn test_missing_api_key_surfaces_on_use() -> Result<()> {
        let provider = ModelProvider::new(ProviderConfig::default())?;
        let result = provider.get_model(None).await;
        match result {
            Err(ProviderError::Model { message, .. }) => {
                assert!(message.contains("API key"), "unexpected message: {message}")
            }
            _ => panic!("expected a model error for the missing key"),
        }
        Ok(())
    }

    async fn provider_for(server: &MockServer, use_responses: Option<bool>) -> ModelProvider {
        ModelProvider::new(ProviderConfig {
            api_key: Some("test_api_key".to_string()),
            base_url: Some(server.uri()),
            use_responses,
            ..ProviderConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_default_mode_targets_chat_completions() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cmpl_1",
                "choices": [{"message": {"role": "assistant", "content": "hi"}}],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server, None).await;
        let model = provider.get_model(Some("gpt-4o")).await?;
        model
            .get_response(
                &AgentId::new("a"),
                None,
                Input::from("hello"),
                &ModelSettings::default(),
            )
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_responses_mode_targets_responses_endpoint() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "resp_1", "output": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server, Some(true)).await;
        let model = provider.get_model(None).await?;
        model
            .get_response(
                &AgentId::new("a"),
                None,
                Input::from("hello"),
                &ModelSettings::default(),
            )
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_prebuilt_client_is_used_directly() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cmpl_1",
                "choices": [{"message": {"role": "assistant", "content": "hi"}}],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = Arc::new(ApiClient::new(Credentials {
            api_key: "k".to_string(),
            base_url: server.uri(),
            ..Credentials::default()
        })?);
        let provider = ModelProvider::new(ProviderConfig {
            client: Some(client),
            ..ProviderConfig::default()
        })?;
        let model = provider.get_model(None).await?;
        model
            .get_response(
                &AgentId::new("a"),
                None,
                Input::from("hello"),
                &ModelSettings::default(),
            )
            .await?;
        Ok(())
    }
}
