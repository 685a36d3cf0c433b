use reqwest::header::{HeaderValue, AUTHORIZATION};

use crate::errors::{ProviderError, ProviderResult};
use crate::network::http::{HttpClient, HttpConfig};

/// Connection credentials for an OpenAI-compatible backend. Supplied by
/// the configuration layer; this crate never reads the environment.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: String,
    pub base_url: String,
    pub organization: Option<String>,
    pub project: Option<String>,
}

/// An authenticated client for one backend: the resilient transport plus
/// the base URL. Credentials are installed as sensitive default headers
/// and never logged.
#[derive(Debug)]
pub struct ApiClient {
    http: HttpClient,
    base_url: String,
}

impl ApiClient {
    pub fn new(credentials: Credentials) -> ProviderResult<Self> {
        Self::with_config(credentials, HttpConfig::default())
    }

    pub fn with_config(credentials: Credentials, mut config: HttpConfig) -> ProviderResult<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", credentials.api_key))
            .map_err(|_| {
                ProviderError::Config("API key contains invalid header characters".to_string())
            })?;
        auth.set_sensitive(true);
        config.default_headers.insert(AUTHORIZATION, auth);

        if let Some(organization) = &credentials.organization {
            config.default_headers.insert(
                "OpenAI-Organization",
                HeaderValue::from_str(organization).map_err(|_| {
                    ProviderError::Config("organization contains invalid header characters".to_string())
                })?,
            );
        }
        if let Some(project) = &credentials.project {
            config.default_headers.insert(
                "OpenAI-Project",
                HeaderValue::from_str(project).map_err(|_| {
                    ProviderError::Config("project contains invalid header characters".to_string())
                })?,
            );
        }

        Ok(Self {
            http: HttpClient::new(config)?,
            base_url: credentials.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    pub fn responses_url(&self) -> String {
        format!("{}/responses", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_url_joining_trims_trailing_slash() -> Result<()> {
        let client = ApiClient::new(Credentials {
            api_key: "test_key".to_string(),
            base_url: "http://localhost:8080/v1/".to_string(),
            ..Credentials::default()
        })?;
        assert_eq!(
            client.chat_completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(client.responses_url(), "http://localhost:8080/v1/responses");
        Ok(())
    }

    #[test]
    fn test_invalid_key_is_a_config_error() {
        let err = ApiClient::new(Credentials {
            api_key: "bad\nkey".to_string(),
            base_url: "http://localhost".to_string(),
            ..Credentials::default()
        })
        .unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}
