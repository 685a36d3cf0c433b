use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response};
use serde_json::Value;
use tracing::warn;

use crate::errors::{ProviderError, ProviderResult};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_MAX_KEEPALIVE_CONNECTIONS: usize = 5;
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Connection configuration for the transport. Every field is
/// independently overridable.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_keepalive_connections: usize,
    /// Upper bound on total connections. reqwest's pool only caps idle
    /// connections per host, so this is carried as configuration surface
    /// and not enforced by the pool.
    pub max_connections: usize,
    pub max_retries: u32,
    pub verify: bool,
    /// Allow HTTP/2. h2 is negotiated via ALPN when the server offers it,
    /// never forced; `false` pins the client to HTTP/1.1.
    pub http2: bool,
    pub default_headers: HeaderMap,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_keepalive_connections: DEFAULT_MAX_KEEPALIVE_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_retries: DEFAULT_MAX_RETRIES,
            verify: true,
            http2: false,
            default_headers: HeaderMap::new(),
        }
    }
}

/// HTTP execution primitive with pooled connections and an
/// exponential-backoff retry loop around transient failures.
///
/// Holds no request-scoped state: the only thing shared across requests is
/// the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> ProviderResult<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .pool_max_idle_per_host(config.max_keepalive_connections)
            .default_headers(config.default_headers.clone());

        if !config.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if !config.http2 {
            builder = builder.http1_only();
        }

        let client = builder
            .build()
            .map_err(|e| ProviderError::network_with("failed to build HTTP client", e))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Execute a request, retrying transient failures with exponential
    /// backoff. A successfully received HTTP response is returned as-is,
    /// whatever its status; status-code policy belongs to the caller.
    ///
    /// Attempts are strictly sequential: each retry waits for the backoff
    /// delay of the failed attempt before the next send.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        json: Option<&Value>,
    ) -> ProviderResult<Response> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut request = self.client.request(method.clone(), url);
            if let Some(body) = json {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(err) if is_transient(&err) && attempt < self.config.max_retries => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "transient request failure, retrying",
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(ProviderError::network_with(
                        format!("{} {} failed after {} attempt(s)", method, url, attempt),
                        err,
                    ));
                }
            }
        }
    }

    pub async fn get(&self, url: &str) -> ProviderResult<Response> {
        self.request(Method::GET, url, None).await
    }

    pub async fn post(&self, url: &str, json: &Value) -> ProviderResult<Response> {
        self.request(Method::POST, url, Some(json)).await
    }

    /// POST and decode the JSON response body. A non-success status or an
    /// undecodable body is a model-level failure, not a transport one, so
    /// neither is ever retried.
    pub async fn post_json(&self, url: &str, json: &Value) -> ProviderResult<Value> {
        let response = self.post(url, json).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::model(format!(
                "backend returned {}: {}",
                status, body
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::model_with("failed to decode response body", e))
    }

    pub async fn put(&self, url: &str, json: Option<&Value>) -> ProviderResult<Response> {
        self.request(Method::PUT, url, json).await
    }

    pub async fn delete(&self, url: &str) -> ProviderResult<Response> {
        self.request(Method::DELETE, url, None).await
    }
}

/// Delay before retry `n` (1-indexed): 2^(n-1) + 0.1 * n seconds.
pub(crate) fn backoff_delay(n: u32) -> Duration {
    Duration::from_secs_f64(2f64.powi(n as i32 - 1) + 0.1 * f64::from(n))
}

/// Connection-establishment and read-level failures are retried; anything
/// that produced an HTTP response, or a request we built wrong, is not.
fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || (err.is_request() && !err.is_builder())
}
