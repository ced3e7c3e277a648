//! HTTP API backend.

use crate::backend::BackendAdapter;
use crate::config::HttpConfig;
use crate::error::{AdapterError, Result};
use crate::spec::{Parameters, ToolSpec, stringify_value};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use tokio::sync::Mutex;

/// Adapter for HTTP API backends.
///
/// Owns one lazily-created `reqwest::Client` bound to the configured base
/// URL, timeout, and default headers. The client is the session resource:
/// `start` opens it, `stop` drops it, and `execute_tool` reopens it on
/// demand after a `stop`.
pub struct HttpAdapter {
    config: HttpConfig,
    client: Mutex<Option<reqwest::Client>>,
}

impl HttpAdapter {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    /// Whether the session is currently open.
    pub async fn is_open(&self) -> bool {
        self.client.lock().await.is_some()
    }

    /// Return the open session, creating it first if necessary.
    async fn session(&self) -> Result<reqwest::Client> {
        let mut guard = self.client.lock().await;
        match guard.as_ref() {
            Some(client) => Ok(client.clone()),
            None => {
                let client = self.build_client()?;
                *guard = Some(client.clone());
                tracing::info!(base_url = %self.config.base_url, "HTTP session started");
                Ok(client)
            }
        }
    }

    fn build_client(&self) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|error| {
                AdapterError::Startup(format!("invalid header name '{name}': {error}"))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|error| {
                AdapterError::Startup(format!("invalid header value for '{name}': {error}"))
            })?;
            headers.insert(header_name, header_value);
        }

        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout))
            .default_headers(headers)
            .build()
            .map_err(|error| AdapterError::Startup(error.to_string()))
    }

    /// Perform one request. GET/DELETE carry the parameters as query pairs,
    /// POST/PUT as a JSON body.
    async fn request(&self, tool: &ToolSpec, parameters: &Parameters) -> Result<String> {
        let client = self.session().await?;

        let endpoint = tool.endpoint.as_deref().unwrap_or("/");
        let method = tool.method.as_deref().unwrap_or("GET").to_uppercase();
        let url = format!("{}{}", self.config.base_url, endpoint);

        let request = match method.as_str() {
            "GET" => client.get(&url).query(&query_pairs(parameters)),
            "DELETE" => client.delete(&url).query(&query_pairs(parameters)),
            "POST" => client.post(&url).json(parameters),
            "PUT" => client.put(&url).json(parameters),
            _ => return Err(AdapterError::Protocol(method)),
        };

        let response = request
            .send()
            .await
            .map_err(|error| AdapterError::Transport(error.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| AdapterError::Transport(error.to_string()))?;

        if status.as_u16() >= 400 {
            return Ok(format!("HTTP Error {}: {body}", status.as_u16()));
        }
        Ok(body)
    }
}

#[async_trait]
impl BackendAdapter for HttpAdapter {
    fn kind(&self) -> &'static str {
        "http"
    }

    /// Open the HTTP session. Only the first call has effect.
    async fn start(&self) -> Result<()> {
        self.session().await?;
        Ok(())
    }

    /// Close the HTTP session. Later `execute_tool` calls reopen it lazily.
    async fn stop(&self) {
        let mut guard = self.client.lock().await;
        if guard.take().is_some() {
            tracing::info!(base_url = %self.config.base_url, "HTTP session closed");
        }
    }

    async fn execute_tool(&self, tool: &ToolSpec, parameters: &Parameters) -> String {
        match self.request(tool, parameters).await {
            Ok(text) => text,
            Err(AdapterError::Protocol(method)) => {
                format!("Unsupported HTTP method: {method}")
            }
            Err(AdapterError::Transport(message)) => {
                format!("HTTP request failed: {message}")
            }
            Err(AdapterError::Startup(message)) => {
                format!("HTTP request failed: {message}")
            }
            Err(error) => format!("HTTP request failed: {error}"),
        }
    }
}

/// Stringify parameter values for use as query pairs.
fn query_pairs(parameters: &Parameters) -> Vec<(String, String)> {
    parameters
        .iter()
        .map(|(name, value)| (name.clone(), stringify_value(value)))
        .collect()
}
