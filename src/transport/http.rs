use crate::transport::classify::{class_for_status, remote_status_class};
use crate::{Error, Result};
use reqwest::{Method, Proxy, RequestBuilder};
use serde_json::Value;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Bearer-token JSON REST client shared by the provider adapters.
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    provider: String,
    base_url: String,
    token: Option<String>,
}

impl RestClient {
    pub fn new(provider: &str, base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        // Minimal production-friendly defaults (env-overridable).
        let timeout_secs = env::var("A2ML_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .user_agent(concat!("a2ml/", env!("CARGO_PKG_VERSION")));

        if let Ok(proxy_url) = env::var("A2ML_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            provider: provider.to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Absolute URLs pass through; anything else is joined onto the base URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self.client.request(method, self.url(path));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        self.execute(self.request(Method::GET, path), path).await
    }

    pub async fn get_query(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.execute(self.request(Method::GET, path).query(query), path)
            .await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.execute(self.request(Method::POST, path).json(body), path)
            .await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        self.execute(self.request(Method::PUT, path).json(body), path)
            .await
    }

    pub async fn patch(&self, path: &str, query: &[(&str, &str)], body: &Value) -> Result<Value> {
        self.execute(
            self.request(Method::PATCH, path).query(query).json(body),
            path,
        )
        .await
    }

    pub async fn post_multipart(&self, path: &str, form: reqwest::multipart::Form) -> Result<Value> {
        self.execute(self.request(Method::POST, path).multipart(form), path)
            .await
    }

    /// Stream a binary resource to `dest`.
    pub async fn download(&self, path: &str, dest: &Path) -> Result<u64> {
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.remote_error(status, path, &body));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn execute(&self, request: RequestBuilder, path: &str) -> Result<Value> {
        let start = std::time::Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;

        tracing::debug!(
            provider = self.provider.as_str(),
            http_status = status,
            path,
            duration_ms = start.elapsed().as_millis() as u64,
            "request completed"
        );

        if !(200..300).contains(&status) {
            return Err(self.remote_error(status, path, &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn remote_error(&self, status: u16, path: &str, body: &str) -> Error {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .and_then(extract_message)
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("HTTP {} from {}", status, path)
                } else {
                    body.trim().to_string()
                }
            });

        if status == 401 {
            return Error::authentication(self.provider.clone(), message);
        }

        let class = parsed
            .as_ref()
            .and_then(|v| v.pointer("/error/status"))
            .and_then(|v| v.as_str())
            .and_then(remote_status_class)
            .unwrap_or_else(|| class_for_status(status));

        Error::RemoteService {
            status: Some(status),
            class: class.to_string(),
            message,
            already_satisfied: false,
        }
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn extract_message(body: &Value) -> Option<String> {
    ["/error/message", "/error", "/message", "/data/message"]
        .iter()
        .filter_map(|p| body.pointer(p))
        .find_map(|v| v.as_str().map(str::to_string))
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}
