//! Validation webhook client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    Status(u16),
}

pub type Result<T> = std::result::Result<T, WebhookError>;

#[derive(Debug, Clone, Serialize)]
pub struct WebhookRequest<'a> {
    pub linked_id: &'a str,
    pub raw_text: &'a str,
    pub rut: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookResponse {
    pub accepted: bool,
    pub rut: Option<String>,
    pub reason: Option<String>,
}

#[async_trait]
pub trait RutWebhookClient: Send + Sync {
    async fn validate(&self, request: WebhookRequest<'_>) -> Result<WebhookResponse>;
}

pub struct HttpRutWebhookClient {
    url: String,
    http: reqwest::Client,
}

impl HttpRutWebhookClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RutWebhookClient for HttpRutWebhookClient {
    async fn validate(&self, request: WebhookRequest<'_>) -> Result<WebhookResponse> {
        let resp = self.http.post(&self.url).json(&request).send().await?;
        if !resp.status().is_success() {
            return Err(WebhookError::Status(resp.status().as_u16()));
        }
        Ok(resp.json().await?)
    }
}

/// Fixed-answer fake for tests; records every request it received.
#[derive(Default)]
pub struct InMemoryRutWebhookClient {
    pub calls: std::sync::Mutex<Vec<String>>,
    pub response: WebhookResponse,
}

impl InMemoryRutWebhookClient {
    pub fn accepting(rut: &str) -> Self {
        Self {
            calls: std::sync::Mutex::new(Vec::new()),
            response: WebhookResponse {
                accepted: true,
                rut: Some(rut.to_string()),
                reason: None,
            },
        }
    }

    pub fn rejecting(reason: &str) -> Self {
        Self {
            calls: std::sync::Mutex::new(Vec::new()),
            response: WebhookResponse {
                accepted: false,
                rut: None,
                reason: Some(reason.to_string()),
            },
        }
    }
}

impl Default for WebhookResponse {
    fn default() -> Self {
        Self {
            accepted: false,
            rut: None,
            reason: None,
        }
    }
}

#[async_trait]
impl RutWebhookClient for InMemoryRutWebhookClient {
    async fn validate(&self, request: WebhookRequest<'_>) -> Result<WebhookResponse> {
        self.calls.lock().unwrap().push(request.raw_text.to_string());
        Ok(self.response.clone())
    }
}
