//! Transport for a direct remote chat-completions API

use std::time::Duration;

use async_trait::async_trait;
use quill_core::{ChatRequest, ChatResponse, TransportConfig};
use tracing::debug;

use crate::transport::{Transport, TransportError};
use crate::wire;

pub struct DirectTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    /// Model substituted when a request carries the `default` selector
    default_model: String,
    timeout: Duration,
    retry_backoff: Duration,
}

impl DirectTransport {
    pub fn new(config: &TransportConfig, api_key: String, default_model: &str) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.to_string(),
            timeout,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

#[async_trait]
impl Transport for DirectTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        let url = format!("{}/chat/completions", self.base_url);

        // Jobs that never picked a model inherit the transport default.
        let resolved;
        let request = if request.model == "default" && self.default_model != "default" {
            resolved = ChatRequest {
                messages: request.messages.clone(),
                model: self.default_model.clone(),
            };
            &resolved
        } else {
            request
        };

        wire::send_chat(
            &self.client,
            &url,
            Some(&self.api_key),
            request,
            self.timeout,
            self.retry_backoff,
        )
        .await
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        match self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!("direct API unreachable: {}", err);
                false
            }
        }
    }

    fn name(&self) -> &str {
        "direct"
    }
}
