//! Transport for the local bridge process
//!
//! The bridge is a separate process that holds a live session against the
//! third-party chat surface and exposes a chat-completions endpoint plus a
//! `/health` route reporting whether its websocket side is attached. We only
//! ever talk to that HTTP surface.

use std::time::Duration;

use async_trait::async_trait;
use quill_core::{ChatRequest, ChatResponse, TransportConfig};
use serde::Deserialize;
use tracing::debug;

use crate::transport::{Transport, TransportError};
use crate::wire;

pub struct BridgeTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry_backoff: Duration,
}

#[derive(Debug, Deserialize)]
struct BridgeHealth {
    #[serde(default)]
    ws_connected: bool,
}

impl BridgeTransport {
    pub fn new(config: &TransportConfig) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            client,
            base_url: config.bridge_url.trim_end_matches('/').to_string(),
            timeout,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    fn health_url(&self) -> String {
        // The bridge serves /health beside the versioned API root.
        format!("{}/health", self.base_url.trim_end_matches("/v1"))
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        let url = format!("{}/chat/completions", self.base_url);
        wire::send_chat(
            &self.client,
            &url,
            None,
            request,
            self.timeout,
            self.retry_backoff,
        )
        .await
    }

    async fn health_check(&self) -> bool {
        let url = self.health_url();
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<BridgeHealth>().await {
                    Ok(health) => health.ws_connected,
                    Err(_) => false,
                }
            }
            Ok(response) => {
                debug!("bridge health returned {}", response.status());
                false
            }
            Err(err) => {
                debug!("bridge unreachable: {}", err);
                false
            }
        }
    }

    fn name(&self) -> &str {
        "bridge"
    }
}
