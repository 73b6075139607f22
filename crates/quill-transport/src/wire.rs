//! OpenAI-compatible chat-completions wire format
//!
//! Both the bridge process and direct remote APIs speak this subset; the
//! shared request/parse/retry logic lives here so the two HTTP transports
//! stay thin.

use std::time::Duration;

use quill_core::{ChatMessage, ChatRequest, ChatResponse, FinishReason};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::transport::TransportError;

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
}

fn parse_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        Some("error") => FinishReason::Error,
        _ => FinishReason::Stop,
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Protocol(err.to_string())
    }
}

/// POST a chat request, retrying exactly once on retriable failures after a
/// fixed backoff.
pub(crate) async fn send_chat(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    request: &ChatRequest,
    timeout: Duration,
    retry_backoff: Duration,
) -> Result<ChatResponse, TransportError> {
    let wire = WireRequest {
        model: &request.model,
        messages: &request.messages,
        stream: false,
    };

    let mut attempt = 0;
    loop {
        let result = execute(client, url, bearer, &wire, timeout).await;
        match result {
            Err(err) if err.is_retriable() && attempt == 0 => {
                warn!("retriable transport failure, retrying once: {}", err);
                tokio::time::sleep(retry_backoff).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

async fn execute(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    wire: &WireRequest<'_>,
    timeout: Duration,
) -> Result<ChatResponse, TransportError> {
    let mut builder = client.post(url).json(wire);
    if let Some(token) = bearer {
        builder = builder.bearer_auth(token);
    }

    let response = builder.send().await.map_err(|e| classify(e, timeout))?;
    let status = response.status();

    if !status.is_success() {
        let detail = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(300)
            .collect();
        return Err(TransportError::Status {
            status: status.as_u16(),
            detail,
        });
    }

    let parsed: WireResponse = response
        .json()
        .await
        .map_err(|e| TransportError::Protocol(format!("invalid response body: {}", e)))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::Protocol("response carried no choices".to_string()))?;

    debug!(
        chars = choice.message.content.len(),
        finish = ?choice.finish_reason,
        "chat response received"
    );

    Ok(ChatResponse {
        text: choice.message.content,
        finish_reason: parse_finish_reason(choice.finish_reason.as_deref()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(parse_finish_reason(Some("stop")), FinishReason::Stop);
        assert_eq!(parse_finish_reason(Some("length")), FinishReason::Length);
        assert_eq!(
            parse_finish_reason(Some("content_filter")),
            FinishReason::ContentFilter
        );
        assert_eq!(parse_finish_reason(Some("error")), FinishReason::Error);
        assert_eq!(parse_finish_reason(None), FinishReason::Stop);
        assert_eq!(parse_finish_reason(Some("unknown")), FinishReason::Stop);
    }

    #[test]
    fn test_wire_response_parses() {
        let body = r#"{
            "id": "resp-1",
            "choices": [{
                "message": {"role": "assistant", "content": "generated text"},
                "finish_reason": "stop"
            }]
        }"#;
        let parsed: WireResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content, "generated text");
    }

    #[test]
    fn test_wire_request_shape() {
        let request = ChatRequest::new("model-x")
            .with_message(ChatMessage::system("sys"))
            .with_message(ChatMessage::user("go"));
        let wire = WireRequest {
            model: &request.model,
            messages: &request.messages,
            stream: false,
        };
        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains(r#""model":"model-x""#));
        assert!(json.contains(r#""role":"system""#));
        assert!(json.contains(r#""stream":false"#));
    }
}
