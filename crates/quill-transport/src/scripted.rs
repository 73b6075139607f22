//! Scripted offline transport for tests and demos
//!
//! Plays back a fixed sequence of replies and injected failures, recording
//! every request it sees. Once the script is exhausted it keeps producing
//! terminal continuations so a run always finishes.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use quill_core::{ChatRequest, ChatResponse, FinishReason};

use crate::transport::{Transport, TransportError};

/// One step of a scripted conversation
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    /// Respond with this text
    Reply(String),
    /// Fail with an upstream status code
    Fail(u16),
    /// Fail with a connection error
    ConnectError,
}

pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedStep>>,
    requests: Mutex<Vec<ChatRequest>>,
    healthy: bool,
}

impl ScriptedTransport {
    pub fn new(script: Vec<ScriptedStep>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            healthy: true,
        }
    }

    /// Convenience constructor from plain reply texts
    pub fn from_replies<S: Into<String>>(replies: Vec<S>) -> Self {
        Self::new(
            replies
                .into_iter()
                .map(|r| ScriptedStep::Reply(r.into()))
                .collect(),
        )
    }

    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// Every request seen so far, in order
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Number of send calls so far
    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        let call = {
            let mut requests = self.requests.lock().expect("requests lock");
            requests.push(request.clone());
            requests.len()
        };

        let step = self.script.lock().expect("script lock").pop_front();
        match step {
            Some(ScriptedStep::Reply(text)) => Ok(ChatResponse {
                text,
                finish_reason: FinishReason::Stop,
            }),
            Some(ScriptedStep::Fail(status)) => Err(TransportError::Status {
                status,
                detail: "scripted failure".to_string(),
            }),
            Some(ScriptedStep::ConnectError) => Err(TransportError::Connect(
                "scripted connection error".to_string(),
            )),
            None => Ok(ChatResponse {
                text: format!("Offline continuation {}.\nNEXT: [END]", call),
                finish_reason: FinishReason::Stop,
            }),
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plays_script_in_order() {
        let transport = ScriptedTransport::new(vec![
            ScriptedStep::Reply("first".into()),
            ScriptedStep::Fail(500),
            ScriptedStep::Reply("second".into()),
        ]);
        let request = ChatRequest::new("m");

        assert_eq!(transport.send(&request).await.unwrap().text, "first");
        assert!(matches!(
            transport.send(&request).await,
            Err(TransportError::Status { status: 500, .. })
        ));
        assert_eq!(transport.send(&request).await.unwrap().text, "second");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_script_terminates() {
        let transport = ScriptedTransport::from_replies(Vec::<String>::new());
        let response = transport.send(&ChatRequest::new("m")).await.unwrap();
        assert!(response.text.contains("NEXT: [END]"));
    }

    #[tokio::test]
    async fn test_records_requests() {
        let transport = ScriptedTransport::from_replies(vec!["ok"]);
        let request = ChatRequest::new("m").with_message(quill_core::ChatMessage::user("hello"));
        transport.send(&request).await.unwrap();
        assert_eq!(transport.requests()[0].messages[0].content, "hello");
    }
}
