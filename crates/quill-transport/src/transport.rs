//! Transport contract shared by every backend

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quill_core::{ChatRequest, ChatResponse};
use thiserror::Error;

/// Failure classes surfaced by a transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connect(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream returned status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("circuit breaker is open; retry in {retry_in:?}")]
    BreakerOpen { retry_in: Duration },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Connect errors, timeouts, and 5xx responses are worth one retry
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// An event pushed by a backend that supports streaming
#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Uniform send/health/event interface over an arbitrary backend
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one chat request and return the generated text
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError>;

    /// Whether the backend is reachable and ready; never errors
    async fn health_check(&self) -> bool;

    /// Drain pushed events, for backends with a push capability
    async fn stream_events(&self) -> Result<Vec<TransportEvent>, TransportError> {
        Ok(Vec::new())
    }

    /// Short backend name for logs
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        (**self).send(request).await
    }

    async fn health_check(&self) -> bool {
        (**self).health_check().await
    }

    async fn stream_events(&self) -> Result<Vec<TransportEvent>, TransportError> {
        (**self).stream_events().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classes() {
        assert!(TransportError::Connect("refused".into()).is_retriable());
        assert!(TransportError::Timeout(Duration::from_secs(60)).is_retriable());
        assert!(TransportError::Status {
            status: 502,
            detail: "bad gateway".into()
        }
        .is_retriable());

        assert!(!TransportError::Status {
            status: 401,
            detail: "unauthorized".into()
        }
        .is_retriable());
        assert!(!TransportError::Protocol("garbled".into()).is_retriable());
        assert!(!TransportError::BreakerOpen {
            retry_in: Duration::from_secs(10)
        }
        .is_retriable());
    }
}
