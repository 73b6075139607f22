//! Circuit breaker wrapper around a transport
//!
//! Closed counts consecutive failures; at the threshold the circuit opens
//! and every call short-circuits with `BreakerOpen`. Once the recovery
//! timeout elapses — evaluated lazily on the next call, no background timer —
//! exactly one probe is admitted. Probe success closes the circuit, probe
//! failure re-opens it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use quill_core::{ChatRequest, ChatResponse};
use tracing::{info, warn};

use crate::transport::{Transport, TransportError, TransportEvent};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Shedding load, calls fail immediately
    Open,
    /// Admitting a single recovery probe
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    circuit: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    transport: Box<dyn Transport>,
    threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(transport: Box<dyn Transport>, threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            transport,
            threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                circuit: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Current circuit state, with the lazy open-to-half-open promotion applied
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock().expect("breaker lock");
        match inner.circuit {
            CircuitState::Open if self.recovery_elapsed(&inner) => CircuitState::HalfOpen,
            other => other,
        }
    }

    /// Consecutive failure count, for monitoring
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().expect("breaker lock").consecutive_failures
    }

    fn recovery_elapsed(&self, inner: &BreakerInner) -> bool {
        inner
            .opened_at
            .map(|t| t.elapsed() >= self.recovery_timeout)
            .unwrap_or(true)
    }

    fn remaining(&self, inner: &BreakerInner) -> Duration {
        inner
            .opened_at
            .map(|t| self.recovery_timeout.saturating_sub(t.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    /// Decide whether this call may proceed, and whether it is the probe
    fn admit(&self) -> Result<bool, TransportError> {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.circuit {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                if self.recovery_elapsed(&inner) {
                    inner.circuit = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!("circuit half-open, admitting recovery probe");
                    Ok(true)
                } else {
                    Err(TransportError::BreakerOpen {
                        retry_in: self.remaining(&inner),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    // Only the one probe goes through while half-open.
                    Err(TransportError::BreakerOpen {
                        retry_in: Duration::ZERO,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn record_success(&self, was_probe: bool) {
        let mut inner = self.inner.lock().expect("breaker lock");
        if was_probe {
            info!("recovery probe succeeded, closing circuit");
        }
        inner.circuit = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    fn record_failure(&self, was_probe: bool) {
        let mut inner = self.inner.lock().expect("breaker lock");
        inner.probe_in_flight = false;

        if was_probe {
            warn!("recovery probe failed, re-opening circuit");
            inner.circuit = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            return;
        }

        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.threshold {
            warn!(
                failures = inner.consecutive_failures,
                "failure threshold reached, opening circuit"
            );
            inner.circuit = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

#[async_trait]
impl Transport for CircuitBreaker {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        let was_probe = self.admit()?;

        match self.transport.send(request).await {
            Ok(response) => {
                self.record_success(was_probe);
                Ok(response)
            }
            Err(err) => {
                self.record_failure(was_probe);
                Err(err)
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.transport.health_check().await
    }

    async fn stream_events(&self) -> Result<Vec<TransportEvent>, TransportError> {
        self.transport.stream_events().await
    }

    fn name(&self) -> &str {
        self.transport.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedStep, ScriptedTransport};

    fn breaker(script: Vec<ScriptedStep>, threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            Box::new(ScriptedTransport::new(script)),
            threshold,
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let cb = breaker(vec![], 3, 1000);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_consecutive_failures() {
        let cb = breaker(vec![ScriptedStep::Fail(500); 3], 3, 60_000);
        let request = ChatRequest::new("m");

        for _ in 0..3 {
            assert!(cb.send(&request).await.is_err());
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Calls while open short-circuit without reaching the transport.
        assert!(matches!(
            cb.send(&request).await,
            Err(TransportError::BreakerOpen { .. })
        ));
        assert_eq!(cb.failure_count(), 3);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(
            vec![
                ScriptedStep::Fail(500),
                ScriptedStep::Fail(500),
                ScriptedStep::Reply("ok".into()),
                ScriptedStep::Fail(500),
            ],
            3,
            60_000,
        );
        let request = ChatRequest::new("m");

        assert!(cb.send(&request).await.is_err());
        assert!(cb.send(&request).await.is_err());
        assert!(cb.send(&request).await.is_ok());
        assert_eq!(cb.failure_count(), 0);

        // One more failure does not trip a threshold of 3.
        assert!(cb.send(&request).await.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_probe_success_closes_circuit() {
        let cb = breaker(
            vec![
                ScriptedStep::Fail(500),
                ScriptedStep::Fail(500),
                ScriptedStep::Reply("recovered".into()),
            ],
            2,
            50,
        );
        let request = ChatRequest::new("m");

        assert!(cb.send(&request).await.is_err());
        assert!(cb.send(&request).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let response = cb.send(&request).await.unwrap();
        assert_eq!(response.text, "recovered");
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens_circuit() {
        let cb = breaker(
            vec![
                ScriptedStep::Fail(500),
                ScriptedStep::Fail(500),
                ScriptedStep::Fail(500),
            ],
            2,
            50,
        );
        let request = ChatRequest::new("m");

        assert!(cb.send(&request).await.is_err());
        assert!(cb.send(&request).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        // The probe is admitted and fails; the circuit re-opens.
        assert!(matches!(
            cb.send(&request).await,
            Err(TransportError::Status { .. })
        ));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_never_reaches_transport() {
        let scripted = std::sync::Arc::new(ScriptedTransport::new(vec![ScriptedStep::Fail(500); 2]));
        let cb = CircuitBreaker::new(
            Box::new(scripted.clone()),
            2,
            Duration::from_secs(60),
        );
        let request = ChatRequest::new("m");

        assert!(cb.send(&request).await.is_err());
        assert!(cb.send(&request).await.is_err());
        assert_eq!(scripted.calls(), 2);

        assert!(cb.send(&request).await.is_err());
        assert_eq!(scripted.calls(), 2, "open circuit must short-circuit");
    }
}
