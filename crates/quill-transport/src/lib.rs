//! # quill-transport
//!
//! Transport backends for the Quill generation engine.
//!
//! A [`Transport`] turns a role-tagged chat request into generated text over
//! some backend: the local bridge process, a direct remote API, or a
//! scripted offline shim for tests and demos. Retriable failures (connect,
//! timeout, 5xx) get exactly one transport-side retry with a short fixed
//! backoff; everything else propagates to the caller.
//!
//! [`CircuitBreaker`] wraps any transport and sheds load after repeated
//! failures, probing recovery after a cool-down.

mod breaker;
mod bridge;
mod direct;
mod scripted;
mod transport;
mod wire;

pub use breaker::{CircuitBreaker, CircuitState};
pub use bridge::BridgeTransport;
pub use direct::DirectTransport;
pub use scripted::{ScriptedStep, ScriptedTransport};
pub use transport::{Transport, TransportError, TransportEvent};

use quill_core::{BackendKind, QuillConfig, QuillError, Result};

/// Build the transport selected by a run spec, wrapped in a circuit breaker.
///
/// The scripted backend is only reachable here with an explicit script; jobs
/// submitted against it without one are a configuration error.
pub fn build_transport(
    backend: BackendKind,
    model_hint: &str,
    config: &QuillConfig,
) -> Result<CircuitBreaker> {
    let inner: Box<dyn Transport> = match backend {
        BackendKind::Bridge => Box::new(BridgeTransport::new(&config.transport)),
        BackendKind::Direct => {
            let api_key = std::env::var(&config.transport.api_key_env).map_err(|_| {
                QuillError::Config(format!(
                    "direct backend requires {} to be set",
                    config.transport.api_key_env
                ))
            })?;
            Box::new(DirectTransport::new(&config.transport, api_key, model_hint))
        }
        BackendKind::Scripted => {
            return Err(QuillError::Config(
                "scripted backend requires an explicit script".to_string(),
            ))
        }
    };

    Ok(CircuitBreaker::new(
        inner,
        config.breaker.failure_threshold,
        std::time::Duration::from_secs(config.breaker.recovery_timeout_secs),
    ))
}
