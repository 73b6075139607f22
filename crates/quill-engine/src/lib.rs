//! # quill-engine
//!
//! Job orchestration and chunked-continuation engine for Quill.
//!
//! This crate provides:
//! - Per-job persistence: an atomic snapshot plus an append-only event log
//! - Recovery: rebuilding the resume point from the event log
//! - A pure state transition function driving the engine control loop
//! - The engine itself: seed, anchored continuation, micro-extend passes,
//!   repetition guard, checkpointing, cooperative control handling
//! - The job registry holding per-job control channels
//! - A service facade: submit / control / query / list / fork / run

mod control;
mod engine;
mod prompt;
mod recovery;
mod registry;
mod service;
mod state_machine;
mod store;

pub use control::{ControlGate, GateOutcome};
pub use engine::JobEngine;
pub use recovery::{resume_point, ResumePoint};
pub use registry::JobRegistry;
pub use service::JobService;
pub use state_machine::{step, EngineAction, EngineEvent, EngineState, StopCondition};
pub use store::JobStore;
