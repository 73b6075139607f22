//! # quill-core
//!
//! Core types for the Quill chunked-continuation generation engine.
//!
//! Quill assembles one long document out of many short model responses.
//! The pieces that make that work live here:
//!
//! - Job data model (spec, snapshot, states, control messages)
//! - Append-only event records used for crash recovery
//! - Chat wire types shared by every transport backend
//! - Pure text functions: chunking, anchors, similarity, hint parsing
//! - Configuration loaded from `.quill/config.toml`
//!
//! Nothing in this crate performs network I/O; the only filesystem access
//! is config loading.

mod chunk;
mod config;
mod error;
mod event;
mod types;

pub use chunk::{
    anchor_from_text, build_continuation_prompt, byte_chunk, find_end_marker, hint_is_terminal,
    similarity, strip_continuation_hint, Chunk, END_MARKER,
};
pub use config::{BreakerConfig, EngineConfig, QuillConfig, TransportConfig};
pub use error::{QuillError, Result};
pub use event::{EventKind, EventRecord};
pub use types::{
    BackendKind, ChatMessage, ChatRequest, ChatResponse, ControlMessage, FinishReason, JobId,
    JobSnapshot, JobState, LengthPreset, Role, RunLimits, RunSpec, SpanPreset,
};
