//! Append-only event records
//!
//! One JSON object per line in a job's `events.jsonl`. The log is the sole
//! source of truth for recovery; the snapshot is a cache rebuilt from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened, tagged by `type` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    JobSubmitted,
    JobStarted,
    ChunkStarted {
        chunk: usize,
    },
    ChunkDone {
        chunk: usize,
        bytes: usize,
        /// True when micro-extend passes contributed to this chunk
        extended: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
    MicroExtend {
        chunk: usize,
        pass: usize,
    },
    ControlReceived {
        command: String,
    },
    JobPaused,
    JobResumed,
    RepetitionPause {
        chunk: usize,
        score: f64,
    },
    SteerApplied {
        chunk: usize,
    },
    TransportRetry {
        chunk: usize,
        attempt: usize,
        error: String,
    },
    ResumedFrom {
        last_done: usize,
    },
    JobCompleted {
        chunks_done: usize,
    },
    JobFailed {
        error: String,
    },
    JobCancelled,
}

impl EventKind {
    /// Chunk index this event pertains to, when applicable
    pub fn chunk(&self) -> Option<usize> {
        match self {
            Self::ChunkStarted { chunk }
            | Self::ChunkDone { chunk, .. }
            | Self::MicroExtend { chunk, .. }
            | Self::RepetitionPause { chunk, .. }
            | Self::SteerApplied { chunk }
            | Self::TransportRetry { chunk, .. } => Some(*chunk),
            _ => None,
        }
    }
}

/// A timestamped event as it appears in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl EventRecord {
    pub fn now(kind: EventKind) -> Self {
        Self {
            ts: Utc::now(),
            kind,
        }
    }
}
