//! Core type definitions for Quill jobs and the chat wire format

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QuillError, Result};

/// Opaque job identifier (UUID v4 string)
pub type JobId = String;

/// Length presets controlling per-chunk minimum size and micro-extend passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LengthPreset {
    Standard,
    #[default]
    Long,
    VeryLong,
    Max,
}

impl LengthPreset {
    /// Minimum accumulated characters per chunk and the micro-extend pass cap
    pub fn limits(&self) -> (usize, usize) {
        match self {
            Self::Standard => (4200, 1),
            Self::Long => (5800, 3),
            Self::VeryLong => (6200, 4),
            Self::Max => (6800, 5),
        }
    }
}

impl std::fmt::Display for LengthPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Long => write!(f, "long"),
            Self::VeryLong => write!(f, "very-long"),
            Self::Max => write!(f, "max"),
        }
    }
}

impl std::str::FromStr for LengthPreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "long" => Ok(Self::Long),
            "very-long" | "verylong" => Ok(Self::VeryLong),
            "max" => Ok(Self::Max),
            _ => Err(format!("Invalid length preset: {}", s)),
        }
    }
}

/// Span presets controlling the chunk budget of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanPreset {
    Medium,
    Long,
    #[default]
    Book,
}

impl SpanPreset {
    /// Number of chunks budgeted for this span
    pub fn chunk_budget(&self) -> usize {
        match self {
            Self::Medium => 12,
            Self::Long => 24,
            Self::Book => 40,
        }
    }
}

impl std::fmt::Display for SpanPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Medium => write!(f, "medium"),
            Self::Long => write!(f, "long"),
            Self::Book => write!(f, "book"),
        }
    }
}

impl std::str::FromStr for SpanPreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "medium" => Ok(Self::Medium),
            "long" => Ok(Self::Long),
            "book" => Ok(Self::Book),
            _ => Err(format!("Invalid span preset: {}", s)),
        }
    }
}

/// Transport backend selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Bridge,
    Direct,
    Scripted,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bridge => write!(f, "bridge"),
            Self::Direct => write!(f, "direct"),
            Self::Scripted => write!(f, "scripted"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bridge" => Ok(Self::Bridge),
            "direct" => Ok(Self::Direct),
            "scripted" | "offline" => Ok(Self::Scripted),
            _ => Err(format!("Invalid backend: {}", s)),
        }
    }
}

/// Concrete limits resolved from the presets of a run spec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Minimum accumulated characters before a chunk is accepted
    pub min_chars: usize,
    /// Maximum micro-extend passes per chunk
    pub max_passes: usize,
    /// Total chunk budget for the run
    pub chunk_budget: usize,
}

/// Immutable run specification
///
/// A spec is never mutated after submission; to change one, fork the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    /// Subject the document is about
    pub subject: String,

    /// Length preset (per-chunk minimum + micro-extend passes)
    #[serde(default)]
    pub length: LengthPreset,

    /// Span preset (chunk budget)
    #[serde(default)]
    pub span: SpanPreset,

    /// Opaque overlay names recorded on the job
    #[serde(default)]
    pub overlays: Vec<String>,

    /// Opaque system text sent with every request
    #[serde(default)]
    pub system_text: String,

    /// Transport backend selector
    #[serde(default)]
    pub backend: BackendKind,

    /// Model selector passed through to the backend
    #[serde(default = "default_model")]
    pub model: String,

    /// Output artifact path; defaults to `books/<subject>.md`
    #[serde(default)]
    pub out_path: Option<PathBuf>,

    /// Optional source files for source-grounded runs
    #[serde(default)]
    pub extra_files: Vec<PathBuf>,

    /// Override the preset's per-chunk minimum characters
    #[serde(default)]
    pub min_chars: Option<usize>,

    /// Override the preset's micro-extend pass cap
    #[serde(default)]
    pub max_passes: Option<usize>,

    /// Override the preset's chunk budget
    #[serde(default)]
    pub chunk_budget: Option<usize>,
}

fn default_model() -> String {
    "default".to_string()
}

impl RunSpec {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            length: LengthPreset::default(),
            span: SpanPreset::default(),
            overlays: Vec::new(),
            system_text: String::new(),
            backend: BackendKind::default(),
            model: default_model(),
            out_path: None,
            extra_files: Vec::new(),
            min_chars: None,
            max_passes: None,
            chunk_budget: None,
        }
    }

    /// Validate the spec; violations are fatal at submission time
    pub fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(QuillError::InvalidSpec("subject must not be empty".into()));
        }
        if self.resolved().chunk_budget == 0 {
            return Err(QuillError::InvalidSpec("chunk budget must be > 0".into()));
        }
        Ok(())
    }

    /// Resolve presets to concrete limits, applying per-spec overrides
    pub fn resolved(&self) -> RunLimits {
        let (min_chars, max_passes) = self.length.limits();
        RunLimits {
            min_chars: self.min_chars.unwrap_or(min_chars),
            max_passes: self.max_passes.unwrap_or(max_passes),
            chunk_budget: self.chunk_budget.unwrap_or_else(|| self.span.chunk_budget()),
        }
    }

    /// Output artifact path, defaulting under `books/`
    pub fn output_path(&self) -> PathBuf {
        match &self.out_path {
            Some(p) => p.clone(),
            None => PathBuf::from("books").join(format!("{}.md", self.subject.replace(' ', "_"))),
        }
    }
}

/// Job lifecycle states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `to`
    pub fn can_transition(&self, to: JobState) -> bool {
        match (self, to) {
            (Self::Pending, Self::Running) => true,
            (Self::Running, Self::Paused) => true,
            (Self::Paused, Self::Running) => true,
            (Self::Pending | Self::Running | Self::Paused, t) if t.is_terminal() => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Mutable job snapshot
///
/// The snapshot is a cache; the event log is the recovery source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub spec: RunSpec,
    pub state: JobState,
    pub chunks_done: usize,
    pub chunk_budget: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub artifact: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

impl JobSnapshot {
    pub fn new(id: JobId, spec: RunSpec) -> Self {
        let budget = spec.resolved().chunk_budget;
        Self {
            id,
            spec,
            state: JobState::Pending,
            chunks_done: 0,
            chunk_budget: budget,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            artifact: None,
            error: None,
            meta: BTreeMap::new(),
        }
    }

    /// Apply a state transition, enforcing the monotonic state machine
    pub fn transition(&mut self, to: JobState) -> Result<()> {
        if self.state == to {
            // Pause/resume are idempotent; repeating a state is a no-op.
            return Ok(());
        }
        if !self.state.can_transition(to) {
            return Err(QuillError::InvalidTransition(format!(
                "{} -> {}",
                self.state, to
            )));
        }
        match to {
            JobState::Running if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            s if s.is_terminal() => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        self.state = to;
        Ok(())
    }

    /// Advance the completed-chunk counter; progress never decreases
    pub fn record_progress(&mut self, chunks_done: usize) -> Result<()> {
        if chunks_done < self.chunks_done {
            return Err(QuillError::Job(format!(
                "progress cannot decrease ({} -> {})",
                self.chunks_done, chunks_done
            )));
        }
        self.chunks_done = chunks_done;
        Ok(())
    }
}

/// Operator control commands, consumed FIFO at engine suspension points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Pause,
    Resume,
    Next {
        #[serde(default)]
        text: Option<String>,
    },
    Cancel,
}

impl std::fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Next { .. } => write!(f, "next"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// Message roles on the chat wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message in a chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A request to a transport backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            model: model.into(),
        }
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }
}

/// Why a response ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ContentFilter,
    Error,
}

/// A response from a transport backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub finish_reason: FinishReason,
}
