//! The engine control loop for one job
//!
//! Key design: the loop drives itself exclusively through the pure state
//! machine in `state_machine.rs` — each turn executes the single action the
//! last transition produced, feeds the resulting event back in, and repeats
//! until the machine reaches `End` or `Error`.
//!
//! Suspension points, where control messages take effect: before each
//! chunk, inside the micro-extend loop, and after a repetition auto-pause.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use quill_core::{
    anchor_from_text, byte_chunk, find_end_marker, hint_is_terminal, similarity,
    strip_continuation_hint, ChatRequest, ChatResponse, EngineConfig, EventKind, FinishReason,
    JobSnapshot, JobState, QuillError, Result, RunSpec, END_MARKER,
};
use quill_transport::{Transport, TransportError};
use tracing::{debug, info, warn};

use crate::control::{ControlGate, GateOutcome};
use crate::prompt;
use crate::recovery::resume_point;
use crate::registry::JobRegistry;
use crate::state_machine::{step, EngineAction, EngineEvent, EngineState, StopCondition};
use crate::store::JobStore;

/// Trailing window of committed output kept for the repetition guard
const HISTORY_WINDOW_CHARS: usize = 800;

/// Pause between micro-extend passes so the backend is not hot-looped
const MICRO_EXTEND_DELAY_MS: u64 = 100;

/// A fully assembled chunk awaiting commit
#[derive(Debug)]
struct Segment {
    body: String,
    extended: bool,
    hint: Option<String>,
    end_marker: bool,
}

enum ProduceOutcome {
    Ready(Segment),
    Cancelled,
}

/// Owns the control loop for one job
pub struct JobEngine {
    store: Arc<JobStore>,
    registry: Arc<JobRegistry>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
}

impl JobEngine {
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<JobRegistry>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            transport,
            config,
        }
    }

    /// Drive a job to a terminal state
    ///
    /// Recoverable conditions are handled in the loop; anything that
    /// prevents further progress lands here, and this is the only place
    /// that moves a job to `Failed`.
    pub async fn run(&self, job_id: &str) -> Result<JobSnapshot> {
        let mut snapshot = self.store.load(job_id)?;
        if snapshot.state.is_terminal() {
            warn!(job_id, state = %snapshot.state, "job already terminal, nothing to run");
            return Ok(snapshot);
        }

        let result = self.run_loop(&mut snapshot).await;
        self.registry.release(job_id);

        match result {
            Ok(()) => Ok(snapshot),
            Err(err) => {
                let message = err.to_string();
                warn!(job_id, "job failed: {}", message);
                snapshot.error = Some(message.clone());
                snapshot.transition(JobState::Failed)?;
                self.store
                    .append_event(job_id, EventKind::JobFailed { error: message })?;
                self.store.save(&snapshot)?;
                Ok(snapshot)
            }
        }
    }

    async fn run_loop(&self, snapshot: &mut JobSnapshot) -> Result<()> {
        let job_id = snapshot.id.clone();
        let limits = snapshot.spec.resolved();

        if !self.transport.health_check().await {
            warn!(job_id = %job_id, backend = self.transport.name(), "backend unhealthy at start of run");
        }

        let events = self.store.read_events(&job_id)?;
        let resume = resume_point(&events);
        if let Some(last_done) = resume.last_done {
            info!(job_id = %job_id, last_done, "resuming after last completed chunk");
            self.store
                .append_event(&job_id, EventKind::ResumedFrom { last_done })?;
        }

        snapshot.transition(JobState::Running)?;
        let artifact = snapshot.spec.output_path();
        snapshot.artifact = Some(artifact.clone());
        self.store.save(snapshot)?;
        self.store.append_event(&job_id, EventKind::JobStarted)?;

        if let Some(parent) = artifact.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // The guard window survives restarts by re-reading the artifact tail.
        let mut history_tail = if artifact.exists() {
            last_chars(&std::fs::read_to_string(&artifact)?, HISTORY_WINDOW_CHARS)
        } else {
            String::new()
        };

        let source_segments = self.load_source_segments(&snapshot.spec)?;
        let mut gate = ControlGate::new(self.registry.claim_receiver(&job_id).ok_or_else(
            || QuillError::Job(format!("control channel for {} already claimed", job_id)),
        )?);

        if resume.next_chunk() >= limits.chunk_budget {
            // Nothing left to generate; the prior run already hit the budget.
            return self.finalize(StopCondition::BudgetExhausted, snapshot);
        }

        let mut pending: Option<Segment> = None;
        let (mut state, mut actions) = step(
            EngineState::Idle,
            EngineEvent::Start {
                next_chunk: resume.next_chunk(),
            },
        );

        loop {
            let action = match actions.first() {
                Some(action) => action.clone(),
                None => match state {
                    EngineState::Error { message } => return Err(QuillError::Job(message)),
                    _ => return Err(QuillError::Job(format!(
                        "engine stalled without an action in {:?}",
                        state
                    ))),
                },
            };

            let event = match action {
                EngineAction::EmitSeed | EngineAction::EmitContinuation { .. } => {
                    let chunk = match action {
                        EngineAction::EmitContinuation { chunk } => chunk,
                        _ => 0,
                    };
                    match self
                        .produce(chunk, snapshot, &mut gate, &history_tail, &source_segments)
                        .await
                    {
                        Ok(ProduceOutcome::Ready(segment)) => {
                            pending = Some(segment);
                            EngineEvent::SegmentReady { chunk }
                        }
                        Ok(ProduceOutcome::Cancelled) => EngineEvent::Cancelled,
                        Err(err) => EngineEvent::Fatal {
                            message: err.to_string(),
                        },
                    }
                }
                EngineAction::PersistChunk { chunk } => {
                    match pending.take() {
                        None => EngineEvent::Fatal {
                            message: "no segment pending at commit".to_string(),
                        },
                        Some(segment) => {
                            match self.commit(chunk, &segment, snapshot, &artifact, &gate) {
                                Err(err) => EngineEvent::Fatal {
                                    message: err.to_string(),
                                },
                                Ok(stop) => {
                                    history_tail = last_chars(
                                        &format!("{}\n\n{}", history_tail, segment.body),
                                        HISTORY_WINDOW_CHARS,
                                    );
                                    self.drain_transport_events(&job_id).await;
                                    if stop.is_none() && self.config.inter_chunk_delay_ms > 0 {
                                        tokio::time::sleep(Duration::from_millis(
                                            self.config.inter_chunk_delay_ms,
                                        ))
                                        .await;
                                    }
                                    EngineEvent::Committed { chunk, stop }
                                }
                            }
                        }
                    }
                }
                EngineAction::Finish { stop } => {
                    return self.finalize(stop, snapshot);
                }
            };

            let (next, next_actions) = step(state, event);
            state = next;
            actions = next_actions;
        }
    }

    /// Request, micro-extend, and guard one chunk's worth of text
    async fn produce(
        &self,
        chunk: usize,
        snapshot: &mut JobSnapshot,
        gate: &mut ControlGate,
        history_tail: &str,
        source_segments: &[String],
    ) -> Result<ProduceOutcome> {
        if gate.checkpoint(&self.store, snapshot).await? == GateOutcome::Cancelled {
            return Ok(ProduceOutcome::Cancelled);
        }

        let job_id = snapshot.id.clone();
        let limits = snapshot.spec.resolved();
        self.store
            .append_event(&job_id, EventKind::ChunkStarted { chunk })?;

        let steer = gate.take_steer();
        if steer.is_some() {
            self.store
                .append_event(&job_id, EventKind::SteerApplied { chunk })?;
        }

        let anchor = anchor_from_text(history_tail, self.config.anchor_tail_chars);
        let source = source_segments.get(chunk).map(|s| s.as_str());
        let user_prompt =
            prompt::chunk_prompt(chunk, &anchor, steer, source, self.config.coverage_hammer);
        let request = prompt::chat_request(&snapshot.spec, user_prompt);

        let response = self.send_with_attempts(chunk, &job_id, &request).await?;
        let mut end_marker = find_end_marker(&response.text);
        let (mut body, mut hint) = strip_continuation_hint(&response.text);
        let mut extended = false;
        let mut pass = 0;

        // Micro-extend until the minimum length is reached or passes run out.
        // The anchor always comes from the locally accumulated text, never
        // from full history, so drift does not compound.
        while body.chars().count() < limits.min_chars && pass < limits.max_passes && !end_marker {
            if gate.checkpoint(&self.store, snapshot).await? == GateOutcome::Cancelled {
                return Ok(ProduceOutcome::Cancelled);
            }
            tokio::time::sleep(Duration::from_millis(MICRO_EXTEND_DELAY_MS)).await;

            let steer = gate.take_steer();
            if steer.is_some() {
                self.store
                    .append_event(&job_id, EventKind::SteerApplied { chunk })?;
            }

            let local_anchor = anchor_from_text(&body, self.config.local_anchor_chars);
            let request = prompt::chat_request(
                &snapshot.spec,
                prompt::extend_prompt(&local_anchor, steer),
            );
            let response = self.send_with_attempts(chunk, &job_id, &request).await?;
            if find_end_marker(&response.text) {
                end_marker = true;
            }
            let (ext_body, ext_hint) = strip_continuation_hint(&response.text);
            if ext_body.trim().is_empty() {
                debug!(job_id = %job_id, chunk, pass, "empty extension, stopping micro-extend");
                break;
            }

            let prev_tail = anchor_from_text(&body, HISTORY_WINDOW_CHARS);
            let head = first_chars(&ext_body, self.config.anchor_tail_chars.max(400));
            let score = similarity(&prev_tail, &head, self.config.repetition_ngram);
            if score > self.config.repetition_threshold {
                warn!(job_id = %job_id, chunk, score, "high repetition during extension, stopping");
                break;
            }

            if !body.ends_with('\n') {
                body.push_str("\n\n");
            }
            body.push_str(&ext_body);
            if ext_hint.is_some() {
                hint = ext_hint;
            }
            extended = true;
            pass += 1;
            self.store
                .append_event(&job_id, EventKind::MicroExtend { chunk, pass })?;
        }

        // Full-chunk guard against the committed history. Crossing the
        // threshold pauses for operator steering; the text is kept.
        if !history_tail.is_empty() {
            let prev_tail = anchor_from_text(history_tail, HISTORY_WINDOW_CHARS);
            let head = first_chars(&body, self.config.anchor_tail_chars.max(400));
            let score = similarity(&prev_tail, &head, self.config.repetition_ngram);
            if score > self.config.repetition_threshold {
                warn!(job_id = %job_id, chunk, score, "repetition threshold crossed, auto-pausing");
                self.store
                    .append_event(&job_id, EventKind::RepetitionPause { chunk, score })?;
                gate.force_pause(&self.store, snapshot)?;
                if gate.checkpoint(&self.store, snapshot).await? == GateOutcome::Cancelled {
                    return Ok(ProduceOutcome::Cancelled);
                }
            }
        }

        if end_marker {
            body = body.replace(END_MARKER, "").trim_end().to_string();
        }

        Ok(ProduceOutcome::Ready(Segment {
            body,
            extended,
            hint,
            end_marker,
        }))
    }

    /// Append the chunk to the artifact, log it, checkpoint, and evaluate
    /// the stop conditions in their specified order
    fn commit(
        &self,
        chunk: usize,
        segment: &Segment,
        snapshot: &mut JobSnapshot,
        artifact: &Path,
        gate: &ControlGate,
    ) -> Result<Option<StopCondition>> {
        use std::io::Write;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(artifact)?;
        let at_start = file.metadata()?.len() == 0;
        if !at_start && !segment.body.starts_with('\n') {
            file.write_all(b"\n\n")?;
        }
        file.write_all(segment.body.as_bytes())?;
        file.flush()?;
        let _ = file.sync_data();

        self.store.append_event(
            &snapshot.id,
            EventKind::ChunkDone {
                chunk,
                bytes: segment.body.len(),
                extended: segment.extended,
                hint: segment.hint.clone(),
            },
        )?;
        snapshot.record_progress(chunk + 1)?;

        let interval = self.config.checkpoint_interval.max(1);
        if (chunk + 1) % interval == 0 {
            self.store.save(snapshot)?;
        }

        info!(
            job_id = %snapshot.id,
            chunk,
            bytes = segment.body.len(),
            extended = segment.extended,
            "chunk committed"
        );

        let stop = if segment.end_marker {
            Some(StopCondition::EndMarker)
        } else if segment
            .hint
            .as_deref()
            .map(hint_is_terminal)
            .unwrap_or(false)
        {
            Some(StopCondition::TerminalHint)
        } else if chunk + 1 >= snapshot.chunk_budget {
            Some(StopCondition::BudgetExhausted)
        } else if gate.cancelled() {
            Some(StopCondition::Cancelled)
        } else {
            None
        };

        Ok(stop)
    }

    fn finalize(&self, stop: StopCondition, snapshot: &mut JobSnapshot) -> Result<()> {
        match stop {
            StopCondition::Cancelled => {
                snapshot.transition(JobState::Cancelled)?;
                self.store
                    .append_event(&snapshot.id, EventKind::JobCancelled)?;
                info!(job_id = %snapshot.id, chunks = snapshot.chunks_done, "job cancelled");
            }
            stop => {
                snapshot.transition(JobState::Completed)?;
                let reason = match stop {
                    StopCondition::EndMarker => "end_marker",
                    StopCondition::TerminalHint => "terminal_hint",
                    StopCondition::BudgetExhausted => "budget_exhausted",
                    StopCondition::Cancelled => "cancelled",
                };
                snapshot.meta.insert("stop_reason".to_string(), reason.to_string());
                self.store.append_event(
                    &snapshot.id,
                    EventKind::JobCompleted {
                        chunks_done: snapshot.chunks_done,
                    },
                )?;
                info!(
                    job_id = %snapshot.id,
                    chunks = snapshot.chunks_done,
                    ?stop,
                    "job completed"
                );
            }
        }
        self.store.save(snapshot)
    }

    /// Send with the per-chunk attempt budget. A breaker-open result waits
    /// out the cool-down without consuming an attempt; other failures burn
    /// one and are logged as retry events.
    async fn send_with_attempts(
        &self,
        chunk: usize,
        job_id: &str,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        let mut attempt = 0;
        loop {
            match self.transport.send(request).await {
                Ok(response) => {
                    if response.finish_reason == FinishReason::ContentFilter {
                        warn!(job_id, chunk, "response was content-filtered upstream");
                    }
                    return Ok(response);
                }
                Err(TransportError::BreakerOpen { retry_in }) => {
                    let wait = retry_in.max(Duration::from_millis(50));
                    warn!(job_id, chunk, "circuit open, backing off {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.config.max_chunk_attempts {
                        return Err(QuillError::Transport(err.to_string()));
                    }
                    warn!(job_id, chunk, attempt, "transport failure, retrying: {}", err);
                    self.store.append_event(
                        job_id,
                        EventKind::TransportRetry {
                            chunk,
                            attempt,
                            error: err.to_string(),
                        },
                    )?;
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
            }
        }
    }

    async fn drain_transport_events(&self, job_id: &str) {
        if let Ok(events) = self.transport.stream_events().await {
            for event in events {
                debug!(job_id, kind = %event.kind, "backend event");
            }
        }
    }

    fn load_source_segments(&self, spec: &RunSpec) -> Result<Vec<String>> {
        if spec.extra_files.is_empty() {
            return Ok(Vec::new());
        }
        let mut combined = String::new();
        for path in &spec.extra_files {
            let content = std::fs::read_to_string(path).map_err(|e| {
                QuillError::InvalidSpec(format!("cannot read source file {}: {}", path.display(), e))
            })?;
            if !combined.is_empty() {
                combined.push_str("\n\n");
            }
            combined.push_str(&content);
        }
        Ok(byte_chunk(&combined, self.config.source_chunk_bytes)
            .into_iter()
            .map(|c| c.text)
            .collect())
    }
}

fn last_chars(text: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    match text.char_indices().rev().nth(n - 1) {
        Some((i, _)) => text[i..].to_string(),
        None => text.to_string(),
    }
}

fn first_chars(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_chars() {
        assert_eq!(last_chars("abcdef", 3), "def");
        assert_eq!(last_chars("ab", 10), "ab");
        assert_eq!(last_chars("日本語のテキスト", 3), "キスト");
        assert_eq!(last_chars("anything", 0), "");
    }

    #[test]
    fn test_first_chars() {
        assert_eq!(first_chars("abcdef", 2), "ab");
        assert_eq!(first_chars("日本語", 2), "日本");
        assert_eq!(first_chars("ab", 10), "ab");
    }
}
