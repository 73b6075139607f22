//! Pure state machine for the engine control loop
//!
//! This module implements a pure functional state machine with NO I/O.
//! The engine drives itself exclusively through [`step`]; the transition
//! rules here are the whole control-flow contract, so an exhaustive match
//! verifies it at compile time.
//!
//! Key design principles:
//! - Pure function: step(state, event) -> (state, actions)
//! - No async, no I/O, no dependency on the rest of the engine
//! - Invalid transitions go to the Error state (never panic)

/// Engine control-loop state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    /// No run in progress
    Idle,
    /// Producing the first chunk from the fixed seed prompt
    Seed,
    /// Producing chunk `chunk` from an anchored continuation
    Extend { chunk: usize },
    /// Persisting the finished chunk `chunk`
    Commit { chunk: usize },
    /// Run finished (completed, exhausted, or cancelled)
    End,
    /// Unrecoverable failure
    Error { message: String },
}

/// Why the loop stopped after a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Explicit end marker found in the response text
    EndMarker,
    /// Continuation hint normalized to a terminal token
    TerminalHint,
    /// Chunk budget exhausted (a normal, successful exhaustion)
    BudgetExhausted,
    /// Operator cancel observed
    Cancelled,
}

/// Events that drive state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Begin a run, resuming at `next_chunk` (0 means seed)
    Start { next_chunk: usize },
    /// A full segment for `chunk` is assembled and ready to persist
    SegmentReady { chunk: usize },
    /// Chunk `chunk` is durably committed; `stop` ends the run
    Committed {
        chunk: usize,
        stop: Option<StopCondition>,
    },
    /// Operator cancel observed at a suspension point
    Cancelled,
    /// Unrecoverable failure
    Fatal { message: String },
}

/// Side effects the engine executes after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Issue the fixed seed prompt for chunk 0
    EmitSeed,
    /// Issue an anchored continuation prompt for `chunk`
    EmitContinuation { chunk: usize },
    /// Append chunk `chunk` to the artifact and event log
    PersistChunk { chunk: usize },
    /// Conclude the run
    Finish { stop: StopCondition },
}

/// Pure state transition function
///
/// Any invalid combination lands in `EngineState::Error` with a description.
/// This function never panics.
pub fn step(state: EngineState, event: EngineEvent) -> (EngineState, Vec<EngineAction>) {
    match (state, event) {
        (EngineState::Idle, EngineEvent::Start { next_chunk: 0 }) => {
            (EngineState::Seed, vec![EngineAction::EmitSeed])
        }

        (EngineState::Idle, EngineEvent::Start { next_chunk }) => (
            EngineState::Extend { chunk: next_chunk },
            vec![EngineAction::EmitContinuation { chunk: next_chunk }],
        ),

        (EngineState::Seed, EngineEvent::SegmentReady { chunk: 0 }) => (
            EngineState::Commit { chunk: 0 },
            vec![EngineAction::PersistChunk { chunk: 0 }],
        ),

        (EngineState::Extend { chunk }, EngineEvent::SegmentReady { chunk: ready })
            if chunk == ready =>
        {
            (
                EngineState::Commit { chunk },
                vec![EngineAction::PersistChunk { chunk }],
            )
        }

        (EngineState::Commit { chunk }, EngineEvent::Committed { chunk: done, stop })
            if chunk == done =>
        {
            match stop {
                Some(stop) => (EngineState::End, vec![EngineAction::Finish { stop }]),
                None => (
                    EngineState::Extend { chunk: chunk + 1 },
                    vec![EngineAction::EmitContinuation { chunk: chunk + 1 }],
                ),
            }
        }

        // Cancel is honored from any active state.
        (
            EngineState::Seed | EngineState::Extend { .. } | EngineState::Commit { .. },
            EngineEvent::Cancelled,
        ) => (
            EngineState::End,
            vec![EngineAction::Finish {
                stop: StopCondition::Cancelled,
            }],
        ),

        // Fatal errors are reachable from any active state.
        (
            EngineState::Idle
            | EngineState::Seed
            | EngineState::Extend { .. }
            | EngineState::Commit { .. },
            EngineEvent::Fatal { message },
        ) => (EngineState::Error { message }, vec![]),

        (state, event) => (
            EngineState::Error {
                message: format!("invalid transition: {:?} cannot handle {:?}", state, event),
            },
            vec![],
        ),
    }
}
