//! Cooperative control handling inside the engine loop
//!
//! The gate owns the consuming end of a job's control channel. The engine
//! calls [`ControlGate::checkpoint`] at its suspension points — between
//! chunks and inside the micro-extend loop — so a pause takes effect
//! promptly rather than only at chunk boundaries. While paused the gate
//! blocks on the channel instead of spinning.

use quill_core::{ControlMessage, EventKind, JobSnapshot, JobState, Result};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::store::JobStore;

/// What the engine should do after a control checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Continue,
    Cancelled,
}

pub struct ControlGate {
    rx: UnboundedReceiver<ControlMessage>,
    paused: bool,
    steer: Option<String>,
    cancelled: bool,
}

impl ControlGate {
    pub fn new(rx: UnboundedReceiver<ControlMessage>) -> Self {
        Self {
            rx,
            paused: false,
            steer: None,
            cancelled: false,
        }
    }

    /// Steering text from the latest `next`, consumed exactly once
    pub fn take_steer(&mut self) -> Option<String> {
        self.steer.take()
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    /// Drain pending control messages in FIFO order, then block while paused
    pub async fn checkpoint(
        &mut self,
        store: &JobStore,
        snapshot: &mut JobSnapshot,
    ) -> Result<GateOutcome> {
        while let Ok(message) = self.rx.try_recv() {
            self.apply(message, store, snapshot)?;
        }

        while self.paused && !self.cancelled {
            match self.rx.recv().await {
                Some(message) => self.apply(message, store, snapshot)?,
                None => {
                    warn!(job_id = %snapshot.id, "control channel closed while paused; resuming");
                    self.resume(store, snapshot)?;
                }
            }
        }

        if self.cancelled {
            Ok(GateOutcome::Cancelled)
        } else {
            Ok(GateOutcome::Continue)
        }
    }

    fn apply(
        &mut self,
        message: ControlMessage,
        store: &JobStore,
        snapshot: &mut JobSnapshot,
    ) -> Result<()> {
        store.append_event(
            &snapshot.id,
            EventKind::ControlReceived {
                command: message.to_string(),
            },
        )?;

        match message {
            ControlMessage::Pause => {
                if !self.paused {
                    info!(job_id = %snapshot.id, "pause observed");
                    self.paused = true;
                    snapshot.transition(JobState::Paused)?;
                    store.save(snapshot)?;
                    store.append_event(&snapshot.id, EventKind::JobPaused)?;
                }
            }
            ControlMessage::Resume => {
                if self.paused {
                    self.resume(store, snapshot)?;
                }
            }
            ControlMessage::Next { text } => {
                // Latest steering wins; it overrides exactly one prompt.
                if text.is_some() {
                    self.steer = text;
                }
            }
            ControlMessage::Cancel => {
                info!(job_id = %snapshot.id, "cancel observed");
                self.cancelled = true;
            }
        }
        Ok(())
    }

    fn resume(&mut self, store: &JobStore, snapshot: &mut JobSnapshot) -> Result<()> {
        info!(job_id = %snapshot.id, "resume observed");
        self.paused = false;
        snapshot.transition(JobState::Running)?;
        store.save(snapshot)?;
        store.append_event(&snapshot.id, EventKind::JobResumed)?;
        Ok(())
    }

    /// Pause initiated by the engine itself (repetition guard)
    pub(crate) fn force_pause(
        &mut self,
        store: &JobStore,
        snapshot: &mut JobSnapshot,
    ) -> Result<()> {
        if !self.paused {
            self.paused = true;
            snapshot.transition(JobState::Paused)?;
            store.save(snapshot)?;
            store.append_event(&snapshot.id, EventKind::JobPaused)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::JobRegistry;
    use quill_core::RunSpec;

    fn fixture() -> (tempfile::TempDir, JobStore, JobSnapshot) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs")).unwrap();
        let mut snapshot = JobSnapshot::new("job-gate".into(), RunSpec::new("subject"));
        snapshot.transition(JobState::Running).unwrap();
        store.save(&snapshot).unwrap();
        (dir, store, snapshot)
    }

    #[tokio::test]
    async fn test_pause_next_resume_applied_in_order() {
        let (_dir, store, mut snapshot) = fixture();
        let registry = JobRegistry::new();
        registry.push("job-gate", ControlMessage::Pause).unwrap();
        registry
            .push(
                "job-gate",
                ControlMessage::Next {
                    text: Some("X".into()),
                },
            )
            .unwrap();
        registry.push("job-gate", ControlMessage::Resume).unwrap();

        let mut gate = ControlGate::new(registry.claim_receiver("job-gate").unwrap());
        let outcome = gate.checkpoint(&store, &mut snapshot).await.unwrap();

        assert_eq!(outcome, GateOutcome::Continue);
        assert_eq!(snapshot.state, JobState::Running);
        assert_eq!(gate.take_steer().as_deref(), Some("X"));

        // The log shows the exact consumption order.
        let commands: Vec<String> = store
            .read_events("job-gate")
            .unwrap()
            .into_iter()
            .filter_map(|r| match r.kind {
                EventKind::ControlReceived { command } => Some(command),
                _ => None,
            })
            .collect();
        assert_eq!(commands, vec!["pause", "next", "resume"]);
    }

    #[tokio::test]
    async fn test_steer_consumed_once() {
        let (_dir, store, mut snapshot) = fixture();
        let registry = JobRegistry::new();
        registry
            .push(
                "job-gate",
                ControlMessage::Next {
                    text: Some("steer".into()),
                },
            )
            .unwrap();

        let mut gate = ControlGate::new(registry.claim_receiver("job-gate").unwrap());
        gate.checkpoint(&store, &mut snapshot).await.unwrap();
        assert_eq!(gate.take_steer().as_deref(), Some("steer"));
        assert!(gate.take_steer().is_none());
    }

    #[tokio::test]
    async fn test_cancel_short_circuits() {
        let (_dir, store, mut snapshot) = fixture();
        let registry = JobRegistry::new();
        registry.push("job-gate", ControlMessage::Pause).unwrap();
        registry.push("job-gate", ControlMessage::Cancel).unwrap();

        let mut gate = ControlGate::new(registry.claim_receiver("job-gate").unwrap());
        let outcome = gate.checkpoint(&store, &mut snapshot).await.unwrap();
        assert_eq!(outcome, GateOutcome::Cancelled);
        assert!(gate.cancelled());
    }

    #[tokio::test]
    async fn test_pause_blocks_until_resume() {
        let (_dir, store, mut snapshot) = fixture();
        let registry = std::sync::Arc::new(JobRegistry::new());
        registry.push("job-gate", ControlMessage::Pause).unwrap();

        let mut gate = ControlGate::new(registry.claim_receiver("job-gate").unwrap());
        let pusher = {
            let registry = registry.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                registry.push("job-gate", ControlMessage::Resume).unwrap();
            })
        };

        let outcome = gate.checkpoint(&store, &mut snapshot).await.unwrap();
        assert_eq!(outcome, GateOutcome::Continue);
        assert_eq!(snapshot.state, JobState::Running);
        pusher.await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_is_idempotent() {
        let (_dir, store, mut snapshot) = fixture();
        let registry = JobRegistry::new();
        registry.push("job-gate", ControlMessage::Pause).unwrap();
        registry.push("job-gate", ControlMessage::Pause).unwrap();
        registry.push("job-gate", ControlMessage::Resume).unwrap();

        let mut gate = ControlGate::new(registry.claim_receiver("job-gate").unwrap());
        gate.checkpoint(&store, &mut snapshot).await.unwrap();

        let paused_events = store
            .read_events("job-gate")
            .unwrap()
            .into_iter()
            .filter(|r| r.kind == EventKind::JobPaused)
            .count();
        assert_eq!(paused_events, 1);
    }
}
