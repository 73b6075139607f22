//! Process-wide job registry
//!
//! The registry is the one structure shared across jobs: an injected,
//! synchronized map from job id to that job's control channel. Queues are
//! created lazily on first use by either side — an operator can enqueue
//! commands before the engine attaches, and nothing is lost. Messages are
//! delivered FIFO and consumed at most once.

use std::collections::HashMap;
use std::sync::Mutex;

use quill_core::{ControlMessage, JobId, QuillError, Result};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

struct JobChannel {
    tx: UnboundedSender<ControlMessage>,
    /// Present until the engine claims it
    rx: Option<UnboundedReceiver<ControlMessage>>,
}

#[derive(Default)]
pub struct JobRegistry {
    channels: Mutex<HashMap<JobId, JobChannel>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a control message for a job
    ///
    /// Returns immediately; delivery is not confirmation that the command
    /// has been applied.
    pub fn push(&self, job_id: &str, message: ControlMessage) -> Result<()> {
        let mut channels = self.channels.lock().expect("registry lock");
        let channel = channels
            .entry(job_id.to_string())
            .or_insert_with(new_channel);
        channel
            .tx
            .send(message)
            .map_err(|_| QuillError::Job(format!("job {} is no longer consuming control", job_id)))
    }

    /// Claim the consuming end of a job's control channel
    ///
    /// Only one consumer exists per job; a second claim while the first is
    /// live yields `None`.
    pub fn claim_receiver(&self, job_id: &str) -> Option<UnboundedReceiver<ControlMessage>> {
        let mut channels = self.channels.lock().expect("registry lock");
        channels
            .entry(job_id.to_string())
            .or_insert_with(new_channel)
            .rx
            .take()
    }

    /// Drop a job's channel once its run reaches a terminal state
    pub fn release(&self, job_id: &str) {
        let mut channels = self.channels.lock().expect("registry lock");
        if channels.remove(job_id).is_some() {
            debug!(job_id, "control channel released");
        }
    }
}

fn new_channel() -> JobChannel {
    let (tx, rx) = mpsc::unbounded_channel();
    JobChannel { tx, rx: Some(rx) }
}
