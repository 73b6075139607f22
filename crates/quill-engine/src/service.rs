//! Job service facade
//!
//! The external interface of the engine: synchronous submit/control/query
//! plus asynchronous execution. Each running job is an independent task; the
//! registry is the only structure shared between them, so two jobs never
//! block each other.

use std::sync::Arc;

use quill_core::{
    ControlMessage, EventKind, EventRecord, JobId, JobSnapshot, QuillConfig, Result, RunSpec,
};
use quill_transport::{build_transport, Transport};
use tracing::info;
use uuid::Uuid;

use crate::engine::JobEngine;
use crate::registry::JobRegistry;
use crate::store::JobStore;

pub struct JobService {
    store: Arc<JobStore>,
    registry: Arc<JobRegistry>,
    config: QuillConfig,
}

impl JobService {
    pub fn new(config: QuillConfig) -> Result<Self> {
        let store = Arc::new(JobStore::open(config.jobs_dir.clone())?);
        Ok(Self {
            store,
            registry: Arc::new(JobRegistry::new()),
            config,
        })
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Submit a new job; returns its id synchronously
    ///
    /// Generation itself only happens once the job is run.
    pub fn submit(&self, spec: RunSpec) -> Result<JobId> {
        spec.validate()?;

        let job_id = Uuid::new_v4().to_string();
        let snapshot = JobSnapshot::new(job_id.clone(), spec);
        self.store.save(&snapshot)?;
        self.store.append_event(&job_id, EventKind::JobSubmitted)?;

        info!(job_id = %job_id, subject = %snapshot.spec.subject, "job submitted");
        Ok(job_id)
    }

    /// Submit, resuming an existing non-terminal job that targets the same
    /// output artifact instead of starting over
    ///
    /// Returns the job id and whether an existing job was picked up.
    pub fn submit_or_resume(&self, spec: RunSpec) -> Result<(JobId, bool)> {
        spec.validate()?;
        if let Some(existing) = self.store.find_resumable(&spec.output_path())? {
            info!(job_id = %existing, "resuming existing job for this output");
            return Ok((existing, true));
        }
        Ok((self.submit(spec)?, false))
    }

    /// Fork a job: same spec, fresh id, fresh state
    ///
    /// Specs are immutable after submission; forking is how a run is
    /// re-targeted or re-tried with history intact on the original.
    pub fn fork(&self, job_id: &str) -> Result<JobId> {
        let source = self.store.load(job_id)?;
        let fork_id = self.submit(source.spec)?;
        info!(from = %job_id, to = %fork_id, "job forked");
        Ok(fork_id)
    }

    /// Enqueue a control command; returns before it is applied
    pub fn control(&self, job_id: &str, message: ControlMessage) -> Result<()> {
        // Surface unknown ids instead of queueing into the void.
        self.store.load(job_id)?;
        self.registry.push(job_id, message)
    }

    /// Current state, progress, and artifact paths for a job
    pub fn query(&self, job_id: &str) -> Result<JobSnapshot> {
        self.store.load(job_id)
    }

    /// All jobs in the store
    pub fn list(&self) -> Result<Vec<JobSnapshot>> {
        self.store.list_jobs()
    }

    /// Full event log for a job
    pub fn events(&self, job_id: &str) -> Result<Vec<EventRecord>> {
        self.store.read_events(job_id)
    }

    /// Run a job to a terminal state on the backend its spec selects
    pub async fn run(&self, job_id: &str) -> Result<JobSnapshot> {
        let snapshot = self.store.load(job_id)?;
        let transport = build_transport(snapshot.spec.backend, &snapshot.spec.model, &self.config)?;
        self.run_with_transport(job_id, Arc::new(transport)).await
    }

    /// Run a job over a caller-provided transport (tests, scripted demos)
    pub async fn run_with_transport(
        &self,
        job_id: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<JobSnapshot> {
        let engine = JobEngine::new(
            self.store.clone(),
            self.registry.clone(),
            transport,
            self.config.engine.clone(),
        );
        engine.run(job_id).await
    }

    /// Spawn a job as an independent task
    pub fn spawn(self: &Arc<Self>, job_id: JobId) -> tokio::task::JoinHandle<Result<JobSnapshot>> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.run(&job_id).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::JobState;

    fn service() -> (tempfile::TempDir, JobService) {
        let dir = tempfile::tempdir().unwrap();
        let config = QuillConfig {
            jobs_dir: dir.path().join("jobs"),
            ..QuillConfig::default()
        };
        (dir, JobService::new(config).unwrap())
    }

    #[test]
    fn test_submit_creates_pending_job() {
        let (_dir, service) = service();
        let job_id = service.submit(RunSpec::new("glaciers")).unwrap();

        let snapshot = service.query(&job_id).unwrap();
        assert_eq!(snapshot.state, JobState::Pending);
        assert_eq!(snapshot.chunks_done, 0);

        let events = service.events(&job_id).unwrap();
        assert_eq!(events[0].kind, EventKind::JobSubmitted);
    }

    #[test]
    fn test_submit_rejects_invalid_spec() {
        let (_dir, service) = service();
        assert!(service.submit(RunSpec::new("  ")).is_err());
    }

    #[test]
    fn test_submit_or_resume_picks_up_existing() {
        let (_dir, service) = service();
        let mut spec = RunSpec::new("volcanoes");
        spec.out_path = Some("books/volcanoes.md".into());

        let (first, resumed) = service.submit_or_resume(spec.clone()).unwrap();
        assert!(!resumed);

        let (second, resumed) = service.submit_or_resume(spec).unwrap();
        assert!(resumed);
        assert_eq!(first, second);
    }

    #[test]
    fn test_fork_copies_spec_into_fresh_job() {
        let (_dir, service) = service();
        let original = service.submit(RunSpec::new("meteorites")).unwrap();
        let fork = service.fork(&original).unwrap();

        assert_ne!(original, fork);
        let snapshot = service.query(&fork).unwrap();
        assert_eq!(snapshot.spec.subject, "meteorites");
        assert_eq!(snapshot.state, JobState::Pending);
    }

    #[test]
    fn test_control_unknown_job_errors() {
        let (_dir, service) = service();
        assert!(service.control("missing", ControlMessage::Pause).is_err());
    }

    #[test]
    fn test_control_enqueues_for_known_job() {
        let (_dir, service) = service();
        let job_id = service.submit(RunSpec::new("auroras")).unwrap();
        service.control(&job_id, ControlMessage::Pause).unwrap();

        let mut rx = service.registry().claim_receiver(&job_id).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ControlMessage::Pause);
    }
}
