//! Per-job persistence: snapshot file plus append-only event log
//!
//! Each job owns a directory `<root>/<job_id>/` with:
//! - `job.json` — the mutable snapshot, written atomically (temp + rename)
//! - `events.jsonl` — one self-describing JSON record per line, append-only,
//!   flushed on every record
//!
//! Both files are plain text so external tooling and a human with `grep` can
//! inspect them. While a job is running its control loop is the only writer.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use quill_core::{EventKind, EventRecord, JobId, JobSnapshot, QuillError, Result};
use tracing::{debug, warn};

const SNAPSHOT_FILE: &str = "job.json";
const EVENTS_FILE: &str = "events.jsonl";

pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    /// Open a store rooted at `root`, creating it if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    /// Persist a snapshot atomically
    pub fn save(&self, snapshot: &JobSnapshot) -> Result<()> {
        let dir = self.job_dir(&snapshot.id);
        fs::create_dir_all(&dir)?;

        let path = dir.join(SNAPSHOT_FILE);
        let tmp = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)?;
        fs::rename(&tmp, &path)?;

        debug!(job_id = %snapshot.id, state = %snapshot.state, "snapshot saved");
        Ok(())
    }

    /// Load a snapshot by job id
    pub fn load(&self, job_id: &str) -> Result<JobSnapshot> {
        let path = self.job_dir(job_id).join(SNAPSHOT_FILE);
        if !path.exists() {
            return Err(QuillError::JobNotFound(job_id.to_string()));
        }
        let data = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Append one event record, flushed for durability
    pub fn append_event(&self, job_id: &str, kind: EventKind) -> Result<EventRecord> {
        let dir = self.job_dir(job_id);
        fs::create_dir_all(&dir)?;

        let record = EventRecord::now(kind);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(EVENTS_FILE))?;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.flush()?;
        let _ = file.sync_data();

        Ok(record)
    }

    /// Read the full event log; a missing log is an empty log
    pub fn read_events(&self, job_id: &str) -> Result<Vec<EventRecord>> {
        let path = self.job_dir(job_id).join(EVENTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EventRecord>(&line) {
                Ok(record) => events.push(record),
                Err(e) => {
                    // A torn final line from a crash is expected; skip it.
                    warn!(job_id, "skipping malformed event line: {}", e);
                }
            }
        }
        Ok(events)
    }

    /// Load every job snapshot in the store
    pub fn list_jobs(&self) -> Result<Vec<JobSnapshot>> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().join(SNAPSHOT_FILE).exists() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            match self.load(&id) {
                Ok(snapshot) => jobs.push(snapshot),
                Err(e) => warn!(job_id = %id, "skipping unreadable job: {}", e),
            }
        }
        Ok(jobs)
    }

    /// Find a non-terminal job targeting the same output artifact
    pub fn find_resumable(&self, out_path: &Path) -> Result<Option<JobId>> {
        let target = absolute_path(out_path);
        for job in self.list_jobs()? {
            if job.state.is_terminal() {
                continue;
            }
            if absolute_path(&job.spec.output_path()) == target {
                return Ok(Some(job.id));
            }
        }
        Ok(None)
    }
}

fn absolute_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
