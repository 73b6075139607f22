//! Resume-point reconstruction from the event log
//!
//! The event log is the sole source of truth after a crash. A forward scan
//! finds the highest chunk index with a `chunk_done` record; a
//! `chunk_started` without a matching `chunk_done` was interrupted and is
//! regenerated. Recovery never touches the output artifact — it only decides
//! where generation logically continues.

use quill_core::{EventKind, EventRecord};

/// Where an interrupted job picks back up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    /// Highest chunk index with a durable `chunk_done`, if any
    pub last_done: Option<usize>,
}

impl ResumePoint {
    /// Index of the first chunk to (re)generate
    pub fn next_chunk(&self) -> usize {
        self.last_done.map(|c| c + 1).unwrap_or(0)
    }

    /// True when nothing has completed and the run starts from seed
    pub fn is_fresh(&self) -> bool {
        self.last_done.is_none()
    }
}

/// Scan an event log forward and compute the resume point
pub fn resume_point(events: &[EventRecord]) -> ResumePoint {
    let mut last_done = None;
    for record in events {
        if let EventKind::ChunkDone { chunk, .. } = &record.kind {
            if last_done.map(|d| *chunk > d).unwrap_or(true) {
                last_done = Some(*chunk);
            }
        }
    }
    ResumePoint { last_done }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(chunk: usize) -> EventRecord {
        EventRecord::now(EventKind::ChunkDone {
            chunk,
            bytes: 100,
            extended: false,
            hint: None,
        })
    }

    fn started(chunk: usize) -> EventRecord {
        EventRecord::now(EventKind::ChunkStarted { chunk })
    }

    #[test]
    fn test_empty_log_starts_from_seed() {
        let point = resume_point(&[]);
        assert!(point.is_fresh());
        assert_eq!(point.next_chunk(), 0);
    }

    #[test]
    fn test_resumes_after_highest_done() {
        let events = vec![
            EventRecord::now(EventKind::JobStarted),
            started(0),
            done(0),
            started(1),
            done(1),
            started(2),
            done(2),
        ];
        let point = resume_point(&events);
        assert_eq!(point.last_done, Some(2));
        assert_eq!(point.next_chunk(), 3);
    }

    #[test]
    fn test_interrupted_chunk_is_regenerated() {
        let events = vec![started(0), done(0), started(1)];
        let point = resume_point(&events);
        assert_eq!(point.last_done, Some(0));
        assert_eq!(point.next_chunk(), 1);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let events = vec![started(0), done(0), started(1), done(1)];
        let first = resume_point(&events);
        let second = resume_point(&events);
        assert_eq!(first, second);
        assert_eq!(first.next_chunk(), 2);
    }

    #[test]
    fn test_only_started_resumes_from_seed() {
        let events = vec![EventRecord::now(EventKind::JobStarted), started(0)];
        let point = resume_point(&events);
        assert!(point.is_fresh());
        assert_eq!(point.next_chunk(), 0);
    }
}
