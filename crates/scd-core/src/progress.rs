//! Progress reporting for retrievals (per segment, per job state, per job).
//!
//! The engine emits events on an optional unbounded channel; without one every
//! call is a no-op, so reporting never affects retrieval.

use tokio::sync::mpsc;

use crate::job::{JobId, JobState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// One segment finished (successfully or not). `done` counts recorded segments.
    SegmentFetched {
        job: JobId,
        position: usize,
        done: usize,
        total: usize,
    },
    /// A job entered a new lifecycle state.
    JobState { job: JobId, state: JobState },
    /// A job reached a terminal state.
    JobFinished { job: JobId, ok: bool },
}

impl ProgressEvent {
    pub fn job(&self) -> JobId {
        match self {
            ProgressEvent::SegmentFetched { job, .. }
            | ProgressEvent::JobState { job, .. }
            | ProgressEvent::JobFinished { job, .. } => *job,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Progress {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl Progress {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Reporter that drops every event.
    pub fn none() -> Self {
        Self::default()
    }

    /// Convenience: a reporter plus the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn segment_fetched(&self, job: JobId, position: usize, done: usize, total: usize) {
        self.emit(ProgressEvent::SegmentFetched {
            job,
            position,
            done,
            total,
        });
    }

    pub fn job_state(&self, job: JobId, state: JobState) {
        self.emit(ProgressEvent::JobState { job, state });
    }

    pub fn job_finished(&self, job: JobId, ok: bool) {
        self.emit(ProgressEvent::JobFinished { job, ok });
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // A closed receiver only means nobody is listening any more.
            let _ = tx.send(event);
        }
    }
}
