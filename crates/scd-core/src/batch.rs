//! Fixed-size batch scheduling with a full barrier between batches.
//!
//! Jobs are split into consecutive groups of at most `batch_size`. All jobs of
//! one group run concurrently; the next group starts only after every job of
//! the current one has reached a terminal outcome. One job's failure (or
//! panic) is recorded for that job alone.

use std::future::Future;

use crate::job::{JobId, RetrievalJob};

#[derive(Debug)]
pub enum JobOutcome<T, E> {
    Succeeded(T),
    Failed(E),
    /// Not run: the item is marked unavailable. It still occupies its slot.
    Skipped,
    /// The job task panicked or was cancelled.
    Panicked(String),
}

impl<T, E> JobOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed(_) | JobOutcome::Panicked(_))
    }
}

#[derive(Debug)]
pub struct JobRecord<T, E> {
    pub job: JobId,
    /// Zero-based batch that ran (or skipped) this job.
    pub batch: usize,
    pub outcome: JobOutcome<T, E>,
}

/// Outcomes of a batch run, in job order.
#[derive(Debug)]
pub struct BatchReport<T, E> {
    pub records: Vec<JobRecord<T, E>>,
}

impl<T, E> BatchReport<T, E> {
    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_failure()).count()
    }

    pub fn skipped(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, JobOutcome::Skipped))
            .count()
    }

    pub fn batches(&self) -> usize {
        self.records.last().map_or(0, |r| r.batch + 1)
    }

    pub fn get(&self, job: JobId) -> Option<&JobRecord<T, E>> {
        self.records.iter().find(|r| r.job == job)
    }
}

/// Run `jobs` in consecutive batches of at most `batch_size` (a size of 0 is
/// treated as 1). Each available job runs on its own task.
pub async fn run_batches<T, E, F, Fut>(
    jobs: Vec<RetrievalJob>,
    batch_size: usize,
    run: F,
) -> BatchReport<T, E>
where
    F: Fn(RetrievalJob) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let batch_size = batch_size.max(1);
    let mut records = Vec::with_capacity(jobs.len());

    for (batch, chunk) in jobs.chunks(batch_size).enumerate() {
        tracing::info!(batch, jobs = chunk.len(), "starting batch");
        let handles: Vec<_> = chunk
            .iter()
            .map(|job| {
                let handle = job.available.then(|| tokio::spawn(run(job.clone())));
                if handle.is_none() {
                    tracing::info!(job = job.id, name = %job.name, "skipping unavailable item");
                }
                (job.id, handle)
            })
            .collect();

        // Barrier: every job of this batch settles before the next batch starts.
        for (job, handle) in handles {
            let outcome = match handle {
                None => JobOutcome::Skipped,
                Some(h) => match h.await {
                    Ok(Ok(v)) => JobOutcome::Succeeded(v),
                    Ok(Err(e)) => JobOutcome::Failed(e),
                    Err(e) => {
                        tracing::error!(job, "job task died: {e}");
                        JobOutcome::Panicked(e.to_string())
                    }
                },
            };
            records.push(JobRecord {
                job,
                batch,
                outcome,
            });
        }
        tracing::debug!(batch, "batch finished");
    }

    BatchReport { records }
}
