//! Terminal progress printer fed by engine progress events.

use scd_core::progress::{Progress, ProgressEvent};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Spawn the printer. It exits once every `Progress` clone is dropped.
pub(super) fn spawn_printer() -> (Progress, JoinHandle<()>) {
    let (progress, mut rx) = Progress::channel();
    let handle = tokio::spawn(async move {
        let mut last_print: Option<Instant> = None;
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::SegmentFetched {
                    job, done, total, ..
                } => {
                    let now = Instant::now();
                    let due = last_print
                        .map_or(true, |t| now.duration_since(t) >= PROGRESS_INTERVAL);
                    if due || done == total {
                        println!("  [{}] segments {}/{}", job, done, total);
                        last_print = Some(now);
                    }
                }
                ProgressEvent::JobState { job, state } => {
                    println!("  [{}] {}", job, state);
                }
                ProgressEvent::JobFinished { .. } => {}
            }
        }
    });
    (progress, handle)
}
