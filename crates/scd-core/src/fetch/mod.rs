//! Segment fetching: the per-URL GET seam and the unbounded fan-out that
//! feeds the reassembler.
//!
//! Every segment of one manifest is fetched in parallel, one blocking task per
//! segment, with no concurrency cap inside a single job.

mod curl_fetcher;
mod error;

pub use curl_fetcher::{CurlFetcher, CurlOptions};
pub use error::{FetchCause, FetchError};

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::assembly::Reassembler;
use crate::extract::SegmentUrl;
use crate::job::JobId;
use crate::progress::Progress;

/// Fetches the full body of one URL.
pub trait SegmentFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

impl<T: SegmentFetcher + ?Sized> SegmentFetcher for Arc<T> {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(url)
    }
}

/// Launch one blocking fetch task per segment. Each task records exactly one
/// result (payload or failure) into `reassembler` at its segment's position,
/// including when the fetcher panics. Returns immediately; wait on the
/// reassembler for completion.
pub fn spawn_fetches<F: SegmentFetcher>(
    fetcher: Arc<F>,
    segments: Vec<SegmentUrl>,
    reassembler: Reassembler,
    progress: Progress,
    job: JobId,
) {
    let total = segments.len();
    for segment in segments {
        let fetcher = Arc::clone(&fetcher);
        let reassembler = reassembler.clone();
        let progress = progress.clone();
        tokio::task::spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| fetcher.fetch(&segment.url)))
                .unwrap_or_else(|_| {
                    Err(FetchError::new(
                        segment.url.clone(),
                        FetchCause::Other("fetch task panicked".to_string()),
                    ))
                });
            match &result {
                Ok(bytes) => tracing::trace!(
                    job,
                    position = segment.position,
                    bytes = bytes.len(),
                    "segment fetched"
                ),
                Err(e) => tracing::warn!(job, position = segment.position, "segment failed: {e}"),
            }
            match reassembler.record(segment.position, result) {
                Ok(done) => progress.segment_fetched(job, segment.position, done, total),
                Err(e) => {
                    tracing::error!(job, position = segment.position, "segment result dropped: {e}")
                }
            }
        });
    }
}
