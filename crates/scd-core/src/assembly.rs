//! Indexed reassembly of concurrently fetched segments.
//!
//! The container is pre-sized to the segment count before any fetch starts.
//! Each position is a write-once slot, so concurrent writers never contend on
//! a shared lock; only the completion counter is shared, and the writer that
//! fills the last slot wakes the reader.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio::sync::Notify;

use crate::fetch::FetchError;

/// Outcome of fetching one segment: payload or failure marker.
pub type SegmentResult = Result<Vec<u8>, FetchError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("position {position} out of range (segment count {len})")]
    OutOfRange { position: usize, len: usize },
    #[error("position {position} already recorded")]
    Duplicate { position: usize },
}

/// One or more positions hold a failure marker; no byte stream is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{} of {total} segments failed (positions {missing_positions:?})",
    .missing_positions.len()
)]
pub struct AssemblyError {
    pub missing_positions: Vec<usize>,
    pub total: usize,
    /// True when every failed segment failed transiently (timeouts, 5xx, ...).
    pub all_transient: bool,
}

#[derive(Debug)]
struct Slots {
    slots: Vec<OnceLock<SegmentResult>>,
    recorded: AtomicUsize,
    complete: Notify,
}

impl Slots {
    fn is_complete(&self) -> bool {
        self.recorded.load(Ordering::Acquire) == self.slots.len()
    }
}

/// Shared write side of an assembly. Cheap to clone; one clone per fetch task.
#[derive(Debug, Clone)]
pub struct Reassembler {
    inner: Arc<Slots>,
}

impl Reassembler {
    pub fn new(segment_count: usize) -> Self {
        let slots = (0..segment_count).map(|_| OnceLock::new()).collect();
        Self {
            inner: Arc::new(Slots {
                slots,
                recorded: AtomicUsize::new(0),
                complete: Notify::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Number of positions recorded so far.
    pub fn recorded(&self) -> usize {
        self.inner.recorded.load(Ordering::Acquire)
    }

    /// Record the result for `position`. Returns how many positions are now
    /// recorded. A position can be written exactly once.
    pub fn record(&self, position: usize, result: SegmentResult) -> Result<usize, RecordError> {
        let len = self.len();
        let slot = self
            .inner
            .slots
            .get(position)
            .ok_or(RecordError::OutOfRange { position, len })?;
        slot.set(result)
            .map_err(|_| RecordError::Duplicate { position })?;
        let done = self.inner.recorded.fetch_add(1, Ordering::AcqRel) + 1;
        if done == len {
            self.inner.complete.notify_waiters();
        }
        Ok(done)
    }

    /// Wait (without spinning) until every position is recorded.
    pub async fn wait(&self) -> Assembly {
        loop {
            let notified = self.inner.complete.notified();
            tokio::pin!(notified);
            // Register before checking so a notify between check and await is not lost.
            notified.as_mut().enable();
            if self.inner.is_complete() {
                return Assembly {
                    inner: Arc::clone(&self.inner),
                };
            }
            notified.await;
        }
    }
}

/// A completed assembly: every position holds a result.
#[derive(Debug, Clone)]
pub struct Assembly {
    inner: Arc<Slots>,
}

impl Assembly {
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&SegmentResult> {
        self.inner.slots.get(position).and_then(OnceLock::get)
    }

    /// Positions whose result is a failure or absent.
    pub fn missing_positions(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| !matches!(self.get(i), Some(Ok(_))))
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &FetchError)> + '_ {
        (0..self.len()).filter_map(|i| match self.get(i) {
            Some(Err(e)) => Some((i, e)),
            _ => None,
        })
    }
}

/// Concatenate positions `0..N` strictly in index order. Any failed position
/// fails the whole assembly.
pub fn finalize(assembly: &Assembly) -> Result<Vec<u8>, AssemblyError> {
    let missing = assembly.missing_positions();
    if !missing.is_empty() {
        let all_transient = missing.iter().all(|&i| match assembly.get(i) {
            Some(Err(e)) => e.is_transient(),
            _ => false,
        });
        return Err(AssemblyError {
            missing_positions: missing,
            total: assembly.len(),
            all_transient,
        });
    }

    let size: usize = (0..assembly.len())
        .filter_map(|i| assembly.get(i))
        .map(|r| r.as_ref().map_or(0, Vec::len))
        .sum();
    let mut out = Vec::with_capacity(size);
    for i in 0..assembly.len() {
        if let Some(Ok(bytes)) = assembly.get(i) {
            out.extend_from_slice(bytes);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchCause;

    fn payload(i: usize) -> Vec<u8> {
        vec![b'a' + (i % 26) as u8; i + 1]
    }

    #[tokio::test]
    async fn output_independent_of_completion_order() {
        let n = 6;
        let expected: Vec<u8> = (0..n).flat_map(payload).collect();
        let orders: [[usize; 6]; 4] = [
            [0, 1, 2, 3, 4, 5],
            [5, 4, 3, 2, 1, 0],
            [2, 5, 0, 3, 1, 4],
            [3, 0, 4, 1, 5, 2],
        ];
        for order in orders {
            let r = Reassembler::new(n);
            for &i in &order {
                r.record(i, Ok(payload(i))).unwrap();
            }
            let assembly = r.wait().await;
            assert_eq!(finalize(&assembly).unwrap(), expected, "order {order:?}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_wake_reader() {
        let n = 64;
        let r = Reassembler::new(n);
        let waiter = {
            let r = r.clone();
            tokio::spawn(async move { r.wait().await })
        };
        let mut handles = Vec::new();
        for i in (0..n).rev() {
            let r = r.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                r.record(i, Ok(vec![i as u8])).unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let assembly = waiter.await.unwrap();
        let bytes = finalize(&assembly).unwrap();
        assert_eq!(bytes, (0..n as u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failed_segment_fails_assembly() {
        let r = Reassembler::new(3);
        r.record(0, Ok(b"AA".to_vec())).unwrap();
        r.record(
            1,
            Err(FetchError::new("https://x/1.ts", FetchCause::Status(404))),
        )
        .unwrap();
        r.record(2, Ok(b"CC".to_vec())).unwrap();
        let assembly = r.wait().await;
        let err = finalize(&assembly).unwrap_err();
        assert_eq!(err.missing_positions, vec![1]);
        assert_eq!(err.total, 3);
        assert!(!err.all_transient);
        assert_eq!(assembly.failures().count(), 1);
    }

    #[tokio::test]
    async fn transient_only_failures_are_flagged() {
        let r = Reassembler::new(2);
        r.record(0, Err(FetchError::new("u0", FetchCause::Status(503))))
            .unwrap();
        r.record(1, Err(FetchError::new("u1", FetchCause::Status(500))))
            .unwrap();
        let err = finalize(&r.wait().await).unwrap_err();
        assert_eq!(err.missing_positions, vec![0, 1]);
        assert!(err.all_transient);
    }

    #[test]
    fn duplicate_and_out_of_range_rejected() {
        let r = Reassembler::new(2);
        assert_eq!(r.record(0, Ok(vec![1])), Ok(1));
        assert_eq!(
            r.record(0, Ok(vec![2])),
            Err(RecordError::Duplicate { position: 0 })
        );
        assert_eq!(
            r.record(2, Ok(vec![3])),
            Err(RecordError::OutOfRange { position: 2, len: 2 })
        );
        assert_eq!(r.recorded(), 1);
    }

    #[tokio::test]
    async fn wait_blocks_until_last_position() {
        let r = Reassembler::new(2);
        r.record(1, Ok(b"BB".to_vec())).unwrap();
        let pending = tokio::time::timeout(std::time::Duration::from_millis(20), r.wait()).await;
        assert!(pending.is_err(), "assembly must not complete early");
        r.record(0, Ok(b"AA".to_vec())).unwrap();
        assert_eq!(finalize(&r.wait().await).unwrap(), b"AABB");
    }
}
