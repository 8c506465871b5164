//! Thread-safe sample accumulator
//!
//! Providers may receive client-side and server-side callbacks for the same
//! transfer on independent execution contexts. The collector is the single
//! synchronization point between them: writers append under a short
//! critical section and never hold the lock across an await.
//!
//! Selection and deduplication are read-time concerns of the
//! [`Aggregator`](crate::aggregate::Aggregator); the collector never drops or
//! merges samples.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Phase, Sample};

/// Append-only accumulator of raw samples for one session
#[derive(Debug, Default)]
pub struct SampleCollector {
    samples: Mutex<Vec<Sample>>,
    attempts: AtomicU64,
}

impl SampleCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<Sample>> {
        // A panicking writer cannot leave a half-written Vec::push behind,
        // so the data is still consistent after poisoning.
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a sample
    pub fn record(&self, sample: Sample) {
        self.guard().push(sample);
    }

    /// Samples of a phase ordered by observation time, ties in arrival order
    pub fn snapshot(&self, phase: Phase) -> Vec<Sample> {
        let mut samples: Vec<Sample> = self
            .guard()
            .iter()
            .filter(|s| s.phase == phase)
            .cloned()
            .collect();
        samples.sort_by_key(|s| s.observed_at);
        samples
    }

    /// Number of samples recorded for a phase
    pub fn count(&self, phase: Phase) -> usize {
        self.guard().iter().filter(|s| s.phase == phase).count()
    }

    /// Allocate an attempt id; ids start at 1 and are never reused
    pub fn next_attempt(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Snapshot restricted to the samples of one attempt
    pub fn attempt_snapshot(&self, phase: Phase, attempt: u64) -> Vec<Sample> {
        let mut samples = self.snapshot(phase);
        samples.retain(|s| s.attempt == attempt);
        samples
    }

    /// Number of samples recorded for a phase by one attempt
    pub fn count_attempt(&self, phase: Phase, attempt: u64) -> usize {
        self.guard()
            .iter()
            .filter(|s| s.phase == phase && s.attempt == attempt)
            .count()
    }

    /// Total samples across all phases
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}
