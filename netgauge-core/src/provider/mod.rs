//! Measurement providers
//!
//! A [`Provider`] runs one phase against one remote target and streams raw
//! samples into the session's [`SampleCollector`]. The orchestration layer
//! only ever sees the [`SettledRate`] a provider returns; transport details
//! (response streams, socket reads, header callbacks) stay behind the trait.

pub mod chain;
pub mod factory;
pub mod heuristic;
pub mod http;
pub mod socket;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{AttemptOutcome, ChainOutcome, PhaseChains, ProviderAttempt, ProviderChain};
pub use factory::ProviderFactory;
pub use heuristic::{ESTIMATOR_NAME, HeuristicEstimator};
pub use http::{HttpDownloadProvider, HttpLatencyProvider, HttpUploadProvider};
pub use socket::{TcpConnectLatencyProvider, TcpDownloadProvider, TcpUploadProvider};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::aggregate::Aggregator;
use crate::error::ProviderError;
use crate::sample::{Phase, Sample, SampleCollector, SourceKind};
use crate::units;

/// Minimum spacing between interim rate samples
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a provider that completed its phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledRate {
    /// Mbps for throughput phases, milliseconds for latency
    pub value: f64,
    /// Samples the provider recorded
    pub samples: usize,
    /// Derived from other observations rather than measured
    pub estimated: bool,
    pub provider: String,
    /// Attempt whose samples produced the value; `None` when estimated
    pub attempt: Option<u64>,
}

/// Interim progress report from a running provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTick {
    pub provider: String,
    pub phase: Phase,
    pub current_mbps: Option<f64>,
    /// Share of the provider's budget used so far, 0.0 to 1.0
    pub fraction: f64,
}

/// Observations from earlier phases available to later providers
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseHints {
    pub latency_ms: Option<f64>,
    pub download_mbps: Option<f64>,
}

/// Everything a provider needs for one measurement
#[derive(Debug, Clone)]
pub struct ProbeContext {
    phase: Phase,
    collector: Arc<SampleCollector>,
    ticks: Option<mpsc::UnboundedSender<ProbeTick>>,
    cancel: CancellationToken,
    hints: PhaseHints,
    attempt: u64,
}

impl ProbeContext {
    pub fn new(phase: Phase, collector: Arc<SampleCollector>, cancel: CancellationToken) -> Self {
        Self {
            phase,
            collector,
            ticks: None,
            cancel,
            hints: PhaseHints::default(),
            attempt: 0,
        }
    }

    #[must_use]
    pub fn with_ticks(mut self, ticks: mpsc::UnboundedSender<ProbeTick>) -> Self {
        self.ticks = Some(ticks);
        self
    }

    #[must_use]
    pub fn with_hints(mut self, hints: PhaseHints) -> Self {
        self.hints = hints;
        self
    }

    /// Tag every sample recorded through this context with `attempt`
    #[must_use]
    pub fn with_attempt(mut self, attempt: u64) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn hints(&self) -> PhaseHints {
        self.hints
    }

    pub fn collector(&self) -> &Arc<SampleCollector> {
        &self.collector
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail fast with [`ProviderError::Cancelled`] at a batch boundary
    pub fn check_cancelled(&self) -> Result<(), ProviderError> {
        if self.cancel.is_cancelled() {
            Err(ProviderError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A sink stamping samples with the provider's name and this attempt
    pub fn sink(&self, provider: &str) -> SampleSink {
        SampleSink {
            collector: Arc::clone(&self.collector),
            provider: provider.to_string(),
            phase: self.phase,
            attempt: self.attempt,
        }
    }

    /// Report interim progress. Never blocks; a closed receiver is ignored.
    pub fn tick(&self, provider: &str, current_mbps: Option<f64>, fraction: f64) {
        if let Some(ticks) = &self.ticks {
            let _ = ticks.send(ProbeTick {
                provider: provider.to_string(),
                phase: self.phase,
                current_mbps,
                fraction: fraction.clamp(0.0, 1.0),
            });
        }
    }
}

/// Write handle into the collector for one provider and phase
#[derive(Debug, Clone)]
pub struct SampleSink {
    collector: Arc<SampleCollector>,
    provider: String,
    phase: Phase,
    attempt: u64,
}

impl SampleSink {
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn record_rate(&self, source: SourceKind, mbps: f64) {
        self.collector.record(
            Sample::rate(self.phase, source, mbps, &self.provider).with_attempt(self.attempt),
        );
    }

    pub fn record_rtt(&self, source: SourceKind, ms: f64) {
        self.collector
            .record(Sample::rtt(source, ms, &self.provider).with_attempt(self.attempt));
    }

    /// Samples this attempt recorded so far
    pub fn count(&self) -> usize {
        self.collector.count_attempt(self.phase, self.attempt)
    }

    /// Reduce this attempt's samples into its settled value.
    ///
    /// Throughput phases use the rate reduction, latency the minimum RTT.
    pub fn settle(&self) -> Result<SettledRate, ProviderError> {
        let values: Vec<f64> = self
            .collector
            .attempt_snapshot(self.phase, self.attempt)
            .iter()
            .map(Sample::value)
            .collect();

        if values.is_empty() {
            return Err(ProviderError::NoSamples {
                provider: self.provider.clone(),
            });
        }

        let value = if self.phase.is_throughput() {
            Aggregator::reduce(&values)
        } else {
            values.iter().copied().fold(f64::INFINITY, f64::min)
        };

        Ok(SettledRate {
            value,
            samples: values.len(),
            estimated: false,
            provider: self.provider.clone(),
            attempt: Some(self.attempt),
        })
    }
}

/// Cumulative transfer meter emitting a rate at most every [`SAMPLE_INTERVAL`]
#[derive(Debug)]
pub(crate) struct RateMeter {
    started: Instant,
    last_emit: Instant,
    total: u64,
}

impl RateMeter {
    pub(crate) fn start() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_emit: now,
            total: 0,
        }
    }

    pub(crate) fn add(&mut self, bytes: usize) {
        self.total += bytes as u64;
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Average rate since start
    pub(crate) fn rate(&self) -> f64 {
        units::mbps(self.total, self.elapsed())
    }

    /// The current rate if a sample interval has passed since the last one
    pub(crate) fn due(&mut self) -> Option<f64> {
        if self.last_emit.elapsed() < SAMPLE_INTERVAL {
            return None;
        }
        self.last_emit = Instant::now();
        Some(self.rate())
    }

    /// Budget share used, by bytes or by time, whichever is further along
    pub(crate) fn fraction(&self, budget: u64, window: Duration) -> f64 {
        let by_bytes = if budget == 0 {
            0.0
        } else {
            self.total as f64 / budget as f64
        };
        let by_time = if window.is_zero() {
            0.0
        } else {
            self.elapsed().as_secs_f64() / window.as_secs_f64()
        };
        by_bytes.max(by_time).min(1.0)
    }

    pub(crate) fn exhausted(&self, budget: u64, window: Duration) -> bool {
        self.total >= budget || self.elapsed() >= window
    }
}

/// A strategy measuring one phase against one target
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique name within a chain
    fn name(&self) -> &str;

    /// The phase this provider measures
    fn phase(&self) -> Phase;

    /// Hard limit enforced by the chain
    fn timeout(&self) -> Duration;

    /// Whether the provider derives its result instead of measuring
    fn is_estimator(&self) -> bool {
        false
    }

    /// Run the probe, recording samples through `ctx.sink(self.name())`
    async fn measure(&self, ctx: &ProbeContext) -> Result<SettledRate, ProviderError>;
}
