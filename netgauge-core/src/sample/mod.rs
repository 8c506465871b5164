//! Raw measurement samples

pub mod collector;

pub use collector::SampleCollector;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One segment of a measurement run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Latency,
    Download,
    Upload,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Latency => "latency",
            Self::Download => "download",
            Self::Upload => "upload",
        }
    }

    /// Whether samples of this phase carry a rate rather than a round-trip time
    pub fn is_throughput(&self) -> bool {
        matches!(self, Self::Download | Self::Upload)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the transfer observed a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Measured by this process
    Client,
    /// Reported by the remote endpoint (counters, Server-Timing)
    Server,
}

/// The observed quantity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "snake_case")]
pub enum SampleValue {
    RateMbps(f64),
    RttMs(f64),
}

impl SampleValue {
    pub fn get(&self) -> f64 {
        match self {
            Self::RateMbps(v) | Self::RttMs(v) => *v,
        }
    }
}

/// A single raw observation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub phase: Phase,
    pub source: SourceKind,
    pub value: SampleValue,
    /// Name of the provider that produced the sample
    pub provider: String,
    /// Chain attempt that produced the sample, unique within a session.
    /// Zero for samples recorded outside a chain.
    #[serde(default)]
    pub attempt: u64,
    pub observed_at: DateTime<Utc>,
}

impl Sample {
    /// A throughput observation for the download or upload phase
    pub fn rate(
        phase: Phase,
        source: SourceKind,
        mbps: f64,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            source,
            value: SampleValue::RateMbps(mbps),
            provider: provider.into(),
            attempt: 0,
            observed_at: Utc::now(),
        }
    }

    /// A round-trip observation for the latency phase
    pub fn rtt(source: SourceKind, ms: f64, provider: impl Into<String>) -> Self {
        Self {
            phase: Phase::Latency,
            source,
            value: SampleValue::RttMs(ms),
            provider: provider.into(),
            attempt: 0,
            observed_at: Utc::now(),
        }
    }

    /// Override the observation time (for callbacks reporting after the fact)
    #[must_use]
    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u64) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn value(&self) -> f64 {
        self.value.get()
    }
}
