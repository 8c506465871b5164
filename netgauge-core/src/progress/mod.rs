//! Live progress reporting
//!
//! Events flow from the session (the only writer) through a
//! [`ProgressChannel`] to any number of read-only subscribers. Each event
//! has a typed form ([`ProgressEvent`]) and a JSON wire form
//! ([`WireEvent`]) for remote callers.

mod channel;

pub use channel::{ProgressChannel, ProgressSubscription};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sample::Phase;

/// Wire-level event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Latency,
    Download,
    Upload,
    Completed,
    Error,
}

impl ProgressKind {
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Latency => Self::Latency,
            Phase::Download => Self::Download,
            Phase::Upload => Self::Upload,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// A live progress update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    /// Session stage that emitted the event (`init`, `download`, `finalize`, ...)
    pub phase: String,
    pub message: String,
    /// 0-100, never decreasing within a session
    pub percent: u8,
    pub current_rate_mbps: Option<f64>,
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        kind: ProgressKind,
        phase: impl Into<String>,
        percent: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            phase: phase.into(),
            message: message.into(),
            percent: percent.min(100),
            current_rate_mbps: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_rate(mut self, mbps: f64) -> Self {
        self.current_rate_mbps = Some(mbps);
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    pub fn to_wire(&self) -> WireEvent {
        WireEvent {
            kind: self.kind,
            phase: self.phase.clone(),
            progress: self.percent,
            current_speed: self.current_rate_mbps,
            message: self.message.clone(),
            data: self.data.clone(),
            timestamp: self.timestamp.timestamp_millis(),
        }
    }
}

/// JSON shape delivered to remote callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub phase: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_speed: Option<f64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}
