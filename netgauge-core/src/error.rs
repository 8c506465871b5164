//! Error types for netgauge-core

use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderAttempt;
use crate::sample::Phase;

/// Top-level error type for netgauge-core
#[derive(Error, Debug)]
pub enum NetgaugeError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Provider chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failure of a single provider's probe. Never fatal on its own: the chain
/// records it and advances to the next provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider {provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("Provider {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("Provider {provider} settled at {rate:.2} Mbps, below the {min:.2} Mbps threshold")]
    BelowThreshold {
        provider: String,
        rate: f64,
        min: f64,
    },

    #[error("Provider {provider} produced no samples")]
    NoSamples { provider: String },

    #[error("Provider {provider} does not support the {phase} phase")]
    UnsupportedPhase { provider: String, phase: Phase },

    #[error("Probe cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from running a provider chain for one phase
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("All {} providers failed for the {phase} phase", .attempts.len())]
    Exhausted {
        phase: Phase,
        attempts: Vec<ProviderAttempt>,
    },

    #[error("No providers configured for the {0} phase")]
    Empty(Phase),

    #[error("Chain cancelled during the {phase} phase")]
    Cancelled {
        phase: Phase,
        attempts: Vec<ProviderAttempt>,
        /// Attempt that was running when the cancel arrived
        interrupted: Option<u64>,
    },
}

impl ChainError {
    /// Attempts made before the chain gave up
    pub fn attempts(&self) -> &[ProviderAttempt] {
        match self {
            Self::Exhausted { attempts, .. } | Self::Cancelled { attempts, .. } => attempts,
            Self::Empty(_) => &[],
        }
    }
}

/// Errors related to the measurement session lifecycle
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No samples collected in the {phase} phase")]
    NoSamplesCollected { phase: Phase },

    #[error("Session cancelled during {during} before any download sample was recorded")]
    Cancelled { during: String },

    #[error("Invalid state transition from {from} on {event}")]
    InvalidStateTransition { from: String, event: String },
}

/// Errors from the persistence boundary
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connectivity loss or similar; worth retrying after a reconnect
    #[error("Transient storage failure: {0}")]
    Transient(String),

    /// Retrying will not help
    #[error("Permanent storage failure: {0}")]
    Permanent(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::PermissionDenied
            | ErrorKind::InvalidInput
            | ErrorKind::InvalidData
            | ErrorKind::Unsupported => Self::Permanent(err.to_string()),
            _ => Self::Transient(err.to_string()),
        }
    }
}

/// Errors from resolving the caller's network context
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Lookup failed: {0}")]
    Lookup(String),

    #[error("Lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised by progress delivery. Never propagated past the channel.
#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Progress consumer disconnected")]
    ConsumerDisconnected,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid target for provider {provider}: {reason}")]
    InvalidTarget { provider: String, reason: String },

    #[error("Provider {provider} cannot run in the {phase} phase")]
    PhaseMismatch { provider: String, phase: Phase },

    #[error("The heuristic estimator cannot stand in for the {0} phase")]
    EstimatorUnsupported(Phase),

    #[error("Provider name {provider} is used twice in the {phase} phase")]
    DuplicateProvider { provider: String, phase: Phase },

    #[error("Provider name {0} is reserved for the estimator")]
    ReservedName(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
