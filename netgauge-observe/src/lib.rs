//! Logging infrastructure for netgauge.
//!
//! This crate provides:
//! - A `tracing` subscriber setup with `EnvFilter` and plain or JSON output
//! - [`RingLayer`], capturing recent events into a bounded [`LogRing`] under
//!   its own filter, so a quiet console still leaves a detailed trail
//! - [`LogHandle`] for reading captured events after a run

pub mod layer;
pub mod ring;

pub use layer::RingLayer;
pub use ring::{LogEntry, LogRing};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::Filtered;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// Console output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserveConfig {
    /// Console `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// `EnvFilter` directive for events kept in the ring, independent of
    /// the console filter and of `RUST_LOG`
    pub capture_filter: String,
    pub format: LogFormat,
    /// Maximum number of events kept in memory
    pub ring_entries: usize,
    /// Maximum approximate size of kept events
    pub ring_bytes: usize,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
            capture_filter: "info,netgauge_core=debug".to_string(),
            format: LogFormat::Plain,
            ring_entries: 1000,
            ring_bytes: 256 * 1024,
        }
    }
}

impl ObserveConfig {
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_capture_filter(mut self, filter: impl Into<String>) -> Self {
        self.capture_filter = filter.into();
        self
    }

    /// Console filter from `RUST_LOG`, falling back to the configured directive
    pub fn env_filter(&self) -> Result<EnvFilter, ObserveError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => parse_filter(&self.filter),
        }
    }

    /// Filter applied to ring capture only
    pub fn capture_filter(&self) -> Result<EnvFilter, ObserveError> {
        parse_filter(&self.capture_filter)
    }
}

fn parse_filter(directive: &str) -> Result<EnvFilter, ObserveError> {
    EnvFilter::try_new(directive).map_err(|e| ObserveError::InvalidFilter(e.to_string()))
}

/// Ring capture layer carrying its own per-layer filter
pub fn capture_layer<S>(
    ring: Arc<LogRing>,
    config: &ObserveConfig,
) -> Result<Filtered<RingLayer, EnvFilter, S>, ObserveError>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    Ok(RingLayer::new(ring).with_filter(config.capture_filter()?))
}

#[derive(Error, Debug)]
pub enum ObserveError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Access to the events captured since [`init`]
#[derive(Debug, Clone)]
pub struct LogHandle {
    ring: Arc<LogRing>,
}

impl LogHandle {
    pub fn new(ring: Arc<LogRing>) -> Self {
        Self { ring }
    }

    /// Up to `n` most recent entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        self.ring.recent(n)
    }

    pub fn ring(&self) -> &Arc<LogRing> {
        &self.ring
    }
}

/// Install the global subscriber: console output and ring capture, each
/// behind its own filter.
///
/// Console output goes to stderr so stdout stays free for results.
pub fn init(config: &ObserveConfig) -> Result<LogHandle, ObserveError> {
    let console = config.env_filter()?;
    let ring = Arc::new(LogRing::new(config.ring_entries, config.ring_bytes));
    let capture = capture_layer(Arc::clone(&ring), config)?;

    let registry = tracing_subscriber::registry().with(capture);
    match config.format {
        LogFormat::Plain => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(console),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_filter(console),
            )
            .try_init()?,
    }

    Ok(LogHandle::new(ring))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_quiet() {
        let config = ObserveConfig::default();
        assert_eq!(config.filter, "warn");
        assert_eq!(config.format, LogFormat::Plain);
    }

    #[test]
    fn config_deserializes_partial_toml_style_json() {
        let config: ObserveConfig =
            serde_json::from_str(r#"{"format":"json","ring_entries":10}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.ring_entries, 10);
        assert_eq!(config.ring_bytes, 256 * 1024);
    }

    #[test]
    fn invalid_filter_directive_is_rejected() {
        let config = ObserveConfig::default().with_filter("netgauge=notalevel");
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(
                config.env_filter(),
                Err(ObserveError::InvalidFilter(_))
            ));
        }
    }

    #[test]
    fn invalid_capture_filter_is_rejected() {
        let config = ObserveConfig::default().with_capture_filter("netgauge=notalevel");
        assert!(matches!(
            config.capture_filter(),
            Err(ObserveError::InvalidFilter(_))
        ));
    }

    // ==================== Capture Filter Tests ====================

    #[test]
    fn ring_keeps_events_below_the_console_level() {
        let config = ObserveConfig::default();
        let ring = Arc::new(LogRing::new(100, usize::MAX));
        let console = Arc::new(LogRing::new(100, usize::MAX));
        let subscriber = tracing_subscriber::registry()
            .with(capture_layer(Arc::clone(&ring), &config).unwrap())
            .with(
                RingLayer::new(Arc::clone(&console))
                    .with_filter(parse_filter(&config.filter).unwrap()),
            );

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(target: "netgauge_core::session", "Phase started");
            tracing::info!(target: "netgauge_cli", "Result saved");
            tracing::debug!(target: "hyper::client", "Connection reused");
            tracing::warn!(target: "netgauge_core::provider", "Provider failed");
        });

        let kept: Vec<String> = ring.recent(100).into_iter().map(|e| e.message).collect();
        assert_eq!(kept, ["Phase started", "Result saved", "Provider failed"]);
        let shown: Vec<String> = console.recent(100).into_iter().map(|e| e.message).collect();
        assert_eq!(shown, ["Provider failed"]);
    }

    #[test]
    fn log_handle_reads_shared_ring() {
        let ring = Arc::new(LogRing::new(10, 1024));
        let handle = LogHandle::new(Arc::clone(&ring));
        ring.push(LogEntry::new(tracing::Level::INFO, "netgauge", "hello"));
        assert_eq!(handle.recent(5).len(), 1);
    }
}
