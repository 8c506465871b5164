//! netgauge-core: speed-test measurement and aggregation engine
//!
//! This crate provides the building blocks of a measurement run:
//!
//! - **Samples** - [`Sample`] and the thread-safe [`SampleCollector`]
//! - **Providers** - the [`Provider`] trait, HTTP and TCP implementations,
//!   and the ordered-fallback [`ProviderChain`]
//! - **Aggregation** - [`Aggregator`] reducing samples into an [`AggregateResult`]
//! - **Progress** - [`ProgressChannel`] streaming ordered live updates
//! - **Sessions** - [`MeasurementSession`], the state machine driving a run
//! - **Persistence** - the [`ResultStore`] boundary with bounded retry
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use netgauge_core::{
//!     MeasurementConfig, MeasurementSession, MemoryResultStore, SessionDeps, Subject,
//! };
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryResultStore::new());
//!     let deps = SessionDeps::from_config(MeasurementConfig::default(), store)?;
//!     let session = MeasurementSession::new(Subject::new("user-42", "eu-west"), deps);
//!
//!     let mut progress = session.subscribe();
//!     tokio::spawn(async move {
//!         while let Some(event) = progress.recv().await {
//!             println!("{:>3}% {}", event.percent, event.message);
//!         }
//!     });
//!
//!     let report = session.start().await?;
//!     println!("score {}", report.result.quality_score);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  MeasurementSession                      │
//! │  init → latency → download → upload → finalize           │
//! │            │          │         │          │             │
//! │     ┌──────▼──────────▼─────────▼──┐  ┌────▼─────┐       │
//! │     │        ProviderChain         │  │Aggregator│       │
//! │     │  Provider → Provider → ...   │  └────┬─────┘       │
//! │     └──────────────┬───────────────┘       │             │
//! │             ┌──────▼────────┐        ┌─────▼──────┐      │
//! │             │SampleCollector│        │ResultStore │      │
//! │             └───────────────┘        └────────────┘      │
//! │                    ProgressChannel ──► subscribers       │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod network;
pub mod progress;
pub mod provider;
pub mod sample;
pub mod session;
pub mod store;
pub mod units;

// Re-export key types for convenience
pub use aggregate::{AggregateInputs, AggregateResult, Aggregator, QualityCategory};
pub use config::{MeasurementConfig, PhaseConfig, ProviderKind, ProviderSpec};
pub use error::{
    ChainError, ConfigError, NetgaugeError, ProgressError, ProviderError, ResolveError,
    SessionError, StoreError,
};
pub use network::{NetworkContext, NetworkResolver, StaticResolver, Subject, TraceResolver};
pub use progress::{ProgressChannel, ProgressEvent, ProgressKind, ProgressSubscription, WireEvent};
pub use provider::{
    ChainOutcome, PhaseChains, ProbeContext, Provider, ProviderAttempt, ProviderChain,
    ProviderFactory, SettledRate,
};
pub use sample::{Phase, Sample, SampleCollector, SampleValue, SourceKind};
pub use session::{CancelHandle, MeasurementReport, MeasurementSession, SessionDeps, SessionState};
pub use store::{
    JsonFileStore, MemoryResultStore, PersistOutcome, ResultStore, RetryPolicy, StoredId,
    StoredResult, persist_with_retry,
};
pub use units::format_speed;

/// Result type for netgauge-core operations
pub type Result<T> = std::result::Result<T, NetgaugeError>;
