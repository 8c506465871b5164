//! Measurement session orchestration
//!
//! A [`MeasurementSession`] drives one run: it resolves the network
//! context, runs the latency, download and upload chains in order, hands
//! the selected samples to the [`Aggregator`], persists the result and
//! reports progress throughout. It is the only writer of its
//! [`ProgressChannel`]; providers report interim progress over an mpsc
//! channel that the session relays.

mod report;
mod state;

pub use report::MeasurementReport;
pub use state::{SessionState, Transition};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::aggregate::{AggregateInputs, Aggregator};
use crate::config::MeasurementConfig;
use crate::error::{ChainError, ConfigError, SessionError};
use crate::network::{NetworkContext, NetworkResolver, StaticResolver, Subject, TraceResolver};
use crate::progress::{ProgressChannel, ProgressEvent, ProgressKind, ProgressSubscription};
use crate::provider::{
    ChainOutcome, PhaseChains, PhaseHints, ProbeContext, ProbeTick, ProviderAttempt,
    ProviderFactory,
};
use crate::sample::{Phase, Sample, SampleCollector};
use crate::store::{ResultStore, RetryPolicy, StoredResult, persist_with_retry};
use crate::units;

/// Latency reported in progress when every latency provider failed
pub const LATENCY_SENTINEL_MS: f64 = 999.0;

/// Collaborators a session runs against
pub struct SessionDeps {
    pub chains: PhaseChains,
    pub store: Arc<dyn ResultStore>,
    pub resolver: Arc<dyn NetworkResolver>,
    pub config: MeasurementConfig,
}

impl SessionDeps {
    pub fn new(
        chains: PhaseChains,
        store: Arc<dyn ResultStore>,
        resolver: Arc<dyn NetworkResolver>,
        config: MeasurementConfig,
    ) -> Self {
        Self {
            chains,
            store,
            resolver,
            config,
        }
    }

    /// Build chains and resolver from configuration
    pub fn from_config(
        config: MeasurementConfig,
        store: Arc<dyn ResultStore>,
    ) -> Result<Self, ConfigError> {
        let factory = ProviderFactory::new(&config.user_agent)?;
        Self::with_factory(&factory, config, store)
    }

    /// Like [`from_config`](Self::from_config), reusing a factory's HTTP pool
    pub fn with_factory(
        factory: &ProviderFactory,
        config: MeasurementConfig,
        store: Arc<dyn ResultStore>,
    ) -> Result<Self, ConfigError> {
        let chains = factory.build_chains(&config)?;
        let resolver: Arc<dyn NetworkResolver> = if config.resolver.enabled {
            Arc::new(TraceResolver::new(
                factory.client().clone(),
                &config.resolver.trace_url,
                config.resolver.timeout,
            ))
        } else {
            Arc::new(StaticResolver::default())
        };
        Ok(Self::new(chains, store, resolver, config))
    }
}

/// Cancels a running session from another task
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Which samples of a phase feed the aggregate
#[derive(Debug, Clone, Copy, PartialEq)]
enum Selection {
    /// Samples of one chain attempt: the settling one, or the one a cancel
    /// interrupted
    Attempt(u64),
    /// Settled by an estimator; no measured samples are used
    Estimated,
}

enum PhaseResult {
    Settled(ChainOutcome),
    Failed(ChainError),
    Cancelled(ChainError),
}

/// One measurement run. Consumed by [`start`](Self::start).
pub struct MeasurementSession {
    session_id: Uuid,
    test_id: Uuid,
    subject: Subject,
    state: SessionState,
    deps: SessionDeps,
    collector: Arc<SampleCollector>,
    progress: ProgressChannel,
    cancel: CancellationToken,
    attempts: Vec<ProviderAttempt>,
    selections: HashMap<Phase, Selection>,
    hints: PhaseHints,
    network: Option<NetworkContext>,
    started_at: DateTime<Utc>,
}

impl MeasurementSession {
    pub fn new(subject: Subject, deps: SessionDeps) -> Self {
        let progress = ProgressChannel::new(deps.config.progress.capacity);
        Self {
            session_id: Uuid::new_v4(),
            test_id: Uuid::now_v7(),
            subject,
            state: SessionState::Init,
            deps,
            collector: Arc::new(SampleCollector::new()),
            progress,
            cancel: CancellationToken::new(),
            attempts: Vec::new(),
            selections: HashMap::new(),
            hints: PhaseHints::default(),
            network: None,
            started_at: Utc::now(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn test_id(&self) -> Uuid {
        self.test_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn subscribe(&self) -> ProgressSubscription {
        self.progress.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.cancel.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run every phase to completion.
    ///
    /// Errors only when download produced no usable sample, or when the run
    /// was cancelled before any download sample was recorded.
    #[instrument(
        skip(self),
        fields(session_id = %self.session_id, test_id = %self.test_id, subject = %self.subject.subject_id)
    )]
    pub async fn start(mut self) -> Result<MeasurementReport, SessionError> {
        self.started_at = Utc::now();
        info!(region = %self.subject.region, "Measurement started");

        let result = self.drive().await;

        match &result {
            Ok(report) => {
                let mut event = ProgressEvent::new(
                    ProgressKind::Completed,
                    self.state.as_str(),
                    100,
                    "Measurement complete",
                );
                if let Ok(data) = serde_json::to_value(report) {
                    event = event.with_data(data);
                }
                self.progress.push(event);
                info!(
                    download_mbps = report.result.download_mbps,
                    upload_mbps = report.result.upload_mbps,
                    latency_ms = report.result.latency_ms,
                    score = report.result.quality_score,
                    persisted = report.persisted,
                    "Measurement completed"
                );
            }
            Err(e) => {
                if !self.state.is_terminal() {
                    // Fail is accepted from every non-terminal state
                    let _ = self.apply(Transition::Fail);
                }
                let event = ProgressEvent::new(
                    ProgressKind::Error,
                    self.state.as_str(),
                    self.progress.percent(),
                    e.to_string(),
                )
                .with_data(serde_json::json!({ "error": e.to_string() }));
                self.progress.push(event);
                warn!(error = %e, "Measurement failed");
            }
        }

        self.progress.close();
        result
    }

    async fn drive(&mut self) -> Result<MeasurementReport, SessionError> {
        self.resolve_network().await;

        for phase in [Phase::Latency, Phase::Download, Phase::Upload] {
            if self.cancel.is_cancelled() {
                return self.abort().await;
            }
            self.apply(Transition::Advance)?;

            match self.run_phase(phase).await {
                PhaseResult::Settled(outcome) => self.settle(phase, outcome),
                PhaseResult::Cancelled(err) => {
                    self.attempts.extend_from_slice(err.attempts());
                    if let ChainError::Cancelled {
                        interrupted: Some(attempt),
                        ..
                    } = err
                    {
                        self.selections.insert(phase, Selection::Attempt(attempt));
                    }
                    return self.abort().await;
                }
                PhaseResult::Failed(err) => {
                    self.attempts.extend_from_slice(err.attempts());
                    self.phase_failed(phase, &err)?;
                }
            }
        }

        self.apply(Transition::Advance)?;
        self.finalize().await
    }

    fn apply(&mut self, transition: Transition) -> Result<(), SessionError> {
        let next = self.state.transition(transition)?;
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
        Ok(())
    }

    fn emit(&self, percent: u8, message: impl Into<String>) -> u8 {
        self.progress.push(ProgressEvent::new(
            self.state.progress_kind(),
            self.state.as_str(),
            percent,
            message,
        ))
    }

    async fn resolve_network(&mut self) {
        self.emit(0, "Resolving network");

        let timeout = self.deps.config.resolver.timeout;
        let resolved = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, self.deps.resolver.resolve(&self.subject)) => Some(result),
        };

        let network = match resolved {
            Some(Ok(Ok(context))) => context,
            Some(Ok(Err(e))) => {
                warn!(error = %e, "Network lookup failed, using placeholder");
                NetworkContext::placeholder(&self.subject.region)
            }
            Some(Err(_)) => {
                warn!(?timeout, "Network lookup timed out, using placeholder");
                NetworkContext::placeholder(&self.subject.region)
            }
            None => NetworkContext::placeholder(&self.subject.region),
        };

        self.network = Some(network);
        self.emit(5, "Network resolved");
    }

    /// Run one phase's chain, relaying provider ticks as progress
    async fn run_phase(&self, phase: Phase) -> PhaseResult {
        let (start, _) = self.state.percent_band();
        self.emit(start, format!("Measuring {phase}"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = ProbeContext::new(phase, Arc::clone(&self.collector), self.cancel.clone())
            .with_ticks(tx)
            .with_hints(self.hints);

        let run = self.deps.chains.get(phase).run(&ctx);
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                Some(tick) = rx.recv() => self.relay(&tick),
            }
        };
        while let Ok(tick) = rx.try_recv() {
            self.relay(&tick);
        }

        match result {
            Ok(outcome) => PhaseResult::Settled(outcome),
            Err(err @ ChainError::Cancelled { .. }) => PhaseResult::Cancelled(err),
            Err(err) => PhaseResult::Failed(err),
        }
    }

    fn relay(&self, tick: &ProbeTick) {
        let (start, end) = self.state.percent_band();
        // keep the band end for the settled event
        let span = f64::from(end - start - 1);
        let percent = start + (tick.fraction * span).round() as u8;

        let message = match tick.current_mbps {
            Some(mbps) => format!("{} via {}", units::format_speed(mbps), tick.provider),
            None => format!("Probing via {}", tick.provider),
        };
        let mut event =
            ProgressEvent::new(self.state.progress_kind(), self.state.as_str(), percent, message);
        if let Some(mbps) = tick.current_mbps {
            event = event.with_rate(mbps);
        }
        self.progress.push(event);
    }

    fn settle(&mut self, phase: Phase, outcome: ChainOutcome) {
        let settled = &outcome.settled;
        let (_, end) = self.state.percent_band();

        match phase {
            Phase::Latency => {
                self.hints.latency_ms = Some(settled.value);
                self.progress.push(
                    ProgressEvent::new(
                        self.state.progress_kind(),
                        self.state.as_str(),
                        end,
                        format!("Latency {}", units::format_latency(settled.value)),
                    )
                    .with_data(serde_json::json!({ "latencyMs": settled.value })),
                );
            }
            Phase::Download | Phase::Upload => {
                if phase == Phase::Download {
                    self.hints.download_mbps = Some(settled.value);
                }
                let message = if settled.estimated {
                    format!("{phase} estimated at {}", units::format_speed(settled.value))
                } else {
                    format!("{phase} {}", units::format_speed(settled.value))
                };
                self.progress.push(
                    ProgressEvent::new(
                        self.state.progress_kind(),
                        self.state.as_str(),
                        end,
                        message,
                    )
                    .with_rate(settled.value)
                    .with_data(serde_json::json!({
                        "provider": settled.provider,
                        "estimated": settled.estimated,
                    })),
                );
            }
        }

        let selection = match settled.attempt {
            Some(attempt) if !settled.estimated => Selection::Attempt(attempt),
            _ => Selection::Estimated,
        };
        self.selections.insert(phase, selection);
        self.attempts.extend(outcome.attempts);
    }

    fn phase_failed(&mut self, phase: Phase, err: &ChainError) -> Result<(), SessionError> {
        let (_, end) = self.state.percent_band();

        match phase {
            Phase::Latency => {
                warn!(error = %err, "Latency unavailable, continuing");
                self.progress.push(
                    ProgressEvent::new(
                        self.state.progress_kind(),
                        self.state.as_str(),
                        end,
                        "Latency unavailable",
                    )
                    .with_data(serde_json::json!({ "latencyMs": LATENCY_SENTINEL_MS })),
                );
                Ok(())
            }
            Phase::Download => {
                warn!(error = %err, "Download failed on every provider");
                self.apply(Transition::Fail)?;
                Err(SessionError::NoSamplesCollected {
                    phase: Phase::Download,
                })
            }
            Phase::Upload => {
                warn!(error = %err, "Upload failed on every provider, will estimate");
                self.emit(end, "Upload unavailable, estimating");
                Ok(())
            }
        }
    }

    /// Cancellation: salvage partial download data or fail
    async fn abort(&mut self) -> Result<MeasurementReport, SessionError> {
        let during = self.state.as_str().to_string();
        self.apply(Transition::Cancel)?;
        info!(%during, "Measurement cancelled");

        if !self.selected(Phase::Download).is_empty() {
            self.apply(Transition::Salvage)?;
            self.finalize().await
        } else {
            self.apply(Transition::Fail)?;
            Err(SessionError::Cancelled { during })
        }
    }

    /// Samples feeding the aggregate; failed attempts never contribute
    fn selected(&self, phase: Phase) -> Vec<Sample> {
        match self.selections.get(&phase) {
            Some(Selection::Attempt(attempt)) => self.collector.attempt_snapshot(phase, *attempt),
            Some(Selection::Estimated) | None => Vec::new(),
        }
    }

    async fn finalize(&mut self) -> Result<MeasurementReport, SessionError> {
        let (start, end) = self.state.percent_band();
        self.emit(start, "Aggregating results");

        let download = self.selected(Phase::Download);
        let upload = self.selected(Phase::Upload);
        let latency = self.selected(Phase::Latency);
        let result = Aggregator::finalize(AggregateInputs {
            download: &download,
            upload: &upload,
            latency: &latency,
        });

        let record = StoredResult {
            test_id: self.test_id,
            session_id: self.session_id,
            subject: self.subject.clone(),
            network: self
                .network
                .clone()
                .unwrap_or_else(|| NetworkContext::placeholder(&self.subject.region)),
            result,
            attempted_providers: self.attempts.clone(),
            cancelled: self.cancel.is_cancelled(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        };

        self.emit(start + (end - start) / 2, "Saving results");
        let policy = RetryPolicy::from_config(&self.deps.config.persistence);
        let outcome = persist_with_retry(self.deps.store.as_ref(), &record, policy).await;
        if !outcome.persisted {
            warn!(attempts = outcome.attempts, "Result not persisted");
        }
        self.emit(end, "Results ready");

        self.apply(Transition::Advance)?;
        Ok(MeasurementReport::new(record, outcome))
    }
}
