//! Ordered fallback across providers

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::{ProbeContext, Provider, SettledRate};
use crate::error::{ChainError, ProviderError};
use crate::sample::Phase;

/// How a single provider attempt ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Settled { value: f64, estimated: bool },
    Failed { reason: String },
}

/// One entry of a chain's attempt log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub phase: Phase,
    pub provider: String,
    pub outcome: AttemptOutcome,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl ProviderAttempt {
    pub fn settled(phase: Phase, settled: &SettledRate, elapsed: Duration) -> Self {
        Self {
            phase,
            provider: settled.provider.clone(),
            outcome: AttemptOutcome::Settled {
                value: settled.value,
                estimated: settled.estimated,
            },
            elapsed,
        }
    }

    pub fn failed(
        phase: Phase,
        provider: impl Into<String>,
        reason: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            phase,
            provider: provider.into(),
            outcome: AttemptOutcome::Failed {
                reason: reason.into(),
            },
            elapsed,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Failed { .. })
    }
}

/// A settled phase plus every attempt made to settle it
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub settled: SettledRate,
    pub attempts: Vec<ProviderAttempt>,
}

impl ChainOutcome {
    pub fn failed_attempts(&self) -> usize {
        self.attempts.iter().filter(|a| a.is_failure()).count()
    }
}

/// Providers for one phase, tried strictly in declared order.
///
/// A provider fails when it errors, exceeds its timeout, records no samples,
/// or settles below `min_viable_mbps` in a throughput phase. A failed
/// provider is never retried.
pub struct ProviderChain {
    phase: Phase,
    providers: Vec<Arc<dyn Provider>>,
    min_viable_mbps: f64,
}

impl std::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderChain")
            .field("phase", &self.phase)
            .field("providers", &self.names())
            .field("min_viable_mbps", &self.min_viable_mbps)
            .finish()
    }
}

impl ProviderChain {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            providers: Vec::new(),
            min_viable_mbps: 1.0,
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    #[must_use]
    pub fn with_min_viable_mbps(mut self, min: f64) -> Self {
        self.min_viable_mbps = min;
        self
    }

    pub fn push(&mut self, provider: Arc<dyn Provider>) {
        self.providers.push(provider);
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Try each provider until one settles acceptably
    #[instrument(skip(self, ctx), fields(phase = %self.phase, providers = self.providers.len()))]
    pub async fn run(&self, ctx: &ProbeContext) -> Result<ChainOutcome, ChainError> {
        if self.providers.is_empty() {
            return Err(ChainError::Empty(self.phase));
        }

        let mut attempts = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            if ctx.is_cancelled() {
                return Err(ChainError::Cancelled {
                    phase: self.phase,
                    attempts,
                    interrupted: None,
                });
            }

            let attempt_id = ctx.collector().next_attempt();
            let attempt_ctx = ctx.clone().with_attempt(attempt_id);

            let started = Instant::now();
            let result = self.attempt(provider.as_ref(), &attempt_ctx).await;
            let elapsed = started.elapsed();

            match result {
                Ok(settled) => {
                    info!(
                        provider = %settled.provider,
                        value = settled.value,
                        samples = settled.samples,
                        estimated = settled.estimated,
                        "Phase settled"
                    );
                    attempts.push(ProviderAttempt::settled(self.phase, &settled, elapsed));
                    return Ok(ChainOutcome { settled, attempts });
                }
                Err(ProviderError::Cancelled) => {
                    attempts.push(ProviderAttempt::failed(
                        self.phase,
                        provider.name(),
                        "cancelled",
                        elapsed,
                    ));
                    return Err(ChainError::Cancelled {
                        phase: self.phase,
                        attempts,
                        interrupted: Some(attempt_id),
                    });
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Provider failed, advancing");
                    attempts.push(ProviderAttempt::failed(
                        self.phase,
                        provider.name(),
                        e.to_string(),
                        elapsed,
                    ));
                }
            }
        }

        Err(ChainError::Exhausted {
            phase: self.phase,
            attempts,
        })
    }

    async fn attempt(
        &self,
        provider: &dyn Provider,
        ctx: &ProbeContext,
    ) -> Result<SettledRate, ProviderError> {
        if provider.phase() != self.phase {
            return Err(ProviderError::UnsupportedPhase {
                provider: provider.name().to_string(),
                phase: self.phase,
            });
        }

        let settled = match tokio::time::timeout(provider.timeout(), provider.measure(ctx)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProviderError::Timeout {
                    provider: provider.name().to_string(),
                    after: provider.timeout(),
                });
            }
        };

        self.accept(provider, settled)
    }

    fn accept(
        &self,
        provider: &dyn Provider,
        settled: SettledRate,
    ) -> Result<SettledRate, ProviderError> {
        if provider.is_estimator() {
            return Ok(SettledRate {
                estimated: true,
                attempt: None,
                ..settled
            });
        }

        if settled.samples == 0 {
            return Err(ProviderError::NoSamples {
                provider: provider.name().to_string(),
            });
        }

        if self.phase.is_throughput() && settled.value < self.min_viable_mbps {
            return Err(ProviderError::BelowThreshold {
                provider: provider.name().to_string(),
                rate: settled.value,
                min: self.min_viable_mbps,
            });
        }

        Ok(settled)
    }
}

/// One chain per phase
#[derive(Debug)]
pub struct PhaseChains {
    pub latency: ProviderChain,
    pub download: ProviderChain,
    pub upload: ProviderChain,
}

impl PhaseChains {
    pub fn get(&self, phase: Phase) -> &ProviderChain {
        match phase {
            Phase::Latency => &self.latency,
            Phase::Download => &self.download,
            Phase::Upload => &self.upload,
        }
    }
}
