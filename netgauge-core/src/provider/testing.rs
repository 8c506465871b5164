//! Scripted providers for unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{ProbeContext, Provider, SettledRate};
use crate::error::ProviderError;
use crate::sample::{Phase, SourceKind};

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Record these client rates and settle
    Rates(Vec<f64>),
    /// Record these client RTTs and settle
    Rtts(Vec<f64>),
    /// Return an unavailable error without recording
    Fail,
    /// Record nothing and settle
    Silent,
    /// Never finish
    Hang,
    /// Record these rates, then cancel the session
    CancelAfter(Vec<f64>),
}

pub struct ScriptedProvider {
    name: String,
    phase: Phase,
    behavior: Behavior,
    timeout: Duration,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(name: &str, phase: Phase, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            phase,
            behavior,
            timeout: Duration::from_secs(30),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn measure(&self, ctx: &ProbeContext) -> Result<SettledRate, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sink = ctx.sink(&self.name);

        match &self.behavior {
            Behavior::Rates(rates) => {
                for rate in rates {
                    sink.record_rate(SourceKind::Client, *rate);
                }
                sink.settle()
            }
            Behavior::Rtts(rtts) => {
                for rtt in rtts {
                    sink.record_rtt(SourceKind::Client, *rtt);
                }
                sink.settle()
            }
            Behavior::Fail => Err(ProviderError::unavailable(&self.name, "scripted failure")),
            Behavior::Silent => sink.settle(),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::CancelAfter(rates) => {
                for rate in rates {
                    sink.record_rate(SourceKind::Client, *rate);
                }
                ctx.cancel_token().cancel();
                ctx.check_cancelled()?;
                sink.settle()
            }
        }
    }
}
