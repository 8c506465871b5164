//! Shared test utilities for netgauge-core integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use netgauge_core::store::Result as StoreResult;
use netgauge_core::{
    MeasurementConfig, MemoryResultStore, Phase, PhaseChains, ProbeContext, Provider,
    ProviderChain, ProviderError, ResultStore, SessionDeps, SettledRate, SourceKind,
    StaticResolver, StoreError, StoredId, StoredResult, Subject,
};
use uuid::Uuid;

/// What a [`ScriptedProvider`] does when measured
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum Script {
    /// Record rates (or RTTs in the latency phase), ticking after each
    Samples(Vec<f64>),
    /// Fail without recording
    Fail,
    /// Record samples, then wait for cancellation
    StallAfter(Vec<f64>),
}

pub struct ScriptedProvider {
    name: String,
    phase: Phase,
    script: Script,
    calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ScriptedProvider {
    pub fn new(name: &str, phase: Phase, script: Script) -> Self {
        Self {
            name: name.to_string(),
            phase,
            script,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    fn record(&self, ctx: &ProbeContext, values: &[f64]) {
        let sink = ctx.sink(&self.name);
        for (i, value) in values.iter().enumerate() {
            if self.phase.is_throughput() {
                sink.record_rate(SourceKind::Client, *value);
                ctx.tick(&self.name, Some(*value), (i + 1) as f64 / values.len() as f64);
            } else {
                sink.record_rtt(SourceKind::Client, *value);
                ctx.tick(&self.name, None, (i + 1) as f64 / values.len() as f64);
            }
        }
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
        Duration::from_secs(30)
    }

    async fn measure(&self, ctx: &ProbeContext) -> Result<SettledRate, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Samples(values) => {
                self.record(ctx, values);
                ctx.sink(&self.name).settle()
            }
            Script::Fail => Err(ProviderError::unavailable(&self.name, "scripted failure")),
            Script::StallAfter(values) => {
                self.record(ctx, values);
                ctx.cancel_token().cancelled().await;
                Err(ProviderError::Cancelled)
            }
        }
    }
}

/// Fails the first `failures` saves transiently, then delegates to memory
pub struct FlakyStore {
    pub inner: MemoryResultStore,
    failures: u32,
    pub saves: AtomicU32,
    pub reconnects: AtomicU32,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryResultStore::new(),
            failures,
            saves: AtomicU32::new(0),
            reconnects: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ResultStore for FlakyStore {
    async fn save(&self, record: &StoredResult) -> StoreResult<StoredId> {
        // the write may have landed before the connection dropped
        let n = self.saves.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            self.inner.save(record).await?;
            return Err(StoreError::Transient("connection lost".to_string()));
        }
        self.inner.save(record).await
    }

    async fn reconnect(&self) -> StoreResult<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, test_id: Uuid) -> StoreResult<Option<StoredResult>> {
        self.inner.get(test_id).await
    }

    async fn list(&self, subject_id: Option<&str>) -> StoreResult<Vec<StoredResult>> {
        self.inner.list(subject_id).await
    }
}

#[allow(dead_code)]
pub fn chain(phase: Phase, providers: Vec<ScriptedProvider>) -> ProviderChain {
    providers
        .into_iter()
        .fold(ProviderChain::new(phase), |chain, provider| {
            chain.with_provider(Arc::new(provider))
        })
}

/// Chains with one scripted provider per phase
#[allow(dead_code)]
pub fn simple_chains(latency: Script, download: Script, upload: Script) -> PhaseChains {
    PhaseChains {
        latency: chain(
            Phase::Latency,
            vec![ScriptedProvider::new("rtt", Phase::Latency, latency)],
        ),
        download: chain(
            Phase::Download,
            vec![ScriptedProvider::new("down", Phase::Download, download)],
        ),
        upload: chain(
            Phase::Upload,
            vec![ScriptedProvider::new("up", Phase::Upload, upload)],
        ),
    }
}

#[allow(dead_code)]
pub fn deps(chains: PhaseChains, store: Arc<dyn ResultStore>) -> SessionDeps {
    SessionDeps::new(
        chains,
        store,
        Arc::new(StaticResolver::default()),
        MeasurementConfig::default().with_persistence(3, Duration::from_millis(1)),
    )
}

#[allow(dead_code)]
pub fn subject() -> Subject {
    Subject::new("subject-7", "us-east")
}
