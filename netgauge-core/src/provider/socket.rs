//! Raw TCP providers
//!
//! Throughput against a source/sink endpoint pair in the style of the
//! chargen and discard services, and latency from handshake time.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use super::{ProbeContext, Provider, RateMeter, SettledRate};
use crate::error::ProviderError;
use crate::sample::{Phase, SourceKind};

async fn connect(ctx: &ProbeContext, addr: &str) -> Result<TcpStream, ProviderError> {
    tokio::select! {
        biased;
        _ = ctx.cancel_token().cancelled() => Err(ProviderError::Cancelled),
        stream = TcpStream::connect(addr) => Ok(stream?),
    }
}

/// Reads from a source endpoint until the budget or window is used up
pub struct TcpDownloadProvider {
    name: String,
    addr: String,
    budget: u64,
    window: Duration,
    chunk_size: usize,
    timeout: Duration,
}

impl TcpDownloadProvider {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            budget: 25_000_000,
            window: Duration::from_secs(10),
            chunk_size: 64 * 1024,
            timeout: Duration::from_secs(15),
        }
    }

    #[must_use]
    pub fn with_budget(mut self, bytes: u64, window: Duration) -> Self {
        self.budget = bytes;
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Provider for TcpDownloadProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        Phase::Download
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip(self, ctx), fields(provider = %self.name, addr = %self.addr))]
    async fn measure(&self, ctx: &ProbeContext) -> Result<SettledRate, ProviderError> {
        let sink = ctx.sink(&self.name);
        let mut stream = connect(ctx, &self.addr).await?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut meter = RateMeter::start();

        loop {
            let n = tokio::select! {
                biased;
                _ = ctx.cancel_token().cancelled() => return Err(ProviderError::Cancelled),
                n = stream.read(&mut buf) => n?,
            };
            if n == 0 {
                break;
            }
            meter.add(n);

            if let Some(rate) = meter.due() {
                sink.record_rate(SourceKind::Client, rate);
                ctx.tick(&self.name, Some(rate), meter.fraction(self.budget, self.window));
            }
            if meter.exhausted(self.budget, self.window) {
                break;
            }
        }

        if meter.total() > 0 {
            let rate = meter.rate();
            sink.record_rate(SourceKind::Client, rate);
            ctx.tick(&self.name, Some(rate), 1.0);
        }

        debug!(bytes = meter.total(), elapsed = ?meter.elapsed(), "TCP download finished");
        sink.settle()
    }
}

/// Writes into a sink endpoint until the budget or window is used up
pub struct TcpUploadProvider {
    name: String,
    addr: String,
    budget: u64,
    window: Duration,
    chunk_size: usize,
    timeout: Duration,
}

impl TcpUploadProvider {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            budget: 10_000_000,
            window: Duration::from_secs(10),
            chunk_size: 64 * 1024,
            timeout: Duration::from_secs(15),
        }
    }

    #[must_use]
    pub fn with_budget(mut self, bytes: u64, window: Duration) -> Self {
        self.budget = bytes;
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Provider for TcpUploadProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        Phase::Upload
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip(self, ctx), fields(provider = %self.name, addr = %self.addr))]
    async fn measure(&self, ctx: &ProbeContext) -> Result<SettledRate, ProviderError> {
        let sink = ctx.sink(&self.name);
        let mut stream = connect(ctx, &self.addr).await?;
        let chunk = vec![0u8; self.chunk_size];
        let mut meter = RateMeter::start();

        while !meter.exhausted(self.budget, self.window) {
            let remaining = (self.budget - meter.total()) as usize;
            let slice = &chunk[..chunk.len().min(remaining)];

            tokio::select! {
                biased;
                _ = ctx.cancel_token().cancelled() => return Err(ProviderError::Cancelled),
                written = stream.write_all(slice) => written?,
            }
            meter.add(slice.len());

            if let Some(rate) = meter.due() {
                sink.record_rate(SourceKind::Client, rate);
                ctx.tick(&self.name, Some(rate), meter.fraction(self.budget, self.window));
            }
        }

        stream.shutdown().await?;

        if meter.total() > 0 {
            let rate = meter.rate();
            sink.record_rate(SourceKind::Client, rate);
            ctx.tick(&self.name, Some(rate), 1.0);
        }

        debug!(bytes = meter.total(), elapsed = ?meter.elapsed(), "TCP upload finished");
        sink.settle()
    }
}

/// Latency from TCP handshake time
pub struct TcpConnectLatencyProvider {
    name: String,
    addr: String,
    probes: u32,
    timeout: Duration,
}

impl TcpConnectLatencyProvider {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            probes: 5,
            timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_probes(mut self, probes: u32) -> Self {
        self.probes = probes.max(1);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Provider for TcpConnectLatencyProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        Phase::Latency
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip(self, ctx), fields(provider = %self.name, addr = %self.addr))]
    async fn measure(&self, ctx: &ProbeContext) -> Result<SettledRate, ProviderError> {
        let sink = ctx.sink(&self.name);

        for i in 0..self.probes {
            let started = Instant::now();
            let stream = connect(ctx, &self.addr).await?;
            let rtt_ms = started.elapsed().as_secs_f64() * 1000.0;
            drop(stream);

            sink.record_rtt(SourceKind::Client, rtt_ms);
            ctx.tick(&self.name, None, f64::from(i + 1) / f64::from(self.probes));
        }

        sink.settle()
    }
}
