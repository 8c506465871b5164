//! HTTP providers
//!
//! Download streams a sized response body, upload issues sequential POSTs
//! of a fixed payload, latency times empty GETs. All three honor
//! cancellation at every chunk or request boundary.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use tracing::{debug, instrument};

use super::{ProbeContext, Provider, RateMeter, SettledRate};
use crate::error::ProviderError;
use crate::sample::{Phase, SourceKind};
use crate::units;

/// Total `dur` of the first `Server-Timing` metric carrying one, in ms
pub fn server_timing_ms(headers: &HeaderMap) -> Option<f64> {
    headers
        .get_all("server-timing")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|metric| {
            metric
                .split(';')
                .skip(1)
                .filter_map(|param| param.trim().strip_prefix("dur="))
                .find_map(|dur| dur.trim_matches('"').parse::<f64>().ok())
        })
}

/// Race a future against cancellation
async fn cancellable<F, T>(ctx: &ProbeContext, fut: F) -> Result<T, ProviderError>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = ctx.cancel_token().cancelled() => Err(ProviderError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Streams a response body and samples the cumulative rate
pub struct HttpDownloadProvider {
    name: String,
    url: String,
    client: reqwest::Client,
    budget: u64,
    window: Duration,
    timeout: Duration,
}

impl HttpDownloadProvider {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
            budget: 25_000_000,
            window: Duration::from_secs(10),
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
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Provider for HttpDownloadProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        Phase::Download
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip(self, ctx), fields(provider = %self.name, url = %self.url))]
    async fn measure(&self, ctx: &ProbeContext) -> Result<SettledRate, ProviderError> {
        let sink = ctx.sink(&self.name);
        let mut meter = RateMeter::start();

        let response = cancellable(ctx, self.client.get(&self.url).send())
            .await??
            .error_for_status()?;
        let mut body = response.bytes_stream();

        while let Some(chunk) = cancellable(ctx, body.next()).await? {
            meter.add(chunk?.len());

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

        debug!(bytes = meter.total(), elapsed = ?meter.elapsed(), "Download finished");
        sink.settle()
    }
}

/// Sequential POSTs of a fixed payload.
///
/// Each completed request yields a client rate. When the endpoint reports
/// its receive time through `Server-Timing` a server rate is recorded too.
pub struct HttpUploadProvider {
    name: String,
    url: String,
    client: reqwest::Client,
    budget: u64,
    window: Duration,
    payload_size: usize,
    timeout: Duration,
}

impl HttpUploadProvider {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
            budget: 10_000_000,
            window: Duration::from_secs(10),
            payload_size: 1_000_000,
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
    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Provider for HttpUploadProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        Phase::Upload
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip(self, ctx), fields(provider = %self.name, url = %self.url))]
    async fn measure(&self, ctx: &ProbeContext) -> Result<SettledRate, ProviderError> {
        let sink = ctx.sink(&self.name);
        let payload = Bytes::from(vec![0u8; self.payload_size]);
        let mut meter = RateMeter::start();

        while !meter.exhausted(self.budget, self.window) {
            ctx.check_cancelled()?;

            let remaining = self.budget - meter.total();
            let body = payload.slice(..payload.len().min(remaining as usize));
            let len = body.len();

            let started = Instant::now();
            let response = cancellable(ctx, self.client.post(&self.url).body(body).send())
                .await??
                .error_for_status()?;
            let elapsed = started.elapsed();

            meter.add(len);
            let client_rate = units::mbps(len as u64, elapsed);
            sink.record_rate(SourceKind::Client, client_rate);

            if let Some(dur) = server_timing_ms(response.headers()).filter(|d| *d > 0.0) {
                let server_rate = units::mbps(len as u64, Duration::from_secs_f64(dur / 1000.0));
                sink.record_rate(SourceKind::Server, server_rate);
            }

            ctx.tick(
                &self.name,
                Some(meter.rate()),
                meter.fraction(self.budget, self.window),
            );
        }

        debug!(bytes = meter.total(), elapsed = ?meter.elapsed(), "Upload finished");
        sink.settle()
    }
}

/// Round-trip time of empty GETs.
///
/// The client RTT is time to response headers. With `Server-Timing` the
/// server's processing time is subtracted for a second, server-side RTT.
pub struct HttpLatencyProvider {
    name: String,
    url: String,
    client: reqwest::Client,
    probes: u32,
    timeout: Duration,
}

impl HttpLatencyProvider {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
            probes: 10,
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

    async fn probe(&self, ctx: &ProbeContext) -> Result<(f64, Option<f64>), ProviderError> {
        let started = Instant::now();
        let response = cancellable(ctx, self.client.get(&self.url).send())
            .await??
            .error_for_status()?;
        let rtt_ms = started.elapsed().as_secs_f64() * 1000.0;
        let server_ms = server_timing_ms(response.headers());
        // drain so the connection returns to the pool
        cancellable(ctx, response.bytes()).await??;
        Ok((rtt_ms, server_ms))
    }
}

#[async_trait]
impl Provider for HttpLatencyProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        Phase::Latency
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip(self, ctx), fields(provider = %self.name, probes = self.probes))]
    async fn measure(&self, ctx: &ProbeContext) -> Result<SettledRate, ProviderError> {
        let sink = ctx.sink(&self.name);

        // Warm-up: connection setup is not latency
        self.probe(ctx).await?;

        for i in 0..self.probes {
            ctx.check_cancelled()?;
            let (rtt_ms, server_ms) = self.probe(ctx).await?;

            sink.record_rtt(SourceKind::Client, rtt_ms);
            if let Some(server_ms) = server_ms {
                let network_ms = rtt_ms - server_ms;
                if network_ms > 0.0 {
                    sink.record_rtt(SourceKind::Server, network_ms);
                }
            }

            ctx.tick(&self.name, None, f64::from(i + 1) / f64::from(self.probes));
        }

        sink.settle()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::header::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::sample::SampleCollector;

    /// Minimal HTTP/1.1 server answering every request with `head` + `body_len` zero bytes
    async fn serve(head: &'static str, body_len: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 8192];
                    // read headers, then any declared body
                    let header_end = loop {
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        request.extend_from_slice(&buf[..n]);
                        if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                            break pos + 4;
                        }
                    };
                    let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
                    let content_length = headers
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    let mut received = request.len() - header_end;
                    while received < content_length {
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        received += n;
                    }

                    let response = format!(
                        "{head}\r\nContent-Length: {body_len}\r\nConnection: close\r\n\r\n"
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.write_all(&vec![0u8; body_len]).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{addr}/")
    }

    fn context(phase: Phase) -> ProbeContext {
        ProbeContext::new(
            phase,
            Arc::new(SampleCollector::new()),
            CancellationToken::new(),
        )
    }

    // ==================== Server-Timing Tests ====================

    #[test]
    fn server_timing_reads_first_duration() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "server-timing",
            HeaderValue::from_static("cfL4;desc=\"x\", cfRequestDuration;dur=12.5"),
        );
        assert_eq!(server_timing_ms(&headers), Some(12.5));
    }

    #[test]
    fn server_timing_absent_or_malformed() {
        let mut headers = HeaderMap::new();
        assert_eq!(server_timing_ms(&headers), None);

        headers.insert("server-timing", HeaderValue::from_static("total;dur=abc"));
        assert_eq!(server_timing_ms(&headers), None);
    }

    // ==================== Download Tests ====================

    #[tokio::test]
    async fn download_records_client_samples() {
        let url = serve("HTTP/1.1 200 OK", 2_000_000).await;
        let provider = HttpDownloadProvider::new("local", url, reqwest::Client::new())
            .with_budget(2_000_000, Duration::from_secs(10));

        let ctx = context(Phase::Download);
        let settled = provider.measure(&ctx).await.unwrap();

        assert_eq!(settled.provider, "local");
        assert!(settled.value > 0.0);
        assert!(settled.samples >= 1);
        let samples = ctx.collector().snapshot(Phase::Download);
        assert!(samples.iter().all(|s| s.source == SourceKind::Client));
    }

    #[tokio::test]
    async fn download_error_status_fails() {
        let url = serve("HTTP/1.1 503 Service Unavailable", 0).await;
        let provider = HttpDownloadProvider::new("down", url, reqwest::Client::new());

        let err = provider.measure(&context(Phase::Download)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Http(_)));
    }

    #[tokio::test]
    async fn download_respects_prior_cancellation() {
        let url = serve("HTTP/1.1 200 OK", 1000).await;
        let provider = HttpDownloadProvider::new("local", url, reqwest::Client::new());

        let ctx = context(Phase::Download);
        ctx.cancel_token().cancel();
        let err = provider.measure(&ctx).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }

    // ==================== Upload Tests ====================

    #[tokio::test]
    async fn upload_records_client_and_server_samples() {
        let url = serve("HTTP/1.1 200 OK\r\nServer-Timing: cfRequestDuration;dur=5", 0).await;
        let provider = HttpUploadProvider::new("local-up", url, reqwest::Client::new())
            .with_budget(300_000, Duration::from_secs(10))
            .with_payload_size(100_000);

        let ctx = context(Phase::Upload);
        let settled = provider.measure(&ctx).await.unwrap();

        let samples = ctx.collector().snapshot(Phase::Upload);
        let client = samples.iter().filter(|s| s.source == SourceKind::Client).count();
        let server = samples.iter().filter(|s| s.source == SourceKind::Server).count();
        assert_eq!(client, 3);
        assert_eq!(server, 3);
        assert_eq!(settled.samples, 6);
    }

    #[tokio::test]
    async fn upload_last_request_is_trimmed_to_budget() {
        let url = serve("HTTP/1.1 200 OK", 0).await;
        let provider = HttpUploadProvider::new("local-up", url, reqwest::Client::new())
            .with_budget(250_000, Duration::from_secs(10))
            .with_payload_size(100_000);

        let ctx = context(Phase::Upload);
        provider.measure(&ctx).await.unwrap();
        assert_eq!(ctx.collector().count(Phase::Upload), 3);
    }

    // ==================== Latency Tests ====================

    #[tokio::test]
    async fn latency_records_rtt_per_probe() {
        let url = serve("HTTP/1.1 200 OK", 0).await;
        let provider =
            HttpLatencyProvider::new("local-rtt", url, reqwest::Client::new()).with_probes(4);

        let ctx = context(Phase::Latency);
        let settled = provider.measure(&ctx).await.unwrap();

        assert_eq!(settled.samples, 4);
        assert!(settled.value > 0.0);
    }

    #[tokio::test]
    async fn latency_subtracts_server_processing_time() {
        let url = serve("HTTP/1.1 200 OK\r\nServer-Timing: total;dur=0.001", 0).await;
        let provider =
            HttpLatencyProvider::new("local-rtt", url, reqwest::Client::new()).with_probes(2);

        let ctx = context(Phase::Latency);
        provider.measure(&ctx).await.unwrap();

        let samples = ctx.collector().snapshot(Phase::Latency);
        assert!(samples.iter().any(|s| s.source == SourceKind::Server));
        assert!(samples.iter().any(|s| s.source == SourceKind::Client));
    }
}
