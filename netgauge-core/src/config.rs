//! Measurement configuration
//!
//! Every field has a default, so an empty TOML table deserializes into a
//! working configuration that measures against public CDN endpoints.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::provider::ESTIMATOR_NAME;
use crate::sample::Phase;

/// Transport and measurement style of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    HttpDownload,
    HttpUpload,
    HttpLatency,
    TcpDownload,
    TcpUpload,
    TcpConnect,
}

impl ProviderKind {
    /// The only phase this kind of provider can measure
    pub fn phase(&self) -> Phase {
        match self {
            Self::HttpDownload | Self::TcpDownload => Phase::Download,
            Self::HttpUpload | Self::TcpUpload => Phase::Upload,
            Self::HttpLatency | Self::TcpConnect => Phase::Latency,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpDownload => "http_download",
            Self::HttpUpload => "http_upload",
            Self::HttpLatency => "http_latency",
            Self::TcpDownload => "tcp_download",
            Self::TcpUpload => "tcp_upload",
            Self::TcpConnect => "tcp_connect",
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self, Self::HttpDownload | Self::HttpUpload | Self::HttpLatency)
    }
}

/// One configured provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Name reported in attempts and stamped on samples. Unique within a
    /// phase, and never the estimator's reserved name.
    pub name: String,

    pub kind: ProviderKind,

    /// URL for HTTP kinds, `host:port` for TCP kinds.
    /// A `{bytes}` placeholder in a URL is replaced with the byte budget.
    pub target: String,

    /// Hard limit; a provider still running when it expires has failed
    #[serde(default = "default_provider_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Measurement window for throughput kinds. The transfer stops and
    /// settles once the window or the byte budget is used up.
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,

    /// Transfer budget for throughput kinds
    #[serde(default = "default_bytes")]
    pub bytes: u64,

    /// Probe count for latency kinds
    #[serde(default = "default_probes")]
    pub probes: u32,

    /// Read buffer size, or request payload size for HTTP upload
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_provider_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_window() -> Duration {
    Duration::from_secs(10)
}

fn default_bytes() -> u64 {
    25_000_000
}

fn default_probes() -> u32 {
    10
}

fn default_chunk_size() -> usize {
    64 * 1024
}

impl ProviderSpec {
    pub fn new(name: impl Into<String>, kind: ProviderKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            timeout: default_provider_timeout(),
            window: default_window(),
            bytes: default_bytes(),
            probes: default_probes(),
            chunk_size: default_chunk_size(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_probes(mut self, probes: u32) -> Self {
        self.probes = probes;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Target with the `{bytes}` placeholder filled in
    pub fn resolved_target(&self) -> String {
        self.target.replace("{bytes}", &self.bytes.to_string())
    }

    /// Check the target matches the transport and the kind matches `phase`
    pub fn validate(&self, phase: Phase) -> Result<(), ConfigError> {
        if self.name == ESTIMATOR_NAME {
            return Err(ConfigError::ReservedName(self.name.clone()));
        }

        if self.kind.phase() != phase {
            return Err(ConfigError::PhaseMismatch {
                provider: self.name.clone(),
                phase,
            });
        }

        let invalid = |reason: String| ConfigError::InvalidTarget {
            provider: self.name.clone(),
            reason,
        };

        if self.kind.is_http() {
            let url = Url::parse(&self.resolved_target()).map_err(|e| invalid(e.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(invalid(format!("unsupported scheme {}", url.scheme())));
            }
        } else {
            match self.target.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
                _ => return Err(invalid("expected host:port".to_string())),
            }
        }

        if self.chunk_size == 0 {
            return Err(invalid("chunk_size must be positive".to_string()));
        }

        if self.kind.phase().is_throughput() && self.window >= self.timeout {
            return Err(invalid(format!(
                "window {:?} must be shorter than timeout {:?}",
                self.window, self.timeout
            )));
        }

        Ok(())
    }
}

/// Providers for one phase, tried in order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseConfig {
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,

    /// Append the heuristic estimator after the real providers
    #[serde(default)]
    pub estimator: bool,
}

impl PhaseConfig {
    pub fn new(providers: Vec<ProviderSpec>) -> Self {
        Self {
            providers,
            estimator: false,
        }
    }

    #[must_use]
    pub fn with_estimator(mut self) -> Self {
        self.estimator = true;
        self
    }

    /// Check every provider and that names are unique within the phase
    pub fn validate(&self, phase: Phase) -> Result<(), ConfigError> {
        if self.estimator && phase != Phase::Upload {
            return Err(ConfigError::EstimatorUnsupported(phase));
        }

        let mut seen = HashSet::new();
        for spec in &self.providers {
            spec.validate(phase)?;
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateProvider {
                    provider: spec.name.clone(),
                    phase,
                });
            }
        }
        Ok(())
    }
}

/// Retry behavior of the store writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(250)
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay: default_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Broadcast buffer per subscriber
    #[serde(default = "default_progress_capacity")]
    pub capacity: usize,

    /// How long a consumer may keep draining after the terminal event
    #[serde(default = "default_progress_grace", with = "humantime_serde")]
    pub grace: Duration,
}

fn default_progress_capacity() -> usize {
    256
}

fn default_progress_grace() -> Duration {
    Duration::from_secs(2)
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            capacity: default_progress_capacity(),
            grace: default_progress_grace(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_resolver_enabled")]
    pub enabled: bool,

    #[serde(default = "default_trace_url")]
    pub trace_url: String,

    #[serde(default = "default_resolver_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_resolver_enabled() -> bool {
    true
}

fn default_trace_url() -> String {
    "https://speed.cloudflare.com/cdn-cgi/trace".to_string()
}

fn default_resolver_timeout() -> Duration {
    Duration::from_secs(3)
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enabled: default_resolver_enabled(),
            trace_url: default_trace_url(),
            timeout: default_resolver_timeout(),
        }
    }
}

/// Complete configuration of a measurement run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    #[serde(default = "default_latency_phase")]
    pub latency: PhaseConfig,

    #[serde(default = "default_download_phase")]
    pub download: PhaseConfig,

    #[serde(default = "default_upload_phase")]
    pub upload: PhaseConfig,

    /// Throughput providers settling below this rate count as failed
    #[serde(default = "default_min_viable_mbps")]
    pub min_viable_mbps: f64,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub progress: ProgressConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_latency_phase() -> PhaseConfig {
    PhaseConfig::new(vec![
        ProviderSpec::new(
            "cloudflare-latency",
            ProviderKind::HttpLatency,
            "https://speed.cloudflare.com/__down?bytes=0",
        )
        .with_timeout(Duration::from_secs(10)),
        ProviderSpec::new("tcp-connect", ProviderKind::TcpConnect, "1.1.1.1:443")
            .with_timeout(Duration::from_secs(10))
            .with_probes(5),
    ])
}

fn default_download_phase() -> PhaseConfig {
    PhaseConfig::new(vec![
        ProviderSpec::new(
            "cloudflare",
            ProviderKind::HttpDownload,
            "https://speed.cloudflare.com/__down?bytes={bytes}",
        ),
        ProviderSpec::new(
            "ovh",
            ProviderKind::HttpDownload,
            "https://proof.ovh.net/files/10Mb.dat",
        )
        .with_bytes(10_000_000),
    ])
}

fn default_upload_phase() -> PhaseConfig {
    PhaseConfig::new(vec![
        ProviderSpec::new(
            "cloudflare-upload",
            ProviderKind::HttpUpload,
            "https://speed.cloudflare.com/__up",
        )
        .with_bytes(10_000_000)
        .with_chunk_size(1_000_000),
    ])
    .with_estimator()
}

fn default_min_viable_mbps() -> f64 {
    1.0
}

fn default_user_agent() -> String {
    format!("netgauge/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            latency: default_latency_phase(),
            download: default_download_phase(),
            upload: default_upload_phase(),
            min_viable_mbps: default_min_viable_mbps(),
            persistence: PersistenceConfig::default(),
            progress: ProgressConfig::default(),
            resolver: ResolverConfig::default(),
            user_agent: default_user_agent(),
        }
    }
}

impl MeasurementConfig {
    pub fn phase(&self, phase: Phase) -> &PhaseConfig {
        match phase {
            Phase::Latency => &self.latency,
            Phase::Download => &self.download,
            Phase::Upload => &self.upload,
        }
    }

    #[must_use]
    pub fn with_phase(mut self, phase: Phase, config: PhaseConfig) -> Self {
        match phase {
            Phase::Latency => self.latency = config,
            Phase::Download => self.download = config,
            Phase::Upload => self.upload = config,
        }
        self
    }

    #[must_use]
    pub fn with_min_viable_mbps(mut self, min: f64) -> Self {
        self.min_viable_mbps = min;
        self
    }

    #[must_use]
    pub fn with_persistence(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.persistence = PersistenceConfig {
            max_attempts,
            retry_delay,
        };
        self
    }

    #[must_use]
    pub fn without_resolver(mut self) -> Self {
        self.resolver.enabled = false;
        self
    }

    /// Validate every provider against the phase it is configured under
    pub fn validate(&self) -> Result<(), ConfigError> {
        for phase in [Phase::Latency, Phase::Download, Phase::Upload] {
            self.phase(phase).validate(phase)?;
        }
        Ok(())
    }
}
