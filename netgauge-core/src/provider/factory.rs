//! Builds provider chains from configuration

use std::sync::Arc;

use tracing::debug;

use super::{
    HeuristicEstimator, HttpDownloadProvider, HttpLatencyProvider, HttpUploadProvider,
    PhaseChains, Provider, ProviderChain, TcpConnectLatencyProvider, TcpDownloadProvider,
    TcpUploadProvider,
};
use crate::config::{MeasurementConfig, ProviderKind, ProviderSpec};
use crate::error::ConfigError;
use crate::sample::Phase;

/// Creates providers sharing one HTTP connection pool
#[derive(Debug, Clone)]
pub struct ProviderFactory {
    client: reqwest::Client,
}

impl ProviderFactory {
    pub fn new(user_agent: &str) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn build(&self, spec: &ProviderSpec) -> Arc<dyn Provider> {
        let client = self.client.clone();
        let target = spec.resolved_target();

        match spec.kind {
            ProviderKind::HttpDownload => Arc::new(
                HttpDownloadProvider::new(&spec.name, target, client)
                    .with_budget(spec.bytes, spec.window)
                    .with_timeout(spec.timeout),
            ),
            ProviderKind::HttpUpload => Arc::new(
                HttpUploadProvider::new(&spec.name, target, client)
                    .with_budget(spec.bytes, spec.window)
                    .with_payload_size(spec.chunk_size)
                    .with_timeout(spec.timeout),
            ),
            ProviderKind::HttpLatency => Arc::new(
                HttpLatencyProvider::new(&spec.name, target, client)
                    .with_probes(spec.probes)
                    .with_timeout(spec.timeout),
            ),
            ProviderKind::TcpDownload => Arc::new(
                TcpDownloadProvider::new(&spec.name, target)
                    .with_budget(spec.bytes, spec.window)
                    .with_chunk_size(spec.chunk_size)
                    .with_timeout(spec.timeout),
            ),
            ProviderKind::TcpUpload => Arc::new(
                TcpUploadProvider::new(&spec.name, target)
                    .with_budget(spec.bytes, spec.window)
                    .with_chunk_size(spec.chunk_size)
                    .with_timeout(spec.timeout),
            ),
            ProviderKind::TcpConnect => Arc::new(
                TcpConnectLatencyProvider::new(&spec.name, target)
                    .with_probes(spec.probes)
                    .with_timeout(spec.timeout),
            ),
        }
    }

    /// The chain for one phase, estimator last when enabled
    pub fn build_chain(
        &self,
        phase: Phase,
        config: &MeasurementConfig,
    ) -> Result<ProviderChain, ConfigError> {
        let phase_config = config.phase(phase);
        phase_config.validate(phase)?;

        let mut chain = ProviderChain::new(phase).with_min_viable_mbps(config.min_viable_mbps);
        for spec in &phase_config.providers {
            chain.push(self.build(spec));
        }
        if phase_config.estimator {
            chain.push(Arc::new(HeuristicEstimator::new()));
        }

        debug!(%phase, providers = ?chain.names(), "Built provider chain");
        Ok(chain)
    }

    pub fn build_chains(&self, config: &MeasurementConfig) -> Result<PhaseChains, ConfigError> {
        Ok(PhaseChains {
            latency: self.build_chain(Phase::Latency, config)?,
            download: self.build_chain(Phase::Download, config)?,
            upload: self.build_chain(Phase::Upload, config)?,
        })
    }
}
