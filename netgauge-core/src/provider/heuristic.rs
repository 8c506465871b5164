//! Last-resort upload estimate

use std::time::Duration;

use async_trait::async_trait;

use super::{ProbeContext, Provider, SettledRate};
use crate::aggregate::Aggregator;
use crate::error::ProviderError;
use crate::sample::Phase;

/// Name the estimator reports; configured providers may not use it
pub const ESTIMATOR_NAME: &str = "heuristic";

/// Derives an upload rate from earlier phases when every real upload
/// provider failed. Records no samples, so the aggregate result reports the
/// upload as estimated.
///
/// Only upload is supported: a download estimate would hide the one failure
/// that must fail the run.
#[derive(Debug, Clone)]
pub struct HeuristicEstimator {
    name: String,
}

impl Default for HeuristicEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicEstimator {
    pub fn new() -> Self {
        Self {
            name: ESTIMATOR_NAME.to_string(),
        }
    }

    /// Upload rate for a latency band, used when no download rate is known
    fn from_latency(latency_ms: f64) -> f64 {
        if latency_ms < 20.0 {
            20.0
        } else if latency_ms < 50.0 {
            10.0
        } else if latency_ms < 100.0 {
            5.0
        } else {
            1.0
        }
    }
}

#[async_trait]
impl Provider for HeuristicEstimator {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        Phase::Upload
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn is_estimator(&self) -> bool {
        true
    }

    async fn measure(&self, ctx: &ProbeContext) -> Result<SettledRate, ProviderError> {
        let hints = ctx.hints();
        let value = match (hints.download_mbps, hints.latency_ms) {
            (Some(download), _) if download > 0.0 => Aggregator::estimate_upload(download),
            (_, Some(latency)) => Self::from_latency(latency),
            _ => {
                return Err(ProviderError::unavailable(
                    &self.name,
                    "no download or latency observation to estimate from",
                ));
            }
        };

        Ok(SettledRate {
            value,
            samples: 0,
            estimated: true,
            provider: self.name.clone(),
            attempt: None,
        })
    }
}
