use std::path::PathBuf;

use netgauge_core::MeasurementConfig;
use netgauge_core::config::{PersistenceConfig, PhaseConfig, ProgressConfig, ResolverConfig};
use netgauge_observe::{LogFormat, ObserveConfig};
use serde::{Deserialize, Serialize};

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawNetgaugeConfig {
    #[serde(default)]
    pub log: RawLogConfig,

    #[serde(default)]
    pub store: RawStoreConfig,

    #[serde(default)]
    pub measurement: RawMeasurementConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawLogConfig {
    pub filter: Option<String>,
    pub capture_filter: Option<String>,
    pub format: Option<LogFormat>,
    pub ring_entries: Option<usize>,
    pub ring_bytes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawStoreConfig {
    /// Directory for JSON result files
    pub dir: Option<PathBuf>,
}

/// Measurement settings as stored in TOML.
///
/// Phase sections replace the default chain as a whole; a project file that
/// sets `[measurement.download]` does not inherit the user's download
/// providers.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawMeasurementConfig {
    pub min_viable_mbps: Option<f64>,
    pub user_agent: Option<String>,
    pub latency: Option<PhaseConfig>,
    pub download: Option<PhaseConfig>,
    pub upload: Option<PhaseConfig>,
    pub persistence: Option<PersistenceConfig>,
    pub progress: Option<ProgressConfig>,
    pub resolver: Option<ResolverConfig>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetgaugeConfig {
    #[serde(default)]
    pub log: ObserveConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub measurement: MeasurementConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: netgauge_paths::results_dir(),
        }
    }
}
