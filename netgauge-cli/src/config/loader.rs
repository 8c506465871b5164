use super::types::{
    NetgaugeConfig, RawLogConfig, RawMeasurementConfig, RawNetgaugeConfig, RawStoreConfig,
    StoreConfig,
};
use anyhow::Result;
use netgauge_core::MeasurementConfig;
use netgauge_observe::ObserveConfig;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<NetgaugeConfig> {
        let mut raw = RawNetgaugeConfig::default();

        // Layer 1: User config
        if let Some(user_config) = Self::read_raw(&Self::user_config_path())? {
            raw = Self::merge_raw(raw, user_config);
        }

        // Layer 2: Project config
        if let Some(project_config) = Self::read_raw(&Self::project_config_path())? {
            raw = Self::merge_raw(raw, project_config);
        }

        Self::finalize(raw)
    }

    /// Load a single file with defaults applied
    pub fn load_from_path(path: &Path) -> Result<NetgaugeConfig> {
        let raw = Self::read_raw(path)?.unwrap_or_default();
        Self::finalize(raw)
    }

    fn read_raw(path: &Path) -> Result<Option<RawNetgaugeConfig>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let raw = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))?;
        Ok(Some(raw))
    }

    /// User config path (`$XDG_CONFIG_HOME/netgauge/config.toml`)
    pub fn user_config_path() -> PathBuf {
        netgauge_paths::user_config_file()
    }

    /// Project config path, overridable with `NETGAUGE_PROJECT_CONFIG_DIR`
    pub fn project_config_path() -> PathBuf {
        netgauge_paths::project_config_file()
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawNetgaugeConfig, overlay: RawNetgaugeConfig) -> RawNetgaugeConfig {
        RawNetgaugeConfig {
            log: RawLogConfig {
                filter: overlay.log.filter.or(base.log.filter),
                capture_filter: overlay.log.capture_filter.or(base.log.capture_filter),
                format: overlay.log.format.or(base.log.format),
                ring_entries: overlay.log.ring_entries.or(base.log.ring_entries),
                ring_bytes: overlay.log.ring_bytes.or(base.log.ring_bytes),
            },
            store: RawStoreConfig {
                dir: overlay.store.dir.or(base.store.dir),
            },
            measurement: RawMeasurementConfig {
                min_viable_mbps: overlay
                    .measurement
                    .min_viable_mbps
                    .or(base.measurement.min_viable_mbps),
                user_agent: overlay.measurement.user_agent.or(base.measurement.user_agent),
                latency: overlay.measurement.latency.or(base.measurement.latency),
                download: overlay.measurement.download.or(base.measurement.download),
                upload: overlay.measurement.upload.or(base.measurement.upload),
                persistence: overlay
                    .measurement
                    .persistence
                    .or(base.measurement.persistence),
                progress: overlay.measurement.progress.or(base.measurement.progress),
                resolver: overlay.measurement.resolver.or(base.measurement.resolver),
            },
        }
    }

    /// Convert raw config to final config with defaults applied, then validate
    fn finalize(raw: RawNetgaugeConfig) -> Result<NetgaugeConfig> {
        let log_defaults = ObserveConfig::default();
        let defaults = MeasurementConfig::default();
        let m = raw.measurement;

        let config = NetgaugeConfig {
            log: ObserveConfig {
                filter: raw.log.filter.unwrap_or(log_defaults.filter),
                capture_filter: raw
                    .log
                    .capture_filter
                    .unwrap_or(log_defaults.capture_filter),
                format: raw.log.format.unwrap_or(log_defaults.format),
                ring_entries: raw.log.ring_entries.unwrap_or(log_defaults.ring_entries),
                ring_bytes: raw.log.ring_bytes.unwrap_or(log_defaults.ring_bytes),
            },
            store: raw
                .store
                .dir
                .map(|dir| StoreConfig { dir })
                .unwrap_or_default(),
            measurement: MeasurementConfig {
                latency: m.latency.unwrap_or(defaults.latency),
                download: m.download.unwrap_or(defaults.download),
                upload: m.upload.unwrap_or(defaults.upload),
                min_viable_mbps: m.min_viable_mbps.unwrap_or(defaults.min_viable_mbps),
                persistence: m.persistence.unwrap_or(defaults.persistence),
                progress: m.progress.unwrap_or(defaults.progress),
                resolver: m.resolver.unwrap_or(defaults.resolver),
                user_agent: m.user_agent.unwrap_or(defaults.user_agent),
            },
        };

        config.measurement.validate()?;
        Ok(config)
    }
}
