use crate::config::{ConfigLoader, NetgaugeConfig};
use anyhow::Result;
use clap::{Args, Subcommand};
use netgauge_core::{MeasurementConfig, Phase, ProviderSpec};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration (merged)
    Show,
    /// Show configuration file paths
    Path,
    /// List the fallback order of each phase
    Providers,
}

pub fn run(args: ConfigArgs, config: &NetgaugeConfig) -> Result<()> {
    match args.command {
        ConfigCommands::Show => show_config(config),
        ConfigCommands::Path => show_paths(config),
        ConfigCommands::Providers => {
            print!("{}", provider_table(&config.measurement));
            Ok(())
        }
    }
}

fn show_config(config: &NetgaugeConfig) -> Result<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_paths(config: &NetgaugeConfig) -> Result<()> {
    println!("User config:    {}", ConfigLoader::user_config_path().display());
    println!("Project config: {}", ConfigLoader::project_config_path().display());
    println!("Results:        {}", config.store.dir.display());
    Ok(())
}

fn describe(spec: &ProviderSpec) -> String {
    let detail = if spec.kind.phase().is_throughput() {
        format!("{} bytes within {:?}", spec.bytes, spec.window)
    } else {
        format!("{} probes", spec.probes)
    };
    format!(
        "{} [{}] {} ({detail}, timeout {:?})",
        spec.name,
        spec.kind.as_str(),
        spec.resolved_target(),
        spec.timeout
    )
}

fn provider_table(measurement: &MeasurementConfig) -> String {
    let mut out = format!("Minimum viable rate: {} Mbps\n", measurement.min_viable_mbps);
    for phase in [Phase::Latency, Phase::Download, Phase::Upload] {
        let phase_config = measurement.phase(phase);
        out.push_str(&format!("\n{phase}:\n"));
        for (i, spec) in phase_config.providers.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", i + 1, describe(spec)));
        }
        if phase_config.estimator {
            out.push_str(&format!(
                "  {}. heuristic (estimated from download)\n",
                phase_config.providers.len() + 1
            ));
        }
        if phase_config.providers.is_empty() && !phase_config.estimator {
            out.push_str("  (none)\n");
        }
    }
    out
}
