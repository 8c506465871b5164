use anyhow::Result;
use clap::Args;
use netgauge_core::units::{format_latency, format_speed};
use netgauge_core::{JsonFileStore, ResultStore, StoredResult};
use uuid::Uuid;

use crate::config::NetgaugeConfig;

#[derive(Args)]
pub struct ResultsArgs {
    /// Only show results for this subject
    #[arg(long)]
    pub subject: Option<String>,

    /// Show a single result in full
    #[arg(long, conflicts_with = "subject")]
    pub id: Option<Uuid>,

    /// Maximum number of results to list
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ResultsArgs, config: &NetgaugeConfig) -> Result<()> {
    let store = JsonFileStore::open(&config.store.dir).await?;

    if let Some(id) = args.id {
        let record = store
            .get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No result with id {}", id))?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let mut records = store.list(args.subject.as_deref()).await?;
    records.truncate(args.limit);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No results in {}", store.dir().display());
        return Ok(());
    }

    for record in &records {
        println!("{}", summary_line(record));
    }
    Ok(())
}

fn summary_line(record: &StoredResult) -> String {
    let result = &record.result;
    let estimated = if result.is_upload_estimated { "*" } else { "" };
    format!(
        "{}  {}  {:<12} down {:>11}  up {:>11}{:<1}  {:>7}  {:<9}  {}",
        record.started_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
        record.test_id,
        record.subject.subject_id,
        format_speed(result.download_mbps),
        format_speed(result.upload_mbps),
        estimated,
        format_latency(result.latency_ms),
        result.category.label(),
        if record.cancelled { "cancelled" } else { "" },
    )
    .trim_end()
    .to_string()
}
