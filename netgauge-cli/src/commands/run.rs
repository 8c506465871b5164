use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use netgauge_core::units::{format_latency, format_speed};
use netgauge_core::{
    JsonFileStore, MeasurementReport, MeasurementSession, ProgressSubscription, SessionDeps,
    Subject,
};
use netgauge_observe::LogHandle;
use tracing::{debug, warn};

use crate::config::NetgaugeConfig;

/// How many captured log lines `--dump-logs` prints
const DUMP_LOG_LINES: usize = 200;

#[derive(Args)]
pub struct RunArgs {
    /// Identifier the result is stored under
    #[arg(long, default_value = "local")]
    pub subject: String,

    /// Region label attached to the result
    #[arg(long, default_value = "unknown")]
    pub region: String,

    /// Stream progress and the final report as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Print captured logs after the run
    #[arg(long)]
    pub dump_logs: bool,
}

pub async fn run(args: RunArgs, config: NetgaugeConfig, logs: LogHandle) -> Result<()> {
    let store = match JsonFileStore::open(&config.store.dir).await {
        Ok(store) => store,
        Err(e) => {
            warn!(dir = %config.store.dir.display(), error = %e, "Results directory unavailable");
            JsonFileStore::deferred(&config.store.dir)
        }
    };
    let grace = config.measurement.progress.grace;
    let deps = SessionDeps::from_config(config.measurement, Arc::new(store))?;

    let session = MeasurementSession::new(Subject::new(&args.subject, &args.region), deps);
    debug!(session_id = %session.session_id(), "Session created");

    let printer = tokio::spawn(print_progress(session.subscribe(), args.json));

    let cancel = session.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            cancel.cancel();
        }
    });

    let outcome = session.start().await;
    interrupt.abort();

    // the channel is closed by now; give the printer a bounded time to drain
    if tokio::time::timeout(grace, printer).await.is_err() {
        warn!(?grace, "Progress consumer did not drain in time");
    }

    let result = match outcome {
        Ok(report) => {
            if !args.json {
                print_report(&report);
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    };

    if args.dump_logs {
        eprintln!("--- logs ---");
        for entry in logs.recent(DUMP_LOG_LINES) {
            eprintln!("{}", entry.to_line());
        }
    }

    result
}

async fn print_progress(mut progress: ProgressSubscription, json: bool) {
    while let Some(event) = progress.recv().await {
        if json {
            match serde_json::to_string(&event.to_wire()) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Failed to encode progress event"),
            }
        } else if !event.is_terminal() {
            eprint!("\r\x1b[2K{:>3}%  {:<9} {}", event.percent, event.phase, event.message);
            let _ = std::io::stderr().flush();
        }
    }
    if !json {
        eprintln!();
    }
}

fn print_report(report: &MeasurementReport) {
    let result = &report.result;
    let mark = |estimated: bool| if estimated { " (estimated)" } else { "" };

    println!("Download:  {}", format_speed(result.download_mbps));
    println!(
        "Upload:    {}{}",
        format_speed(result.upload_mbps),
        mark(result.is_upload_estimated)
    );
    println!(
        "Latency:   {}{}",
        format_latency(result.latency_ms),
        mark(result.is_latency_estimated)
    );
    println!("Jitter:    {}", format_latency(result.jitter_ms));
    println!(
        "Quality:   {} ({}/100)",
        result.category.label(),
        result.quality_score
    );

    if report.network.resolved {
        println!(
            "Network:   {} via {}",
            report.network.ip.as_deref().unwrap_or("?"),
            report.network.colo.as_deref().unwrap_or("?")
        );
    }
    if report.failed_attempts() > 0 {
        println!("Fallbacks: {}", report.failed_attempts());
    }
    if report.cancelled {
        println!("Cancelled: partial result");
    }
    match &report.stored_id {
        Some(id) => println!("Saved:     {}", id),
        None => println!("Saved:     no (store unavailable)"),
    }
}
