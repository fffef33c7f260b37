//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the signal status publisher."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use sigstat_common::{init_tracing, log_run_event, AppConfig, RunContext, RunOutcome};
use sigstat_core::{RunOptions, RunReport, StatusPublisher};
use sigstat_kits::KitsSource;
use sigstat_socrata::SocrataClient;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Publish flashing and offline signal statuses from KITS to the open data portal",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to a TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Build the upsert payload but do not submit it")]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    init_tracing("sigstat-publisher", &config.logging)?;

    let run_id = Uuid::new_v4().to_string();
    let context = RunContext::new()
        .with_run_id(&run_id)
        .with_dataset(&config.socrata.status_resource_id)
        .with_dry_run(cli.dry_run);
    log_run_event(Some(&context), "run_started", "publisher run started", RunOutcome::Success);

    let started = Instant::now();
    let span = info_span!("run", run_id = %run_id);
    match run(&config, cli.dry_run).instrument(span).await {
        Ok(report) => {
            let message = format!(
                "fetched {} flagged, upserted {}, deleted {}",
                report.fetched, report.upserted, report.deleted
            );
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                unmatched_assets = report.unmatched_assets,
                "run finished"
            );
            log_run_event(Some(&context), "run_completed", &message, RunOutcome::Success);
            Ok(())
        }
        Err(err) => {
            log_run_event(Some(&context), "run_failed", &format!("{err:#}"), RunOutcome::Fault);
            Err(err)
        }
    }
}

async fn run(config: &AppConfig, dry_run: bool) -> Result<RunReport> {
    let options = RunOptions {
        timezone: config.pipeline.tz()?,
        dry_run,
    };
    let source = KitsSource::new(config.kits.clone(), config.pipeline.flagged_statuses.clone());
    let dataset =
        SocrataClient::from_config(&config.socrata).context("failed to build portal client")?;
    let publisher = StatusPublisher::new(source, dataset, options);
    publisher.run().await.context("signal status run failed")
}
