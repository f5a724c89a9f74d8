use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use topolink_batch::{discover_jobs, run_ingest, IngestRunnerConfig};
use topolink_cli::AppConfig;
use tracing::info;

use super::{build_notifier, open_store};

pub fn handle(
    config: &AppConfig,
    path: &Path,
    workers: Option<usize>,
    manifest: Option<PathBuf>,
    delete_processed: bool,
) -> Result<()> {
    let store = open_store(config)?;
    let notifier = build_notifier(config);
    let jobs = discover_jobs(path)?;
    info!("Ingesting {} export(s) from {}", jobs.len(), path.display());

    let runner = IngestRunnerConfig {
        jobs,
        manifest_path: manifest,
        threads: workers.unwrap_or(config.workers),
        delete_processed: delete_processed || config.delete_processed,
        repair: config.repair,
        default_owner: Some(config.default_owner.clone()),
        node_suffix_width: Some(config.node_suffix_width),
    };
    let summary = run_ingest(&runner, &store, notifier.as_ref())?;
    store.save().context("saving store snapshot")?;

    println!(
        "Ingest run {}: {} ok, {} failed",
        summary.run_id, summary.success, summary.failure
    );
    for record in &summary.jobs {
        match &record.error {
            Some(error) => println!("  {:<32} error: {error}", record.job_id),
            None => {
                for feeder in &record.feeders {
                    let outcome = feeder
                        .repair
                        .as_ref()
                        .map(|report| {
                            if report.outcome.is_whole() {
                                format!("whole ({} write(s))", report.writes())
                            } else {
                                "unresolved".to_string()
                            }
                        })
                        .unwrap_or_else(|| "not repaired".to_string());
                    println!(
                        "  {:<32} feeder {} ({} device(s)): {outcome}",
                        record.job_id, feeder.feeder_id, feeder.devices_synced
                    );
                }
            }
        }
    }
    for feeder in &summary.unresolved_feeders {
        println!("Unresolved feeder: {feeder}");
    }
    if let Some(path) = &summary.manifest_path {
        println!("Manifest written to {}", path.display());
    }
    Ok(())
}
