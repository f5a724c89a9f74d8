use anyhow::{Context, Result};
use topolink_algo::{RepairEngine, RepairOutcome, RepairReport};
use topolink_cli::AppConfig;
use topolink_core::TopoError;

use super::{feeder_records, open_store};

pub fn handle(
    config: &AppConfig,
    feeder: &str,
    max_iterations: Option<usize>,
    json: bool,
) -> Result<()> {
    let store = open_store(config)?;
    feeder_records(&store, feeder)?;

    let mut repair = config.repair;
    if let Some(limit) = max_iterations {
        repair.max_iterations = limit;
    }
    let report = RepairEngine::new(&store, repair)
        .repair_feeder(feeder)
        .with_context(|| format!("repairing feeder '{feeder}'"))?;
    store.save().context("saving store snapshot")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing repair report")?
        );
    } else {
        print_report(feeder, &report);
    }

    match report.outcome {
        RepairOutcome::Unresolved { reason } => {
            Err(TopoError::Unresolved(format!("feeder {feeder}: {reason}")).into())
        }
        _ => Ok(()),
    }
}

fn print_report(feeder: &str, report: &RepairReport) {
    println!("Repair of feeder {feeder}:");
    match &report.outcome {
        RepairOutcome::AlreadyWhole => println!("  Outcome       : already whole"),
        RepairOutcome::Repaired => println!("  Outcome       : repaired"),
        RepairOutcome::Unresolved { reason } => println!("  Outcome       : unresolved ({reason})"),
    }
    println!(
        "  Components    : {} -> {}",
        report.components_before, report.components_after
    );
    println!("  Iterations    : {}", report.iterations);
    println!("  Bridges       : {}", report.bridges);
    println!("  Duplicates    : {}", report.duplicates_split);
    println!("  Degree moves  : {}", report.degree_reroutes);
    if report.failed_writes > 0 {
        println!("  Failed writes : {}", report.failed_writes);
    }
    for issue in &report.diagnostics.issues {
        println!("  {:?} [{}] {}", issue.severity, issue.category, issue.message);
    }
}
