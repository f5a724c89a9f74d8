use crate::job::{IngestJob, IngestRecord};
use crate::manifest::{write_ingest_manifest, IngestManifest};
use crate::pipeline::{ingest_file, PipelineContext};
use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::PathBuf;
use topolink_algo::{IdentifierContext, RepairConfig};
use topolink_io::{FeederNotifier, TopologyStore};
use tracing::{info, warn};

/// Settings for one ingest run over a set of source exports.
pub struct IngestRunnerConfig {
    pub jobs: Vec<IngestJob>,
    /// Where the run manifest goes; `None` skips writing it.
    pub manifest_path: Option<PathBuf>,
    /// Worker threads, `0` for one per CPU.
    pub threads: usize,
    /// Remove each export once it was processed without a file-level error.
    pub delete_processed: bool,
    pub repair: RepairConfig,
    pub default_owner: Option<String>,
    pub node_suffix_width: Option<usize>,
}

pub struct IngestSummary {
    pub run_id: String,
    pub success: usize,
    pub failure: usize,
    pub manifest_path: Option<PathBuf>,
    pub unresolved_feeders: Vec<String>,
    pub jobs: Vec<IngestRecord>,
}

pub fn run_ingest(
    config: &IngestRunnerConfig,
    store: &dyn TopologyStore,
    notifier: &dyn FeederNotifier,
) -> Result<IngestSummary> {
    let mut identifiers =
        IdentifierContext::preload(store).context("preloading identifier mappings")?;
    if let Some(owner) = &config.default_owner {
        identifiers = identifiers.with_default_owner(owner.clone());
    }
    if let Some(width) = config.node_suffix_width {
        identifiers = identifiers.with_node_suffix_width(width);
    }
    info!(
        devices = identifiers.device_count(),
        nodes = identifiers.node_count(),
        jobs = config.jobs.len(),
        "identifier context loaded"
    );

    let thread_count = if config.threads == 0 {
        num_cpus::get()
    } else {
        config.threads
    };
    let pool = ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .context("building Rayon thread pool for ingest workers")?;

    let ctx = PipelineContext {
        store,
        identifiers: &identifiers,
        notifier,
        repair: config.repair,
    };
    let records: Vec<IngestRecord> = pool.install(|| {
        config
            .jobs
            .par_iter()
            .map(|job| run_job(job, &ctx, config.delete_processed))
            .collect()
    });

    let manifest = IngestManifest::from_records(uuid::Uuid::new_v4().to_string(), records);
    if let Some(path) = &config.manifest_path {
        write_ingest_manifest(path, &manifest)?;
    }
    info!(
        run = %manifest.run_id,
        success = manifest.success,
        failure = manifest.failure,
        unresolved = manifest.unresolved_feeders.len(),
        "ingest run finished"
    );

    Ok(IngestSummary {
        run_id: manifest.run_id,
        success: manifest.success,
        failure: manifest.failure,
        manifest_path: config.manifest_path.clone(),
        unresolved_feeders: manifest.unresolved_feeders,
        jobs: manifest.jobs,
    })
}

fn run_job(job: &IngestJob, ctx: &PipelineContext<'_>, delete_processed: bool) -> IngestRecord {
    let file = job.path.display().to_string();
    match ingest_file(&job.path, ctx) {
        Ok(feeders) => {
            let deleted = delete_processed && remove_export(job);
            IngestRecord {
                job_id: job.job_id.clone(),
                file,
                status: "ok".to_string(),
                error: None,
                feeders,
                deleted,
            }
        }
        Err(err) => {
            warn!(job = %job.job_id, error = %format!("{err:#}"), "ingest job failed");
            IngestRecord {
                job_id: job.job_id.clone(),
                file,
                status: "error".to_string(),
                error: Some(format!("{err:#}")),
                feeders: Vec::new(),
                deleted: false,
            }
        }
    }
}

fn remove_export(job: &IngestJob) -> bool {
    match fs::remove_file(&job.path) {
        Ok(()) => true,
        Err(err) => {
            warn!(file = %job.path.display(), error = %err, "could not delete processed export");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::discover_jobs;
    use crate::manifest::load_ingest_manifest;
    use topolink_core::{FeederRecord, Topo};
    use topolink_io::{MemoryStore, RecordingNotifier};

    const FEEDER_XML: &str = include_str!("../tests/fixtures/feeder_sf1.xml");

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_feeder(FeederRecord {
            id: "F100".into(),
            source_id: "SF1".into(),
            owner: "350000".into(),
        });
        store.insert_main_topology(Topo::new("MAIN1", "350000", "HV").with_nodes(Some("M0"), Some("M1")));
        store.map_busbar_junction("BUS", "MAIN1");
        store
    }

    fn config(jobs: Vec<IngestJob>, manifest: Option<PathBuf>) -> IngestRunnerConfig {
        IngestRunnerConfig {
            jobs,
            manifest_path: manifest,
            threads: 2,
            delete_processed: true,
            repair: RepairConfig::default(),
            default_owner: None,
            node_suffix_width: None,
        }
    }

    #[test]
    fn good_and_bad_exports_are_recorded_separately() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("a_good.xml"), FEEDER_XML).unwrap();
        fs::write(input.join("b_bad.xml"), "<rdf:RDF/>").unwrap();
        let manifest_path = dir.path().join("out/manifest.json");

        let store = store();
        let notifier = RecordingNotifier::default();
        let jobs = discover_jobs(&input).unwrap();
        let summary = run_ingest(
            &config(jobs, Some(manifest_path.clone())),
            &store,
            &notifier,
        )
        .unwrap();

        assert_eq!(summary.success, 1);
        assert_eq!(summary.failure, 1);
        assert!(summary.unresolved_feeders.is_empty());
        // Processed exports are removed, failed ones stay for inspection.
        assert!(!input.join("a_good.xml").exists());
        assert!(input.join("b_bad.xml").exists());
        assert_eq!(notifier.calls().len(), 1);

        let manifest = load_ingest_manifest(&manifest_path).unwrap();
        assert_eq!(manifest.run_id, summary.run_id);
        assert_eq!(manifest.num_jobs, 2);
        let good = manifest.jobs.iter().find(|job| job.is_ok()).unwrap();
        assert!(good.deleted);
        assert_eq!(good.feeders[0].feeder_id, "F100");
    }

    #[test]
    fn zero_repair_iterations_report_unresolved_feeder() {
        let dir = tempfile::tempdir().unwrap();
        let export = dir.path().join("feeder.xml");
        fs::write(&export, FEEDER_XML).unwrap();

        let store = store();
        let notifier = RecordingNotifier::default();
        let mut config = config(discover_jobs(&export).unwrap(), None);
        config.delete_processed = false;
        config.repair.max_iterations = 0;

        let summary = run_ingest(&config, &store, &notifier).unwrap();
        assert_eq!(summary.unresolved_feeders, vec!["F100".to_string()]);
        assert!(summary.manifest_path.is_none());
        assert!(export.exists());
        let feeder = &summary.jobs[0].feeders[0];
        assert!(feeder.stitch.is_none());
        assert!(feeder.notified);
    }
}
