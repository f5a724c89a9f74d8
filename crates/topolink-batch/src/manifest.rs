//! Run manifest of an ingest: one entry per source export with its per-feeder
//! results, plus the feeders an operator still has to look at.
//!
//! The manifest is written once the whole run finished. It is replaced through a
//! sibling temporary file so readers never see a half-written document.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::job::{FeederResult, IngestRecord};

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestManifest {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub num_jobs: usize,
    pub success: usize,
    pub failure: usize,
    /// Internal ids (source ids when unregistered) of feeders left in more than
    /// one component or never repaired.
    pub unresolved_feeders: Vec<String>,
    pub jobs: Vec<IngestRecord>,
}

impl IngestManifest {
    pub fn from_records(run_id: impl Into<String>, jobs: Vec<IngestRecord>) -> Self {
        let success = jobs.iter().filter(|record| record.is_ok()).count();
        Self {
            run_id: run_id.into(),
            created_at: Utc::now(),
            num_jobs: jobs.len(),
            success,
            failure: jobs.len() - success,
            unresolved_feeders: unresolved_feeders(&jobs),
            jobs,
        }
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &IngestRecord> {
        self.jobs.iter().filter(|record| !record.is_ok())
    }

    /// Latest result for `feeder_id` across the run's exports.
    pub fn feeder(&self, feeder_id: &str) -> Option<&FeederResult> {
        self.jobs
            .iter()
            .flat_map(|record| record.feeders.iter())
            .filter(|feeder| feeder.feeder_id == feeder_id)
            .last()
    }
}

fn unresolved_feeders(jobs: &[IngestRecord]) -> Vec<String> {
    let mut unresolved: Vec<String> = jobs
        .iter()
        .flat_map(|record| record.feeders.iter())
        .filter(|feeder| {
            feeder
                .repair
                .as_ref()
                .map(|report| !report.outcome.is_whole())
                .unwrap_or(true)
        })
        .map(|feeder| {
            if feeder.feeder_id.is_empty() {
                feeder.source_id.clone()
            } else {
                feeder.feeder_id.clone()
            }
        })
        .collect();
    unresolved.sort();
    unresolved.dedup();
    unresolved
}

pub fn write_ingest_manifest(path: &Path, manifest: &IngestManifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating manifest directory '{}'", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(manifest).context("serializing ingest manifest")?;
    let staging = path.with_extension("json.partial");
    fs::write(&staging, json)
        .with_context(|| format!("writing ingest manifest '{}'", staging.display()))?;
    fs::rename(&staging, path)
        .with_context(|| format!("replacing ingest manifest '{}'", path.display()))
}

pub fn load_ingest_manifest(path: &Path) -> Result<IngestManifest> {
    let file = fs::File::open(path)
        .with_context(|| format!("opening ingest manifest '{}'", path.display()))?;
    serde_json::from_reader(file)
        .with_context(|| format!("parsing ingest manifest '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn feeder(source_id: &str, feeder_id: &str) -> FeederResult {
        FeederResult {
            source_id: source_id.into(),
            feeder_id: feeder_id.into(),
            owner: "350000".into(),
            devices_synced: 3,
            devices_failed: 0,
            devices_changed: 3,
            repair: None,
            stitch: None,
            error: None,
            notified: true,
        }
    }

    fn export(job_id: &str, feeders: Vec<FeederResult>) -> IngestRecord {
        IngestRecord {
            job_id: job_id.into(),
            file: format!("in/{job_id}.xml"),
            status: "ok".into(),
            error: None,
            feeders,
            deleted: false,
        }
    }

    #[test]
    fn unrepaired_feeders_are_listed_once() {
        let mut broken = export("broken", Vec::new());
        broken.status = "error".into();
        broken.error = Some("parsing CIM document".into());
        let manifest = IngestManifest::from_records(
            "run-7",
            vec![
                export("sf1", vec![feeder("SF1", "F100"), feeder("SF9", "")]),
                export("sf1_again", vec![feeder("SF1", "F100")]),
                broken,
            ],
        );

        assert_eq!(manifest.num_jobs, 3);
        assert_eq!(manifest.success, 2);
        assert_eq!(manifest.failure, 1);
        assert_eq!(manifest.unresolved_feeders, vec!["F100", "SF9"]);
        assert_eq!(manifest.failed_jobs().count(), 1);
        assert_eq!(manifest.feeder("F100").unwrap().devices_synced, 3);
        assert!(manifest.feeder("F404").is_none());
    }

    #[test]
    fn manifest_lands_in_new_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs/2026-10/manifest.json");
        let manifest =
            IngestManifest::from_records("run-8", vec![export("sf1", vec![feeder("SF1", "F100")])]);

        write_ingest_manifest(&path, &manifest).unwrap();
        assert!(!path.with_extension("json.partial").exists());

        let parsed = load_ingest_manifest(&path).unwrap();
        assert_eq!(parsed.run_id, "run-8");
        assert_eq!(parsed.jobs[0].feeders[0].feeder_id, "F100");
        assert_eq!(parsed.unresolved_feeders, vec!["F100"]);
    }

    #[test]
    fn missing_manifest_names_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = load_ingest_manifest(&path).unwrap_err();
        assert!(format!("{err:#}").contains("absent.json"));
    }
}
