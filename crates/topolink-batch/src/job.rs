use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use topolink_algo::{RepairReport, StitchOutcome};
use walkdir::WalkDir;

/// One source export to ingest end-to-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestJob {
    pub job_id: String,
    pub path: PathBuf,
}

/// Per-feeder result inside an [`IngestRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeederResult {
    pub source_id: String,
    pub feeder_id: String,
    pub owner: String,
    pub devices_synced: usize,
    pub devices_failed: usize,
    pub devices_changed: usize,
    #[serde(default)]
    pub repair: Option<RepairReport>,
    #[serde(default)]
    pub stitch: Option<StitchOutcome>,
    #[serde(default)]
    pub error: Option<String>,
    pub notified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRecord {
    pub job_id: String,
    pub file: String,
    pub status: String,
    pub error: Option<String>,
    #[serde(default)]
    pub feeders: Vec<FeederResult>,
    #[serde(default)]
    pub deleted: bool,
}

impl IngestRecord {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

fn is_source_export(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("xml"))
        .unwrap_or(false)
}

/// A single file becomes one job; a directory is walked for `*.xml` exports.
pub fn discover_jobs(root: &Path) -> Result<Vec<IngestJob>> {
    if root.is_file() {
        return Ok(vec![IngestJob {
            job_id: job_id_for(root, root.parent().unwrap_or(root)),
            path: root.to_path_buf(),
        }]);
    }
    if !root.is_dir() {
        return Err(anyhow!("input path '{}' does not exist", root.display()));
    }

    let mut jobs = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("walking '{}'", root.display()))?;
        if entry.file_type().is_file() && is_source_export(entry.path()) {
            jobs.push(IngestJob {
                job_id: job_id_for(entry.path(), root),
                path: entry.path().to_path_buf(),
            });
        }
    }
    jobs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(jobs)
}

fn job_id_for(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    format!("ingest:{}", relative.display())
}
