pub mod job;
pub mod manifest;
pub mod pipeline;
pub mod runner;

pub use job::{discover_jobs, FeederResult, IngestJob, IngestRecord};
pub use manifest::{load_ingest_manifest, write_ingest_manifest, IngestManifest};
pub use pipeline::{ingest_file, ingest_model, PipelineContext};
pub use runner::{run_ingest, IngestRunnerConfig, IngestSummary};
