pub mod graph;
pub mod ingest;
pub mod repair;
pub mod stitch;

use anyhow::{anyhow, Context, Result};
use topolink_core::Topo;
use topolink_io::{FeederNotifier, HttpNotifier, MemoryStore, NoopNotifier, TopologyStore};
use topolink_cli::AppConfig;
use tracing::debug;

pub fn open_store(config: &AppConfig) -> Result<MemoryStore> {
    MemoryStore::open(&config.store.path)
        .with_context(|| format!("opening store '{}'", config.store.path.display()))
}

pub fn build_notifier(config: &AppConfig) -> Box<dyn FeederNotifier> {
    match &config.update_url {
        Some(url) => Box::new(HttpNotifier::new(url.as_str())),
        None => {
            debug!("no update_url configured, feeder notifications disabled");
            Box::new(NoopNotifier)
        }
    }
}

/// Stored records of `feeder_id`; an unknown feeder is an error.
pub fn feeder_records(store: &dyn TopologyStore, feeder_id: &str) -> Result<Vec<Topo>> {
    let records = store
        .feeder_topology(feeder_id)
        .with_context(|| format!("loading topology of feeder '{feeder_id}'"))?;
    if records.is_empty() {
        return Err(anyhow!("feeder '{feeder_id}' has no topology records"));
    }
    Ok(records)
}
