//! "Feeder updated" notifications sent after a file has been processed.

use anyhow::Result;
#[cfg(feature = "http")]
use anyhow::{anyhow, Context};
use parking_lot::Mutex;
#[cfg(feature = "http")]
use std::time::Duration;
use tracing::warn;

/// Receiver of per-feeder update events. Delivery is best effort.
pub trait FeederNotifier: Send + Sync {
    fn feeder_updated(&self, feeder_id: &str, owner: &str) -> Result<()>;
}

/// Calls `<base_url>/<feeder internal id>/<owner>` with a GET.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    base_url: String,
    agent: ureq::Agent,
}

#[cfg(feature = "http")]
impl HttpNotifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(10))
            .build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn url_for(&self, feeder_id: &str, owner: &str) -> String {
        format!("{}/{}/{}", self.base_url, feeder_id, owner)
    }
}

#[cfg(feature = "http")]
impl FeederNotifier for HttpNotifier {
    fn feeder_updated(&self, feeder_id: &str, owner: &str) -> Result<()> {
        let url = self.url_for(feeder_id, owner);
        let response = self
            .agent
            .get(&url)
            .call()
            .with_context(|| format!("calling feeder update endpoint {url}"))?;
        if response.status() != 200 {
            return Err(anyhow!(
                "feeder update endpoint returned status {}",
                response.status()
            ));
        }
        Ok(())
    }
}

/// Used when no update URL is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl FeederNotifier for NoopNotifier {
    fn feeder_updated(&self, _feeder_id: &str, _owner: &str) -> Result<()> {
        Ok(())
    }
}

/// Keeps every notification in memory; handy for dry runs and tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

impl FeederNotifier for RecordingNotifier {
    fn feeder_updated(&self, feeder_id: &str, owner: &str) -> Result<()> {
        self.calls
            .lock()
            .push((feeder_id.to_string(), owner.to_string()));
        Ok(())
    }
}

/// Send a notification and log (never propagate) a failure.
pub fn notify_best_effort(notifier: &dyn FeederNotifier, feeder_id: &str, owner: &str) -> bool {
    match notifier.feeder_updated(feeder_id, owner) {
        Ok(()) => true,
        Err(err) => {
            warn!(feeder = feeder_id, owner, error = %err, "feeder update notification failed");
            false
        }
    }
}
