//! Backing-store seam.
//!
//! The reconciliation passes never hold the whole network: they query one feeder
//! at a time and patch individual endpoints. [`TopologyStore`] is that contract.
//! Every method is a single store operation; nothing here spans a transaction.

mod memory;

pub use memory::{MemoryStore, StoreSnapshot};

use thiserror::Error;
use topolink_core::{
    DeviceKind, DeviceRecord, EndpointUpdate, FeederJoin, FeederRecord, IdMapping, NodeMapping,
    TopoError, Topo,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for TopoError {
    fn from(err: StoreError) -> Self {
        TopoError::Store(err.to_string())
    }
}

/// Persisted topology, identifier maps and join state.
///
/// Implementations must be safe to share between ingestion workers. The two
/// allocation paths ([`TopologyStore::reserve_node_id`] and
/// [`TopologyStore::insert_node_mapping_if_absent`]) must be atomic with respect to
/// each other so concurrent workers never hand out the same internal node id.
pub trait TopologyStore: Send + Sync {
    // --- distribution topology ---

    /// All records of one feeder, ordered by device id.
    fn feeder_topology(&self, feeder_id: &str) -> StoreResult<Vec<Topo>>;

    fn topology(&self, device_id: &str) -> StoreResult<Option<Topo>>;

    fn insert_topology(&self, topo: Topo) -> StoreResult<()>;

    /// Compare-and-set on one endpoint. Returns `false` (and writes nothing) when the
    /// endpoint no longer holds `update.expected`.
    fn update_endpoint(&self, update: &EndpointUpdate) -> StoreResult<bool>;

    fn update_feeder_of(&self, device_id: &str, feeder_id: &str) -> StoreResult<()>;

    fn replace_endpoints(
        &self,
        device_id: &str,
        first: Option<&str>,
        second: Option<&str>,
    ) -> StoreResult<()>;

    /// Number of distribution records referencing `node`, across all feeders.
    fn node_reference_count(&self, node: &str) -> StoreResult<usize>;

    /// Distribution records referencing `node`, across all feeders.
    fn devices_on_node(&self, node: &str) -> StoreResult<Vec<Topo>>;

    // --- main network (read-only for the passes) ---

    fn main_topology(&self, device_id: &str) -> StoreResult<Option<Topo>>;

    /// Main-network device id for a source busbar id.
    fn main_junction_for_source(&self, busbar_source_id: &str) -> StoreResult<Option<String>>;

    // --- identifier maps ---

    fn find_id_mapping(&self, source_id: &str) -> StoreResult<Option<IdMapping>>;

    fn all_id_mappings(&self) -> StoreResult<Vec<IdMapping>>;

    /// Insert unless a mapping for the same source id exists; returns the stored one.
    fn insert_id_mapping(&self, mapping: IdMapping) -> StoreResult<IdMapping>;

    fn find_node_mapping(&self, key: &str) -> StoreResult<Option<NodeMapping>>;

    fn all_node_mappings(&self) -> StoreResult<Vec<NodeMapping>>;

    /// Insert unless the key is mapped; returns whichever mapping won.
    fn insert_node_mapping_if_absent(&self, mapping: NodeMapping) -> StoreResult<NodeMapping>;

    /// Reserve `prefix` + the lowest unused zero-padded suffix of `width` digits.
    /// `None` when the suffix space is exhausted.
    fn reserve_node_id(&self, prefix: &str, width: usize) -> StoreResult<Option<String>>;

    /// Next sequence-based internal id for a device class.
    fn next_device_id(&self, kind: DeviceKind) -> StoreResult<String>;

    // --- devices and feeders ---

    fn insert_device(&self, device: DeviceRecord) -> StoreResult<()>;

    fn feeders(&self) -> StoreResult<Vec<FeederRecord>>;

    fn feeder_by_source(&self, source_id: &str) -> StoreResult<Option<FeederRecord>>;

    fn feeder_join(&self, feeder_id: &str) -> StoreResult<Option<FeederJoin>>;

    fn save_feeder_join(&self, join: FeederJoin) -> StoreResult<()>;
}

/// Parse the numeric suffix of an allocated node id, if `value` has that shape.
pub(crate) fn allocated_suffix(value: &str, prefix: &str, width: usize) -> Option<u64> {
    let suffix = value.strip_prefix(prefix)?;
    if suffix.len() != width || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_requires_exact_width() {
        assert_eq!(allocated_suffix("F10007", "F1", 4), Some(7));
        assert_eq!(allocated_suffix("F100071", "F1", 4), None);
        assert_eq!(allocated_suffix("F1abcd", "F1", 4), None);
        assert_eq!(allocated_suffix("G10007", "F1", 4), None);
    }

    #[test]
    fn store_error_converts_to_topo_error() {
        let err: TopoError = StoreError::Unavailable("closed".into()).into();
        assert!(matches!(err, TopoError::Store(_)));
        assert!(err.to_string().contains("closed"));
    }
}
