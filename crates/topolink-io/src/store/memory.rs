use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use topolink_core::{
    normalize_node, DeviceKind, DeviceRecord, EndpointUpdate, FeederJoin, FeederRecord, IdMapping,
    NodeMapping, Topo,
};
use tracing::{debug, info};

use super::{allocated_suffix, StoreError, StoreResult, TopologyStore};

/// Serializable content of a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub topology: BTreeMap<String, Topo>,
    #[serde(default)]
    pub main_topology: BTreeMap<String, Topo>,
    /// Keyed by source id.
    #[serde(default)]
    pub id_mappings: BTreeMap<String, IdMapping>,
    /// Keyed by `owner + source node id`.
    #[serde(default)]
    pub node_mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub reserved_nodes: BTreeSet<String>,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceRecord>,
    /// Keyed by source id.
    #[serde(default)]
    pub feeders: BTreeMap<String, FeederRecord>,
    #[serde(default)]
    pub feeder_joins: BTreeMap<String, FeederJoin>,
    /// Source busbar id -> main-network device id.
    #[serde(default)]
    pub busbar_junctions: BTreeMap<String, String>,
    #[serde(default)]
    pub sequences: BTreeMap<String, u64>,
}

/// In-process [`TopologyStore`] guarded by a single lock.
///
/// Every trait method takes the lock once, so each call is atomic on its own.
/// With a backing path the content can be loaded from and saved to a JSON snapshot.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreSnapshot>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            path: None,
        }
    }

    /// Load `path` if it exists, otherwise start empty; [`MemoryStore::save`] writes back there.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let snapshot = if path.exists() {
            let text = fs::read_to_string(path).map_err(|err| {
                StoreError::Unavailable(format!("reading '{}': {err}", path.display()))
            })?;
            serde_json::from_str(&text).map_err(|err| {
                StoreError::Snapshot(format!("decoding '{}': {err}", path.display()))
            })?
        } else {
            debug!(path = %path.display(), "snapshot missing, starting with an empty store");
            StoreSnapshot::default()
        };
        Ok(Self {
            state: Mutex::new(snapshot),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.state.lock().clone()
    }

    pub fn save(&self) -> StoreResult<()> {
        match &self.path {
            Some(path) => self.save_to(path),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, path: &Path) -> StoreResult<()> {
        let json = {
            let state = self.state.lock();
            serde_json::to_string_pretty(&*state)
                .map_err(|err| StoreError::Snapshot(err.to_string()))?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    StoreError::Snapshot(format!("creating '{}': {err}", parent.display()))
                })?;
            }
        }
        fs::write(path, json).map_err(|err| {
            StoreError::Snapshot(format!("writing '{}': {err}", path.display()))
        })?;
        info!(path = %path.display(), "store snapshot written");
        Ok(())
    }

    pub fn insert_feeder(&self, feeder: FeederRecord) {
        self.state
            .lock()
            .feeders
            .insert(feeder.source_id.clone(), feeder);
    }

    pub fn insert_main_topology(&self, topo: Topo) {
        self.state.lock().main_topology.insert(topo.id.clone(), topo);
    }

    pub fn map_busbar_junction(&self, busbar_source_id: &str, main_device_id: &str) {
        self.state
            .lock()
            .busbar_junctions
            .insert(busbar_source_id.to_string(), main_device_id.to_string());
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceRecord> {
        self.state.lock().devices.get(device_id).cloned()
    }
}

fn device_id_prefix(kind: DeviceKind) -> &'static str {
    match kind {
        DeviceKind::Breaker => "1110",
        DeviceKind::Disconnector => "1120",
        DeviceKind::Fuse => "1130",
        DeviceKind::PowerTransformer => "1210",
        DeviceKind::BusbarSection => "1310",
        DeviceKind::AcLineSegment => "1410",
        DeviceKind::Pole => "1420",
        DeviceKind::FaultIndicator => "1510",
    }
}

impl TopologyStore for MemoryStore {
    fn feeder_topology(&self, feeder_id: &str) -> StoreResult<Vec<Topo>> {
        let state = self.state.lock();
        Ok(state
            .topology
            .values()
            .filter(|topo| topo.feeder_id == feeder_id)
            .cloned()
            .collect())
    }

    fn topology(&self, device_id: &str) -> StoreResult<Option<Topo>> {
        Ok(self.state.lock().topology.get(device_id).cloned())
    }

    fn insert_topology(&self, topo: Topo) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.topology.contains_key(&topo.id) {
            return Err(StoreError::Conflict(format!(
                "topology record '{}' already exists",
                topo.id
            )));
        }
        state.topology.insert(topo.id.clone(), topo);
        Ok(())
    }

    fn update_endpoint(&self, update: &EndpointUpdate) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let topo = state
            .topology
            .get_mut(&update.device_id)
            .ok_or_else(|| StoreError::NotFound(update.device_id.clone()))?;
        if topo.node(update.terminal) != update.expected.as_deref() {
            debug!(
                device = %update.device_id,
                terminal = %update.terminal,
                "endpoint changed since scan, update skipped"
            );
            return Ok(false);
        }
        topo.set_node(update.terminal, update.node.as_deref());
        Ok(true)
    }

    fn update_feeder_of(&self, device_id: &str, feeder_id: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        let topo = state
            .topology
            .get_mut(device_id)
            .ok_or_else(|| StoreError::NotFound(device_id.to_string()))?;
        topo.feeder_id = feeder_id.to_string();
        Ok(())
    }

    fn replace_endpoints(
        &self,
        device_id: &str,
        first: Option<&str>,
        second: Option<&str>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        let topo = state
            .topology
            .get_mut(device_id)
            .ok_or_else(|| StoreError::NotFound(device_id.to_string()))?;
        topo.first_node = normalize_node(first);
        topo.second_node = normalize_node(second);
        Ok(())
    }

    fn node_reference_count(&self, node: &str) -> StoreResult<usize> {
        let state = self.state.lock();
        Ok(state
            .topology
            .values()
            .filter(|topo| topo.nodes().any(|value| value == node))
            .count())
    }

    fn devices_on_node(&self, node: &str) -> StoreResult<Vec<Topo>> {
        let state = self.state.lock();
        Ok(state
            .topology
            .values()
            .filter(|topo| topo.nodes().any(|value| value == node))
            .cloned()
            .collect())
    }

    fn main_topology(&self, device_id: &str) -> StoreResult<Option<Topo>> {
        Ok(self.state.lock().main_topology.get(device_id).cloned())
    }

    fn main_junction_for_source(&self, busbar_source_id: &str) -> StoreResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .busbar_junctions
            .get(busbar_source_id)
            .cloned())
    }

    fn find_id_mapping(&self, source_id: &str) -> StoreResult<Option<IdMapping>> {
        Ok(self.state.lock().id_mappings.get(source_id).cloned())
    }

    fn all_id_mappings(&self) -> StoreResult<Vec<IdMapping>> {
        Ok(self.state.lock().id_mappings.values().cloned().collect())
    }

    fn insert_id_mapping(&self, mapping: IdMapping) -> StoreResult<IdMapping> {
        let mut state = self.state.lock();
        Ok(state
            .id_mappings
            .entry(mapping.source_id.clone())
            .or_insert(mapping)
            .clone())
    }

    fn find_node_mapping(&self, key: &str) -> StoreResult<Option<NodeMapping>> {
        Ok(self
            .state
            .lock()
            .node_mappings
            .get(key)
            .map(|node_id| NodeMapping {
                key: key.to_string(),
                node_id: node_id.clone(),
            }))
    }

    fn all_node_mappings(&self) -> StoreResult<Vec<NodeMapping>> {
        Ok(self
            .state
            .lock()
            .node_mappings
            .iter()
            .map(|(key, node_id)| NodeMapping {
                key: key.clone(),
                node_id: node_id.clone(),
            })
            .collect())
    }

    fn insert_node_mapping_if_absent(&self, mapping: NodeMapping) -> StoreResult<NodeMapping> {
        let mut state = self.state.lock();
        let winner = state
            .node_mappings
            .entry(mapping.key.clone())
            .or_insert_with(|| mapping.node_id.clone())
            .clone();
        state.reserved_nodes.insert(winner.clone());
        Ok(NodeMapping {
            key: mapping.key,
            node_id: winner,
        })
    }

    fn reserve_node_id(&self, prefix: &str, width: usize) -> StoreResult<Option<String>> {
        let mut state = self.state.lock();
        let capacity = 10u64
            .checked_pow(width as u32)
            .ok_or_else(|| StoreError::Conflict(format!("node suffix width {width} too large")))?;

        let mut used = BTreeSet::new();
        let candidates = state
            .reserved_nodes
            .iter()
            .chain(state.node_mappings.values())
            .map(String::as_str)
            .chain(state.topology.values().flat_map(|topo| topo.nodes()));
        for value in candidates {
            if let Some(suffix) = allocated_suffix(value, prefix, width) {
                used.insert(suffix);
            }
        }

        let Some(free) = (0..capacity).find(|suffix| !used.contains(suffix)) else {
            return Ok(None);
        };
        let node = format!("{prefix}{free:0width$}");
        state.reserved_nodes.insert(node.clone());
        Ok(Some(node))
    }

    fn next_device_id(&self, kind: DeviceKind) -> StoreResult<String> {
        let mut state = self.state.lock();
        let counter = state.sequences.entry(kind.table().to_string()).or_insert(0);
        *counter += 1;
        Ok(format!("{}{:012}", device_id_prefix(kind), counter))
    }

    fn insert_device(&self, device: DeviceRecord) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.devices.contains_key(&device.id) {
            return Err(StoreError::Conflict(format!(
                "device '{}' already exists",
                device.id
            )));
        }
        state.devices.insert(device.id.clone(), device);
        Ok(())
    }

    fn feeders(&self) -> StoreResult<Vec<FeederRecord>> {
        Ok(self.state.lock().feeders.values().cloned().collect())
    }

    fn feeder_by_source(&self, source_id: &str) -> StoreResult<Option<FeederRecord>> {
        Ok(self.state.lock().feeders.get(source_id).cloned())
    }

    fn feeder_join(&self, feeder_id: &str) -> StoreResult<Option<FeederJoin>> {
        Ok(self.state.lock().feeder_joins.get(feeder_id).cloned())
    }

    fn save_feeder_join(&self, join: FeederJoin) -> StoreResult<()> {
        self.state
            .lock()
            .feeder_joins
            .insert(join.feeder_id.clone(), join);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use topolink_core::Terminal;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_topology(Topo::new("D1", "350000", "F1").with_nodes(Some("A"), Some("B")))
            .unwrap();
        store
            .insert_topology(Topo::new("D2", "350000", "F1").with_nodes(Some("B"), None))
            .unwrap();
        store
            .insert_topology(Topo::new("D9", "350000", "F2").with_nodes(Some("B"), Some("Z")))
            .unwrap();
        store
    }

    #[test]
    fn conditional_update_checks_expected_value() {
        let store = seeded();
        let stale = EndpointUpdate::new("D2", Terminal::Second)
            .expecting(Some("X"))
            .to_node(Some("C"));
        assert!(!store.update_endpoint(&stale).unwrap());

        let fresh = EndpointUpdate::new("D2", Terminal::Second)
            .expecting(None)
            .to_node(Some("C"));
        assert!(store.update_endpoint(&fresh).unwrap());
        assert_eq!(
            store.topology("D2").unwrap().unwrap().second_node.as_deref(),
            Some("C")
        );
    }

    #[test]
    fn update_of_unknown_device_is_not_found() {
        let store = seeded();
        let err = store
            .update_endpoint(&EndpointUpdate::new("NOPE", Terminal::First))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn reference_count_spans_feeders() {
        let store = seeded();
        assert_eq!(store.node_reference_count("B").unwrap(), 3);
        assert_eq!(store.feeder_topology("F1").unwrap().len(), 2);
        assert_eq!(store.devices_on_node("Z").unwrap()[0].id, "D9");
    }

    #[test]
    fn reserve_node_id_picks_lowest_free_suffix() {
        let store = MemoryStore::new();
        store
            .insert_topology(Topo::new("D1", "o", "P").with_nodes(Some("P0000"), Some("P0002")))
            .unwrap();
        assert_eq!(store.reserve_node_id("P", 4).unwrap().as_deref(), Some("P0001"));
        assert_eq!(store.reserve_node_id("P", 4).unwrap().as_deref(), Some("P0003"));
    }

    #[test]
    fn reserve_node_id_reports_exhaustion() {
        let store = MemoryStore::new();
        for _ in 0..10 {
            assert!(store.reserve_node_id("Q", 1).unwrap().is_some());
        }
        assert_eq!(store.reserve_node_id("Q", 1).unwrap(), None);
    }

    #[test]
    fn concurrent_reservations_never_collide() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| store.reserve_node_id("F7", 4).unwrap().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all = BTreeSet::new();
        for handle in handles {
            for node in handle.join().unwrap() {
                assert!(all.insert(node), "duplicate node id handed out");
            }
        }
        assert_eq!(all.len(), 200);
    }

    #[test]
    fn node_mapping_insert_keeps_first_winner() {
        let store = MemoryStore::new();
        let first = store
            .insert_node_mapping_if_absent(NodeMapping {
                key: "350000CN1".into(),
                node_id: "F10000".into(),
            })
            .unwrap();
        let second = store
            .insert_node_mapping_if_absent(NodeMapping {
                key: "350000CN1".into(),
                node_id: "F10001".into(),
            })
            .unwrap();
        assert_eq!(first.node_id, "F10000");
        assert_eq!(second.node_id, "F10000");
    }

    #[test]
    fn device_ids_follow_per_class_sequence() {
        let store = MemoryStore::new();
        assert_eq!(
            store.next_device_id(DeviceKind::Breaker).unwrap(),
            "1110000000000001"
        );
        assert_eq!(
            store.next_device_id(DeviceKind::Breaker).unwrap(),
            "1110000000000002"
        );
        assert_eq!(
            store.next_device_id(DeviceKind::Fuse).unwrap(),
            "1130000000000001"
        );
    }

    #[test]
    fn snapshot_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = MemoryStore::open(&path).unwrap();
        store
            .insert_topology(Topo::new("D1", "o", "F1").with_nodes(Some("A"), None))
            .unwrap();
        store.map_busbar_junction("BUS1", "M1");
        store.save().unwrap();

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.feeder_topology("F1").unwrap().len(), 1);
        assert_eq!(
            reopened.main_junction_for_source("BUS1").unwrap().as_deref(),
            Some("M1")
        );
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{not json").unwrap();
        let err = MemoryStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Snapshot(_)));
    }
}
