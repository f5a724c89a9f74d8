//! Source identifier -> internal identifier translation.
//!
//! Lookups go through three layers in order: the [`IdentifierContext`] preloaded
//! before workers start (read-only, shared), the store, and finally allocation.
//! Mappings created during a run are written to the store only.

use std::collections::HashMap;

use chrono::Local;
use topolink_core::{DeviceRecord, FeederRecord, IdMapping, NodeMapping, TopoResult};
use topolink_io::{SourceDevice, TopologyStore};
use tracing::{debug, info};

/// Owner used when neither the feeder nor the configuration names one.
pub const DEFAULT_OWNER: &str = "350000";

/// Prefix of node ids allocated for feeders with no internal counterpart.
pub const UNKNOWN_FEEDER_NODE_PREFIX: &str = "17013";

pub const DEFAULT_NODE_SUFFIX_WIDTH: usize = 4;

/// Identifier maps loaded once per run and shared read-only by all workers.
#[derive(Debug, Clone)]
pub struct IdentifierContext {
    devices: HashMap<String, String>,
    nodes: HashMap<String, String>,
    feeders: HashMap<String, FeederRecord>,
    default_owner: String,
    node_suffix_width: usize,
}

impl Default for IdentifierContext {
    fn default() -> Self {
        Self {
            devices: HashMap::new(),
            nodes: HashMap::new(),
            feeders: HashMap::new(),
            default_owner: DEFAULT_OWNER.to_string(),
            node_suffix_width: DEFAULT_NODE_SUFFIX_WIDTH,
        }
    }
}

impl IdentifierContext {
    pub fn preload(store: &dyn TopologyStore) -> TopoResult<Self> {
        let mut context = Self::default();
        for mapping in store.all_id_mappings()? {
            context.devices.insert(mapping.source_id, mapping.id);
        }
        for mapping in store.all_node_mappings()? {
            context.nodes.insert(mapping.key, mapping.node_id);
        }
        for feeder in store.feeders()? {
            context.feeders.insert(feeder.source_id.clone(), feeder);
        }
        info!(
            devices = context.devices.len(),
            nodes = context.nodes.len(),
            feeders = context.feeders.len(),
            "identifier context loaded"
        );
        Ok(context)
    }

    pub fn with_default_owner(mut self, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        if !owner.trim().is_empty() {
            self.default_owner = owner;
        }
        self
    }

    pub fn with_node_suffix_width(mut self, width: usize) -> Self {
        self.node_suffix_width = width;
        self
    }

    pub fn default_owner(&self) -> &str {
        &self.default_owner
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Feeder as seen by one job: internal id when the feeder is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFeeder {
    pub source_id: String,
    pub internal_id: Option<String>,
    pub owner: String,
}

impl ResolvedFeeder {
    /// Id written into topology records: the internal id, else the source id.
    pub fn record_id(&self) -> &str {
        self.internal_id.as_deref().unwrap_or(&self.source_id)
    }

    pub fn is_known(&self) -> bool {
        self.internal_id.is_some()
    }
}

pub struct Translator<'a> {
    store: &'a dyn TopologyStore,
    context: &'a IdentifierContext,
    clock: fn() -> i64,
}

fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl<'a> Translator<'a> {
    pub fn new(store: &'a dyn TopologyStore, context: &'a IdentifierContext) -> Self {
        Self {
            store,
            context,
            clock: epoch_millis,
        }
    }

    /// Replace the millisecond clock used for unknown-feeder node prefixes.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &'a dyn TopologyStore {
        self.store
    }

    pub fn feeder(&self, source_id: &str) -> TopoResult<ResolvedFeeder> {
        let source_id = source_id.trim_start_matches('#');
        let record = match self.context.feeders.get(source_id) {
            Some(record) => Some(record.clone()),
            None => self.store.feeder_by_source(source_id)?,
        };
        Ok(match record {
            Some(record) => {
                let owner = if record.owner.trim().is_empty() {
                    self.context.default_owner.clone()
                } else {
                    record.owner
                };
                ResolvedFeeder {
                    source_id: source_id.to_string(),
                    internal_id: Some(record.id),
                    owner,
                }
            }
            None => {
                debug!(feeder = source_id, "feeder not registered");
                ResolvedFeeder {
                    source_id: source_id.to_string(),
                    internal_id: None,
                    owner: self.context.default_owner.clone(),
                }
            }
        })
    }

    /// Internal id of a source device, creating the device and its mapping on first sight.
    pub fn device_id(&self, device: &SourceDevice, feeder: &ResolvedFeeder) -> TopoResult<String> {
        if let Some(id) = self.context.devices.get(&device.id) {
            return Ok(id.clone());
        }
        if let Some(mapping) = self.store.find_id_mapping(&device.id)? {
            return Ok(mapping.id);
        }

        let id = self.store.next_device_id(device.kind)?;
        let winner = self.store.insert_id_mapping(IdMapping {
            id: id.clone(),
            source_id: device.id.clone(),
            table: device.kind.table().to_string(),
            region_id: feeder.owner.clone(),
        })?;
        if winner.id != id {
            debug!(device = %device.id, id = %winner.id, "device mapped concurrently");
            return Ok(winner.id);
        }

        self.store.insert_device(DeviceRecord {
            id: id.clone(),
            kind: device.kind,
            source_id: device.id.clone(),
            name: device.name.clone(),
            owner: feeder.owner.clone(),
            feeder_id: feeder.record_id().to_string(),
            stamp: audit_stamp(&feeder.owner, feeder.record_id()),
        })?;
        info!(device = %device.id, id = %id, kind = %device.kind, "new device registered");
        Ok(id)
    }

    /// Internal node id for a source node, reserving a new one when unmapped.
    pub fn node_id(&self, source_node: &str, feeder: &ResolvedFeeder) -> TopoResult<String> {
        let key = NodeMapping::key_for(&feeder.owner, source_node);
        if let Some(node) = self.context.nodes.get(&key) {
            return Ok(node.clone());
        }
        if let Some(mapping) = self.store.find_node_mapping(&key)? {
            return Ok(mapping.node_id);
        }

        let prefix = match &feeder.internal_id {
            Some(id) => id.clone(),
            None => format!("{UNKNOWN_FEEDER_NODE_PREFIX}{}", (self.clock)()),
        };
        let allocated = match self
            .store
            .reserve_node_id(&prefix, self.context.node_suffix_width)?
        {
            Some(node) => node,
            None => {
                debug!(node = source_node, prefix = %prefix, "node suffix space exhausted, keeping source id");
                source_node.to_string()
            }
        };
        let winner = self.store.insert_node_mapping_if_absent(NodeMapping {
            key,
            node_id: allocated,
        })?;
        Ok(winner.node_id)
    }

    /// Translate every terminal node of a device, in terminal order.
    pub fn device_nodes(
        &self,
        device: &SourceDevice,
        feeder: &ResolvedFeeder,
    ) -> TopoResult<Vec<String>> {
        device
            .nodes
            .iter()
            .map(|node| self.node_id(node, feeder))
            .collect()
    }
}

/// `<owner>_<feeder>_<local time>` stamp written on created records.
pub fn audit_stamp(owner: &str, feeder_id: &str) -> String {
    format!(
        "{}_{}_{}",
        owner,
        feeder_id,
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use topolink_core::DeviceKind;
    use topolink_io::MemoryStore;

    fn store_with_feeder() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_feeder(FeederRecord {
            id: "F100".into(),
            source_id: "SRC_F".into(),
            owner: "350100".into(),
        });
        store
    }

    fn source_device(id: &str) -> SourceDevice {
        SourceDevice {
            id: id.into(),
            kind: DeviceKind::Breaker,
            name: format!("{id} name"),
            feeder_id: "SRC_F".into(),
            nodes: vec!["CN1".into(), "CN2".into()],
        }
    }

    #[test]
    fn registered_feeder_resolves_internal_id() {
        let store = store_with_feeder();
        let context = IdentifierContext::preload(&store).unwrap();
        let translator = Translator::new(&store, &context);
        let feeder = translator.feeder("#SRC_F").unwrap();
        assert_eq!(feeder.internal_id.as_deref(), Some("F100"));
        assert_eq!(feeder.owner, "350100");
    }

    #[test]
    fn unknown_feeder_uses_default_owner() {
        let store = MemoryStore::new();
        let context = IdentifierContext::default();
        let feeder = Translator::new(&store, &context).feeder("NOPE").unwrap();
        assert!(!feeder.is_known());
        assert_eq!(feeder.owner, DEFAULT_OWNER);
        assert_eq!(feeder.record_id(), "NOPE");
    }

    #[test]
    fn new_device_gets_record_and_mapping() {
        let store = store_with_feeder();
        let context = IdentifierContext::default();
        let translator = Translator::new(&store, &context);
        let feeder = translator.feeder("SRC_F").unwrap();

        let id = translator.device_id(&source_device("BRK1"), &feeder).unwrap();
        assert_eq!(translator.device_id(&source_device("BRK1"), &feeder).unwrap(), id);

        let record = store.device(&id).unwrap();
        assert_eq!(record.name, "BRK1 name");
        assert_eq!(record.feeder_id, "F100");
        assert!(record.stamp.starts_with("350100_F100_"));
        let mapping = store.find_id_mapping("BRK1").unwrap().unwrap();
        assert_eq!(mapping.table, "breaker");
        assert_eq!(mapping.region_id, "350100");
    }

    #[test]
    fn preloaded_context_wins_over_store() {
        let store = store_with_feeder();
        store
            .insert_id_mapping(IdMapping {
                id: "STORED".into(),
                source_id: "BRK1".into(),
                table: "breaker".into(),
                region_id: "350100".into(),
            })
            .unwrap();
        let context = IdentifierContext::preload(&store).unwrap();
        let translator = Translator::new(&store, &context);
        let feeder = translator.feeder("SRC_F").unwrap();
        assert_eq!(
            translator.device_id(&source_device("BRK1"), &feeder).unwrap(),
            "STORED"
        );
    }

    #[test]
    fn node_ids_use_feeder_prefix_and_are_stable() {
        let store = store_with_feeder();
        let context = IdentifierContext::default();
        let translator = Translator::new(&store, &context);
        let feeder = translator.feeder("SRC_F").unwrap();

        let nodes = translator
            .device_nodes(&source_device("BRK1"), &feeder)
            .unwrap();
        assert_eq!(nodes, vec!["F1000000".to_string(), "F1000001".to_string()]);
        assert_eq!(translator.node_id("CN1", &feeder).unwrap(), "F1000000");
        assert_eq!(
            store.find_node_mapping("350100CN2").unwrap().unwrap().node_id,
            "F1000001"
        );
    }

    #[test]
    fn unknown_feeder_nodes_use_clock_prefix() {
        let store = MemoryStore::new();
        let context = IdentifierContext::default();
        let translator = Translator::new(&store, &context).with_clock(|| 1_700_000_000_000);
        let feeder = translator.feeder("NOPE").unwrap();
        assert_eq!(
            translator.node_id("CN9", &feeder).unwrap(),
            "1701317000000000000000"
        );
    }

    #[test]
    fn exhausted_suffix_space_keeps_source_node() {
        let store = store_with_feeder();
        let context = IdentifierContext::default().with_node_suffix_width(1);
        let translator = Translator::new(&store, &context);
        let feeder = translator.feeder("SRC_F").unwrap();
        for i in 0..10 {
            translator.node_id(&format!("CN{i}"), &feeder).unwrap();
        }
        assert_eq!(translator.node_id("CN_LAST", &feeder).unwrap(), "CN_LAST");
    }
}
