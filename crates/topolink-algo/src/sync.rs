//! Source device -> stored topology record.

use serde::{Deserialize, Serialize};
use topolink_core::{EndpointUpdate, Topo, TopoResult};
use topolink_io::{SourceDevice, TopologyStore};
use tracing::{debug, warn};

use crate::translate::{audit_stamp, ResolvedFeeder, Translator};

/// What [`sync_device`] changed for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub device_id: String,
    pub inserted: bool,
    pub feeder_changed: bool,
    pub endpoints_replaced: bool,
    /// Records moved off extra terminals onto a primary.
    pub rerouted: usize,
}

impl SyncOutcome {
    pub fn is_unchanged(&self) -> bool {
        !self.inserted && !self.feeder_changed && !self.endpoints_replaced && self.rerouted == 0
    }
}

/// Bring the stored record of one source device in line with the source model.
///
/// The first two translated terminals become the record's endpoints. Any further
/// terminal is never stored: other records terminating on it are moved to the
/// less-loaded primary so the device keeps its connectivity.
pub fn sync_device(
    translator: &Translator<'_>,
    device: &SourceDevice,
    feeder: &ResolvedFeeder,
) -> TopoResult<SyncOutcome> {
    let store = translator.store();
    let device_id = translator.device_id(device, feeder)?;
    let nodes = translator.device_nodes(device, feeder)?;
    let first = nodes.first().map(String::as_str);
    let second = nodes.get(1).map(String::as_str);

    let mut outcome = SyncOutcome {
        device_id: device_id.clone(),
        ..SyncOutcome::default()
    };

    match store.topology(&device_id)? {
        None => {
            let topo = Topo::new(&device_id, &feeder.owner, feeder.record_id())
                .with_nodes(first, second)
                .with_stamp(audit_stamp(&feeder.owner, feeder.record_id()));
            store.insert_topology(topo)?;
            outcome.inserted = true;
        }
        Some(existing) => {
            if existing.feeder_id != feeder.record_id() {
                store.update_feeder_of(&device_id, feeder.record_id())?;
                outcome.feeder_changed = true;
            }
            let wanted = Topo::new(&device_id, "", "").with_nodes(first, second);
            let distinct = wanted.first_node != wanted.second_node;
            if existing.endpoint_key() == wanted.endpoint_key() && distinct {
                debug!(device = %device_id, "endpoints unchanged");
            } else {
                store.replace_endpoints(&device_id, first, second)?;
                outcome.endpoints_replaced = true;
            }
        }
    }

    if nodes.len() > 2 {
        outcome.rerouted = reroute_extra_terminals(store, &device_id, &nodes)?;
    }
    Ok(outcome)
}

fn reroute_extra_terminals(
    store: &dyn TopologyStore,
    device_id: &str,
    nodes: &[String],
) -> TopoResult<usize> {
    let (primary_a, primary_b) = (&nodes[0], &nodes[1]);
    let mut rerouted = 0;
    for extra in &nodes[2..] {
        if extra == primary_a || extra == primary_b {
            continue;
        }
        let load_a = store.node_reference_count(primary_a)?;
        let load_b = store.node_reference_count(primary_b)?;
        let target = if load_b < load_a { primary_b } else { primary_a };

        for other in store.devices_on_node(extra)? {
            if other.id == device_id {
                continue;
            }
            let Some(terminal) = other.terminal_of(extra) else {
                continue;
            };
            let update = EndpointUpdate::new(&other.id, terminal)
                .expecting(Some(extra))
                .to_node(Some(target));
            match store.update_endpoint(&update) {
                Ok(true) => rerouted += 1,
                Ok(false) => {
                    debug!(device = %other.id, node = %extra, "endpoint moved before reroute")
                }
                Err(err) => {
                    warn!(device = %other.id, node = %extra, error = %err, "reroute off extra terminal failed")
                }
            }
        }
    }
    Ok(rerouted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::IdentifierContext;
    use topolink_core::{DeviceKind, FeederRecord, IdMapping, NodeMapping};
    use topolink_io::MemoryStore;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_feeder(FeederRecord {
            id: "F1".into(),
            source_id: "SF1".into(),
            owner: "350000".into(),
        });
        store
    }

    fn map_node(store: &MemoryStore, source: &str, internal: &str) {
        store
            .insert_node_mapping_if_absent(NodeMapping {
                key: NodeMapping::key_for("350000", source),
                node_id: internal.into(),
            })
            .unwrap();
    }

    fn device(id: &str, kind: DeviceKind, nodes: &[&str]) -> SourceDevice {
        SourceDevice {
            id: id.into(),
            kind,
            name: id.into(),
            feeder_id: "SF1".into(),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
        }
    }

    #[test]
    fn first_sync_inserts_then_second_is_unchanged() {
        let store = store();
        let context = IdentifierContext::default();
        let translator = Translator::new(&store, &context);
        let feeder = translator.feeder("SF1").unwrap();
        let source = device("SEG", DeviceKind::AcLineSegment, &["CN1", "CN2"]);

        let first = sync_device(&translator, &source, &feeder).unwrap();
        assert!(first.inserted);
        let second = sync_device(&translator, &source, &feeder).unwrap();
        assert!(second.is_unchanged());

        let topo = store.topology(&first.device_id).unwrap().unwrap();
        assert_eq!(topo.feeder_id, "F1");
        assert_eq!(topo.populated_count(), 2);
    }

    #[test]
    fn moved_device_updates_feeder_and_endpoints() {
        let store = store();
        store
            .insert_id_mapping(IdMapping {
                id: "D1".into(),
                source_id: "SEG".into(),
                table: "aclinesegment".into(),
                region_id: "350000".into(),
            })
            .unwrap();
        store
            .insert_topology(Topo::new("D1", "350000", "OLD").with_nodes(Some("N1"), None))
            .unwrap();
        map_node(&store, "CN1", "N1");
        map_node(&store, "CN2", "N2");

        let context = IdentifierContext::default();
        let translator = Translator::new(&store, &context);
        let feeder = translator.feeder("SF1").unwrap();
        let outcome = sync_device(
            &translator,
            &device("SEG", DeviceKind::AcLineSegment, &["CN1", "CN2"]),
            &feeder,
        )
        .unwrap();

        assert!(outcome.feeder_changed);
        assert!(outcome.endpoints_replaced);
        let topo = store.topology("D1").unwrap().unwrap();
        assert_eq!(topo.feeder_id, "F1");
        assert_eq!(topo.second_node.as_deref(), Some("N2"));
    }

    #[test]
    fn extra_terminals_are_rerouted_to_less_loaded_primary() {
        let store = store();
        store
            .insert_id_mapping(IdMapping {
                id: "BUS".into(),
                source_id: "SBUS".into(),
                table: "busbarsection".into(),
                region_id: "350000".into(),
            })
            .unwrap();
        map_node(&store, "CN1", "N1");
        map_node(&store, "CN2", "N2");
        map_node(&store, "CN3", "N3");
        // N1 carries two other devices, N2 one: the extra node N3 goes to N2.
        for (id, first) in [("A", "N1"), ("B", "N1"), ("C", "N2"), ("X", "N3")] {
            store
                .insert_topology(Topo::new(id, "350000", "F1").with_nodes(Some(first), None))
                .unwrap();
        }

        let context = IdentifierContext::default();
        let translator = Translator::new(&store, &context);
        let feeder = translator.feeder("SF1").unwrap();
        let outcome = sync_device(
            &translator,
            &device("SBUS", DeviceKind::BusbarSection, &["CN1", "CN2", "CN3"]),
            &feeder,
        )
        .unwrap();

        assert!(outcome.inserted);
        assert_eq!(outcome.rerouted, 1);
        let bus = store.topology("BUS").unwrap().unwrap();
        assert_eq!(bus.first_node.as_deref(), Some("N1"));
        assert_eq!(bus.second_node.as_deref(), Some("N2"));
        assert_eq!(
            store.topology("X").unwrap().unwrap().first_node.as_deref(),
            Some("N2")
        );
        assert_eq!(store.node_reference_count("N3").unwrap(), 0);
    }
}
