//! One source export through every pass: parse, translate and sync, repair,
//! stitch, notify. Failures are isolated per device and per feeder.
//!
//! A feeder joined on an earlier run has its junction re-applied right after
//! sync, so repair runs against the attached feeder.

use anyhow::{Context, Result};
use std::path::Path;
use topolink_algo::{
    select_sub_head, sync_device, IdentifierContext, JunctionHint, RepairConfig, RepairEngine,
    ResolvedFeeder, StitchOutcome, Stitcher, Translator,
};
use topolink_core::TopoResult;
use topolink_io::{notify_best_effort, parse_cim_file, CimModel, FeederNotifier, TopologyStore};
use tracing::{error, info, warn};

use crate::job::FeederResult;

/// Shared, read-only inputs of every job in a run.
pub struct PipelineContext<'a> {
    pub store: &'a dyn TopologyStore,
    pub identifiers: &'a IdentifierContext,
    pub notifier: &'a dyn FeederNotifier,
    pub repair: RepairConfig,
}

pub fn ingest_file(path: &Path, ctx: &PipelineContext<'_>) -> Result<Vec<FeederResult>> {
    let model = parse_cim_file(path)
        .with_context(|| format!("reading source export '{}'", path.display()))?;
    Ok(ingest_model(&model, ctx))
}

/// Run the passes for every current feeder of `model`.
pub fn ingest_model(model: &CimModel, ctx: &PipelineContext<'_>) -> Vec<FeederResult> {
    let translator = Translator::new(ctx.store, ctx.identifiers);
    let mut results = Vec::new();

    for circuit in model.current_feeders() {
        let feeder = match translator.feeder(&circuit.id) {
            Ok(feeder) => feeder,
            Err(err) => {
                error!(feeder = %circuit.id, error = %err, "feeder lookup failed");
                results.push(FeederResult {
                    source_id: circuit.id.clone(),
                    feeder_id: String::new(),
                    owner: String::new(),
                    devices_synced: 0,
                    devices_failed: 0,
                    devices_changed: 0,
                    repair: None,
                    stitch: None,
                    error: Some(err.to_string()),
                    notified: false,
                });
                continue;
            }
        };
        results.push(process_feeder(model, &translator, &feeder, ctx));
    }
    results
}

fn process_feeder(
    model: &CimModel,
    translator: &Translator<'_>,
    feeder: &ResolvedFeeder,
    ctx: &PipelineContext<'_>,
) -> FeederResult {
    let feeder_id = feeder.record_id().to_string();
    let mut result = FeederResult {
        source_id: feeder.source_id.clone(),
        feeder_id: feeder_id.clone(),
        owner: feeder.owner.clone(),
        devices_synced: 0,
        devices_failed: 0,
        devices_changed: 0,
        repair: None,
        stitch: None,
        error: None,
        notified: false,
    };
    if !feeder.is_known() {
        warn!(feeder = %feeder.source_id, "feeder not registered, using source id");
    }

    for device in model.feeder_devices(&feeder.source_id) {
        match sync_device(translator, &device, feeder) {
            Ok(outcome) => {
                result.devices_synced += 1;
                if !outcome.is_unchanged() {
                    result.devices_changed += 1;
                }
            }
            Err(err) => {
                result.devices_failed += 1;
                warn!(feeder = %feeder_id, device = %device.id, error = %err, "device sync failed, skipped");
            }
        }
    }

    let joined = match rejoin_feeder(&feeder_id, ctx) {
        Ok(Some(outcome)) => {
            result.stitch = Some(outcome);
            true
        }
        Ok(None) => false,
        Err(err) => {
            warn!(feeder = %feeder_id, error = %err, "rejoin failed");
            result.error = Some(format!("stitch: {err}"));
            true
        }
    };

    match RepairEngine::new(ctx.store, ctx.repair).repair_feeder(&feeder_id) {
        Ok(report) => {
            let whole = report.outcome.is_whole();
            result.repair = Some(report);
            if whole && !joined {
                match stitch_feeder(model, feeder, ctx) {
                    Ok(outcome) => result.stitch = Some(outcome),
                    Err(err) => {
                        warn!(feeder = %feeder_id, error = %err, "stitch failed");
                        result.error = Some(format!("stitch: {err}"));
                    }
                }
            }
        }
        Err(err) => {
            warn!(feeder = %feeder_id, error = %err, "repair failed");
            result.error = Some(format!("repair: {err}"));
        }
    }

    result.notified = notify_best_effort(ctx.notifier, &feeder_id, &feeder.owner);
    info!(
        feeder = %feeder_id,
        synced = result.devices_synced,
        failed = result.devices_failed,
        "feeder processed"
    );
    result
}

/// Re-apply the recorded junction of an already joined feeder.
fn rejoin_feeder(feeder_id: &str, ctx: &PipelineContext<'_>) -> TopoResult<Option<StitchOutcome>> {
    match ctx.store.feeder_join(feeder_id)? {
        Some(join) if join.is_joined => Stitcher::new(ctx.store)
            .stitch_feeder(feeder_id, &JunctionHint::default())
            .map(Some),
        _ => Ok(None),
    }
}

fn stitch_feeder(
    model: &CimModel,
    feeder: &ResolvedFeeder,
    ctx: &PipelineContext<'_>,
) -> TopoResult<StitchOutcome> {
    let feeder_id = feeder.record_id();
    let needs_exploration = match ctx.store.feeder_join(feeder_id)? {
        Some(join) => join.main_device_id.is_none() || join.sub_device_id.is_none(),
        None => true,
    };
    let hint = if needs_exploration {
        junction_hint(model, feeder, ctx.store)?
    } else {
        JunctionHint::default()
    };
    Stitcher::new(ctx.store).stitch_feeder(feeder_id, &hint)
}

/// Resolve the explored junction (source ids) into internal ids.
fn junction_hint(
    model: &CimModel,
    feeder: &ResolvedFeeder,
    store: &dyn TopologyStore,
) -> TopoResult<JunctionHint> {
    let Some(head) = select_sub_head(model, &feeder.source_id) else {
        return Ok(JunctionHint::default());
    };
    Ok(JunctionHint {
        main_device_id: store.main_junction_for_source(&head.busbar)?,
        sub_device_id: store.find_id_mapping(&head.device)?.map(|mapping| mapping.id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use topolink_algo::RepairOutcome;
    use topolink_core::{FeederGraph, FeederRecord, Terminal, Topo};
    use topolink_io::{parse_cim_str, MemoryStore, RecordingNotifier};

    const FEEDER_XML: &str = include_str!("../tests/fixtures/feeder_sf1.xml");

    fn registered_store() -> MemoryStore {
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

    #[test]
    fn model_is_synced_repaired_and_notified() {
        let store = registered_store();
        let identifiers = IdentifierContext::preload(&store).unwrap();
        let notifier = RecordingNotifier::default();
        let ctx = PipelineContext {
            store: &store,
            identifiers: &identifiers,
            notifier: &notifier,
            repair: RepairConfig::default(),
        };

        let model = parse_cim_str(FEEDER_XML).unwrap();
        let results = ingest_model(&model, &ctx);
        assert_eq!(results.len(), 1);
        let feeder = &results[0];
        assert_eq!(feeder.feeder_id, "F100");
        assert_eq!(feeder.devices_synced, 3);
        assert_eq!(feeder.devices_failed, 0);

        // SEG2 arrived detached and was bridged in.
        let repair = feeder.repair.as_ref().unwrap();
        assert_eq!(repair.outcome, RepairOutcome::Repaired);
        assert!(FeederGraph::build(&store.feeder_topology("F100").unwrap())
            .components()
            .is_whole());

        assert!(feeder.notified);
        assert_eq!(notifier.calls(), vec![("F100".to_string(), "350000".to_string())]);
    }

    #[test]
    fn explored_junction_is_stitched_to_main_node() {
        let store = registered_store();
        let identifiers = IdentifierContext::preload(&store).unwrap();
        let notifier = RecordingNotifier::default();
        let ctx = PipelineContext {
            store: &store,
            identifiers: &identifiers,
            notifier: &notifier,
            repair: RepairConfig::default(),
        };
        let model = parse_cim_str(FEEDER_XML).unwrap();
        let results = ingest_model(&model, &ctx);

        match results[0].stitch.as_ref().unwrap() {
            StitchOutcome::Stitched {
                sub_device,
                main_node,
                ..
            } => {
                let seg1 = store.find_id_mapping("SEG1").unwrap().unwrap();
                assert_eq!(sub_device, &seg1.id);
                assert_eq!(main_node, "M1");
            }
            other => panic!("unexpected stitch outcome {other:?}"),
        }
        assert!(store.feeder_join("F100").unwrap().unwrap().is_joined);
    }

    #[test]
    fn second_ingest_reuses_identifiers() {
        let store = registered_store();
        let identifiers = IdentifierContext::default();
        let notifier = RecordingNotifier::default();
        let ctx = PipelineContext {
            store: &store,
            identifiers: &identifiers,
            notifier: &notifier,
            repair: RepairConfig::default(),
        };
        let model = parse_cim_str(FEEDER_XML).unwrap();
        ingest_model(&model, &ctx);
        let records = store.feeder_topology("F100").unwrap().len();
        let devices = store.all_id_mappings().unwrap().len();
        let nodes = store.all_node_mappings().unwrap().len();

        let results = ingest_model(&model, &ctx);
        assert_eq!(results[0].devices_synced, 3);
        assert_eq!(store.all_id_mappings().unwrap().len(), devices);
        assert_eq!(store.all_node_mappings().unwrap().len(), nodes);
        assert_eq!(store.feeder_topology("F100").unwrap().len(), records);

        // Sync put SEG1's source node back; the recorded junction is re-applied.
        let seg1 = store.find_id_mapping("SEG1").unwrap().unwrap().id;
        assert_eq!(
            results[0].stitch,
            Some(StitchOutcome::Stitched {
                sub_device: seg1.clone(),
                terminal: Some(Terminal::Second),
                main_node: "M1".into(),
            })
        );
        let topo = store.topology(&seg1).unwrap().unwrap();
        assert_eq!(topo.second_node.as_deref(), Some("M1"));
        assert!(store.feeder_join("F100").unwrap().unwrap().is_joined);
        assert!(results[0].repair.as_ref().unwrap().outcome.is_whole());
    }

    #[test]
    fn repair_after_reingest_keeps_main_junction() {
        let store = registered_store();
        let identifiers = IdentifierContext::default();
        let notifier = RecordingNotifier::default();
        let ctx = PipelineContext {
            store: &store,
            identifiers: &identifiers,
            notifier: &notifier,
            repair: RepairConfig::default(),
        };
        let model = parse_cim_str(FEEDER_XML).unwrap();
        ingest_model(&model, &ctx);
        ingest_model(&model, &ctx);

        let report = RepairEngine::new(&store, RepairConfig::default())
            .repair_feeder("F100")
            .unwrap();
        assert_eq!(report.outcome, RepairOutcome::AlreadyWhole);

        let seg1 = store.find_id_mapping("SEG1").unwrap().unwrap().id;
        let topo = store.topology(&seg1).unwrap().unwrap();
        assert_eq!(topo.terminal_of("M1"), Some(Terminal::Second));
        assert_eq!(store.node_reference_count("M1").unwrap(), 1);
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xml");
        std::fs::write(&path, "<rdf:RDF><cim:Circuit></rdf:RDF>").unwrap();

        let store = MemoryStore::new();
        let identifiers = IdentifierContext::default();
        let notifier = RecordingNotifier::default();
        let ctx = PipelineContext {
            store: &store,
            identifiers: &identifiers,
            notifier: &notifier,
            repair: RepairConfig::default(),
        };
        assert!(ingest_file(&path, &ctx).is_err());
        assert!(notifier.calls().is_empty());
    }
}
