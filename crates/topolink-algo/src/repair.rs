//! Connectivity repair for one feeder.
//!
//! The engine alternates scan and bridge: build the feeder graph, stop when it is
//! a single component, otherwise attach one dangling endpoint of a detached
//! component to the largest component and re-scan from the store. Once the feeder
//! is whole two cleanup passes run: duplicate endpoint pairs are split and nodes
//! referenced by more than [`RepairConfig::max_node_degree`] records are relieved.
//!
//! All writes are compare-and-set on a single endpoint. A rejected or failed write
//! never aborts the run; it is recorded in the report's [`Diagnostics`].

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use topolink_core::{
    Components, Diagnostics, EndpointUpdate, FeederGraph, Terminal, Topo, TopoResult,
};
use topolink_io::TopologyStore;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Upper bound on scan/bridge rounds.
    pub max_iterations: usize,
    /// Largest number of records allowed on one node after the degree pass.
    pub max_node_degree: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_node_degree: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RepairOutcome {
    /// Single component on the first scan.
    AlreadyWhole,
    /// Bridged into a single component.
    Repaired,
    Unresolved { reason: String },
}

impl RepairOutcome {
    pub fn is_whole(&self) -> bool {
        !matches!(self, RepairOutcome::Unresolved { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairReport {
    pub feeder_id: String,
    pub outcome: RepairOutcome,
    pub components_before: usize,
    pub components_after: usize,
    pub iterations: usize,
    pub bridges: usize,
    pub duplicates_split: usize,
    pub degree_reroutes: usize,
    pub failed_writes: usize,
    pub diagnostics: Diagnostics,
}

impl RepairReport {
    fn new(feeder_id: &str) -> Self {
        Self {
            feeder_id: feeder_id.to_string(),
            outcome: RepairOutcome::AlreadyWhole,
            components_before: 0,
            components_after: 0,
            iterations: 0,
            bridges: 0,
            duplicates_split: 0,
            degree_reroutes: 0,
            failed_writes: 0,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Successful endpoint writes across all passes.
    pub fn writes(&self) -> usize {
        self.bridges + self.duplicates_split + self.degree_reroutes
    }
}

enum WriteResult {
    Applied,
    Rejected,
    Failed,
}

/// Endpoint chosen to join a detached component.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Anchor {
    device: String,
    terminal: Terminal,
    current: Option<String>,
}

pub struct RepairEngine<'a> {
    store: &'a dyn TopologyStore,
    config: RepairConfig,
}

impl<'a> RepairEngine<'a> {
    pub fn new(store: &'a dyn TopologyStore, config: RepairConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    /// Make the feeder a single component, then run the cleanup passes.
    ///
    /// Store reads propagate as errors; store writes are isolated per endpoint.
    /// The main-network node of a joined feeder is never rewritten, bridged to
    /// or used as a reroute target.
    pub fn repair_feeder(&self, feeder_id: &str) -> TopoResult<RepairReport> {
        let mut report = RepairReport::new(feeder_id);
        let mut excluded: HashSet<(String, Terminal)> = HashSet::new();
        let junction = self.junction_node(feeder_id)?;
        let junction = junction.as_deref();

        let mut records = self.store.feeder_topology(feeder_id)?;
        let mut graph = FeederGraph::build(&records);
        let mut components = graph.components();
        report.components_before = components.len();

        loop {
            if components.is_whole() {
                if report.bridges > 0 {
                    report.outcome = RepairOutcome::Repaired;
                }
                break;
            }
            if report.iterations >= self.config.max_iterations {
                report.outcome = RepairOutcome::Unresolved {
                    reason: format!(
                        "iteration limit {} reached with {} components",
                        self.config.max_iterations,
                        components.len()
                    ),
                };
                break;
            }
            report.iterations += 1;

            let Some((anchor, target_node)) =
                select_bridge(&records, &graph, &components, &excluded, junction)
            else {
                report.outcome = RepairOutcome::Unresolved {
                    reason: format!("no eligible anchor among {} components", components.len()),
                };
                break;
            };

            let update = EndpointUpdate::new(&anchor.device, anchor.terminal)
                .expecting(anchor.current.as_deref())
                .to_node(Some(&target_node));
            match self.write(&update, "bridge", &mut report) {
                WriteResult::Applied => {
                    report.bridges += 1;
                    debug!(feeder = feeder_id, device = %anchor.device, node = %target_node, "bridged component");
                }
                WriteResult::Rejected | WriteResult::Failed => {
                    excluded.insert((anchor.device.clone(), anchor.terminal));
                }
            }

            records = self.store.feeder_topology(feeder_id)?;
            graph = FeederGraph::build(&records);
            components = graph.components();
        }
        report.components_after = components.len();

        if report.outcome.is_whole() {
            self.split_duplicates(feeder_id, junction, &mut report)?;
            self.relieve_overloaded_nodes(feeder_id, junction, &mut report)?;
        } else {
            warn!(
                feeder = feeder_id,
                components = report.components_after,
                "feeder left unresolved"
            );
        }

        info!(
            feeder = feeder_id,
            outcome = ?report.outcome,
            bridges = report.bridges,
            duplicates = report.duplicates_split,
            reroutes = report.degree_reroutes,
            "repair finished"
        );
        Ok(report)
    }

    /// Main-network node a joined feeder is attached to.
    fn junction_node(&self, feeder_id: &str) -> TopoResult<Option<String>> {
        Ok(self
            .store
            .feeder_join(feeder_id)?
            .filter(|join| join.is_joined)
            .and_then(|join| join.main_node))
    }

    fn write(&self, update: &EndpointUpdate, pass: &str, report: &mut RepairReport) -> WriteResult {
        match self.store.update_endpoint(update) {
            Ok(true) => WriteResult::Applied,
            Ok(false) => {
                report.diagnostics.add_warning_with_entity(
                    pass,
                    &format!("{} endpoint changed since scan", update.terminal),
                    &update.device_id,
                );
                WriteResult::Rejected
            }
            Err(err) => {
                warn!(device = %update.device_id, error = %err, "endpoint update failed");
                report.failed_writes += 1;
                report.diagnostics.add_error_with_entity(
                    "store",
                    &format!("{pass} update failed: {err}"),
                    &update.device_id,
                );
                WriteResult::Failed
            }
        }
    }

    /// Records sharing an unordered endpoint pair keep the first (by id); the
    /// others get a fresh `<base>_<n>` node on their free or second endpoint.
    /// Self-loop records are always split.
    fn split_duplicates(
        &self,
        feeder_id: &str,
        junction: Option<&str>,
        report: &mut RepairReport,
    ) -> TopoResult<()> {
        let records = self.store.feeder_topology(feeder_id)?;
        let mut used: BTreeSet<String> = records
            .iter()
            .flat_map(|topo| topo.nodes().map(str::to_string))
            .collect();

        let mut groups: BTreeMap<(Option<String>, Option<String>), Vec<&Topo>> = BTreeMap::new();
        for topo in &records {
            if topo.populated_count() == 0 {
                continue;
            }
            groups.entry(topo.endpoint_key()).or_default().push(topo);
        }

        let mut counter = 0usize;
        for members in groups.values() {
            for (index, topo) in members.iter().enumerate() {
                let self_loop = topo.first_node.is_some() && topo.first_node == topo.second_node;
                if index == 0 && !self_loop {
                    continue;
                }
                let (terminal, base) = match topo.empty_terminal() {
                    Some(terminal) => match topo.node(terminal.other()) {
                        Some(base) => (terminal, base.to_string()),
                        None => continue,
                    },
                    None if topo.second_node.as_deref() == junction => {
                        match topo.first_node.as_deref() {
                            Some(base) if Some(base) != junction => (Terminal::First, base.to_string()),
                            _ => continue,
                        }
                    }
                    None => match topo.second_node.as_deref() {
                        Some(base) => (Terminal::Second, base.to_string()),
                        None => continue,
                    },
                };
                let fresh = loop {
                    counter += 1;
                    let candidate = format!("{base}_{counter}");
                    if !used.contains(&candidate) {
                        break candidate;
                    }
                };
                used.insert(fresh.clone());

                let update = EndpointUpdate::new(&topo.id, terminal)
                    .expecting(topo.node(terminal))
                    .to_node(Some(&fresh));
                if let WriteResult::Applied = self.write(&update, "duplicate", report) {
                    report.duplicates_split += 1;
                    report.diagnostics.add_warning_with_entity(
                        "duplicate",
                        &format!("{terminal} endpoint regenerated as {fresh}"),
                        &topo.id,
                    );
                }
            }
        }
        Ok(())
    }

    /// Nodes over the degree bound keep their first records; the excess move to
    /// the least-loaded far node of a kept device.
    fn relieve_overloaded_nodes(
        &self,
        feeder_id: &str,
        junction: Option<&str>,
        report: &mut RepairReport,
    ) -> TopoResult<()> {
        let bound = self.config.max_node_degree;
        let records = self.store.feeder_topology(feeder_id)?;
        let graph = FeederGraph::build(&records);
        let by_id: BTreeMap<&str, &Topo> =
            records.iter().map(|topo| (topo.id.as_str(), topo)).collect();
        let mut load: BTreeMap<String, usize> = graph
            .nodes()
            .map(|node| (node.to_string(), graph.reference_count(node)))
            .collect();

        let overloaded: Vec<String> = graph
            .nodes()
            .filter(|node| Some(*node) != junction)
            .filter(|node| graph.reference_count(node) > bound)
            .map(str::to_string)
            .collect();

        for node in overloaded {
            let mut devices: Vec<&str> = graph.devices_on(&node).iter().map(String::as_str).collect();
            devices.sort_unstable();
            let (kept, excess) = devices.split_at(bound.min(devices.len()));

            for device in excess {
                let Some(topo) = by_id.get(device) else {
                    continue;
                };
                let Some(terminal) = topo.terminal_of(&node) else {
                    continue;
                };
                let own_far = topo.node(terminal.other());

                let target = kept
                    .iter()
                    .flat_map(|keeper| graph.nodes_of(keeper).iter())
                    .filter(|candidate| candidate.as_str() != node)
                    .filter(|candidate| Some(candidate.as_str()) != own_far)
                    .filter(|candidate| Some(candidate.as_str()) != junction)
                    .filter(|candidate| load.get(*candidate).copied().unwrap_or(0) < bound)
                    .min_by(|a, b| {
                        let la = load.get(*a).copied().unwrap_or(0);
                        let lb = load.get(*b).copied().unwrap_or(0);
                        la.cmp(&lb).then_with(|| a.cmp(b))
                    })
                    .cloned();

                let Some(target) = target else {
                    report.diagnostics.add_warning_with_entity(
                        "degree",
                        &format!("no reroute target below {bound} for node {node}"),
                        device,
                    );
                    continue;
                };

                let update = EndpointUpdate::new(*device, terminal)
                    .expecting(Some(&node))
                    .to_node(Some(&target));
                if let WriteResult::Applied = self.write(&update, "degree", report) {
                    report.degree_reroutes += 1;
                    if let Some(count) = load.get_mut(&node) {
                        *count = count.saturating_sub(1);
                    }
                    *load.entry(target.clone()).or_insert(0) += 1;
                    debug!(feeder = feeder_id, device = *device, from = %node, to = %target, "rerouted excess device");
                }
            }
        }
        Ok(())
    }
}

/// Pick the target component (largest owning a node, with an anchor available
/// outside it) and the anchor endpoint to rewrite.
fn select_bridge(
    records: &[Topo],
    graph: &FeederGraph,
    components: &Components,
    excluded: &HashSet<(String, Terminal)>,
    junction: Option<&str>,
) -> Option<(Anchor, String)> {
    for (root, members) in components.by_size() {
        let Some(target_node) = target_node(graph, members, junction) else {
            continue;
        };
        let outside = records
            .iter()
            .filter(|topo| components.component_of(&topo.id) != Some(root));
        if let Some(anchor) = select_anchor(outside, graph, excluded, junction) {
            return Some((anchor, target_node));
        }
    }
    None
}

/// Dead-end node of an end device in the component, else its smallest node.
fn target_node(graph: &FeederGraph, members: &[String], junction: Option<&str>) -> Option<String> {
    let nodes: BTreeSet<&str> = members
        .iter()
        .flat_map(|device| graph.nodes_of(device).iter().map(String::as_str))
        .filter(|node| Some(*node) != junction)
        .collect();
    nodes
        .iter()
        .find(|node| graph.is_dead_end(node))
        .or_else(|| nodes.iter().next())
        .map(|node| node.to_string())
}

/// Empty endpoints first, then endpoints whose node only the device itself uses.
fn select_anchor<'r>(
    candidates: impl Iterator<Item = &'r Topo> + Clone,
    graph: &FeederGraph,
    excluded: &HashSet<(String, Terminal)>,
    junction: Option<&str>,
) -> Option<Anchor> {
    let allowed =
        |topo: &Topo, terminal: Terminal| !excluded.contains(&(topo.id.clone(), terminal));

    for topo in candidates.clone() {
        if let Some(terminal) = Terminal::BOTH
            .into_iter()
            .find(|t| topo.node(*t).is_none() && allowed(topo, *t))
        {
            return Some(Anchor {
                device: topo.id.clone(),
                terminal,
                current: None,
            });
        }
    }
    for topo in candidates {
        for terminal in Terminal::BOTH {
            if let Some(node) = topo.node(terminal) {
                if graph.is_dead_end(node) && Some(node) != junction && allowed(topo, terminal) {
                    return Some(Anchor {
                        device: topo.id.clone(),
                        terminal,
                        current: Some(node.to_string()),
                    });
                }
            }
        }
    }
    None
}
