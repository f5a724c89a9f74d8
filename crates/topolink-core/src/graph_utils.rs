use crate::Topo;
use anyhow::{anyhow, Result};
use petgraph::algo::connected_components;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Shared-node adjacency for one feeder.
///
/// Built once per scan: `device -> nodes` and `node -> devices`. Devices without
/// any node are kept so they surface as single-device components. Both maps are
/// ordered so traversal order (and therefore component representatives) is stable.
#[derive(Debug, Clone, Default)]
pub struct FeederGraph {
    device_nodes: BTreeMap<String, Vec<String>>,
    node_devices: BTreeMap<String, Vec<String>>,
}

impl FeederGraph {
    pub fn build(records: &[Topo]) -> Self {
        Self::from_endpoints(records.iter().map(|topo| (topo.id.as_str(), topo.nodes())))
    }

    /// Build from arbitrary `(device, nodes)` pairs. Unlike [`Topo`] records the node
    /// list may be longer than two, which the source-model walk relies on.
    pub fn from_endpoints<'a, I, N>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, N)>,
        N: IntoIterator<Item = &'a str>,
    {
        let mut graph = FeederGraph::default();
        for (device, nodes) in entries {
            let slot = graph.device_nodes.entry(device.to_string()).or_default();
            for node in nodes {
                if node.is_empty() {
                    continue;
                }
                if !slot.iter().any(|existing| existing == node) {
                    slot.push(node.to_string());
                }
                let users = graph.node_devices.entry(node.to_string()).or_default();
                if !users.iter().any(|existing| existing == device) {
                    users.push(device.to_string());
                }
            }
        }
        graph
    }

    pub fn device_count(&self) -> usize {
        self.device_nodes.len()
    }

    pub fn node_count(&self) -> usize {
        self.node_devices.len()
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.device_nodes.keys().map(String::as_str)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.node_devices.keys().map(String::as_str)
    }

    pub fn contains_device(&self, device: &str) -> bool {
        self.device_nodes.contains_key(device)
    }

    pub fn nodes_of(&self, device: &str) -> &[String] {
        self.device_nodes
            .get(device)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn devices_on(&self, node: &str) -> &[String] {
        self.node_devices
            .get(node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of distinct devices referencing `node`.
    pub fn reference_count(&self, node: &str) -> usize {
        self.devices_on(node).len()
    }

    /// A node used by exactly one device is an electrical dead end.
    pub fn is_dead_end(&self, node: &str) -> bool {
        self.reference_count(node) == 1
    }

    pub fn dead_end_nodes(&self) -> Vec<&str> {
        self.node_devices
            .iter()
            .filter(|(_, devices)| devices.len() == 1)
            .map(|(node, _)| node.as_str())
            .collect()
    }

    /// Devices sharing at least one node with `device`.
    pub fn neighbors(&self, device: &str) -> BTreeSet<&str> {
        let mut result = BTreeSet::new();
        for node in self.nodes_of(device) {
            for other in self.devices_on(node) {
                if other != device {
                    result.insert(other.as_str());
                }
            }
        }
        result
    }

    /// Connected components via explicit-stack depth-first traversal.
    ///
    /// The visited set is allocated per call, and traversal starts from every device
    /// so disjoint components are all covered. Each component is keyed by the device
    /// that started its traversal.
    pub fn components(&self) -> Components {
        let mut visited: HashSet<&str> = HashSet::with_capacity(self.device_nodes.len());
        let mut groups = BTreeMap::new();
        for start in self.device_nodes.keys() {
            if visited.contains(start.as_str()) {
                continue;
            }
            let mut members = Vec::new();
            let mut stack = vec![start.as_str()];
            while let Some(device) = stack.pop() {
                if !visited.insert(device) {
                    continue;
                }
                members.push(device.to_string());
                for node in self.nodes_of(device) {
                    for next in self.devices_on(node) {
                        if !visited.contains(next.as_str()) {
                            stack.push(next.as_str());
                        }
                    }
                }
            }
            members.sort();
            groups.insert(start.clone(), members);
        }
        Components::from_groups(groups)
    }

    /// Component count through union-find, for callers that only need the count.
    pub fn component_count(&self) -> usize {
        let index: HashMap<&str, usize> = self
            .device_nodes
            .keys()
            .enumerate()
            .map(|(i, device)| (device.as_str(), i))
            .collect();
        let mut sets = UnionFind::<usize>::new(index.len());
        for devices in self.node_devices.values() {
            let mut iter = devices.iter().filter_map(|d| index.get(d.as_str()).copied());
            if let Some(first) = iter.next() {
                for other in iter {
                    sets.union(first, other);
                }
            }
        }
        let roots: HashSet<usize> = sets.into_labeling().into_iter().collect();
        roots.len()
    }

    /// Device-level petgraph view: one graph node per device, one edge per shared node
    /// (star from the first device on that node). Edge weights carry the node value.
    pub fn to_petgraph(&self) -> UnGraph<String, String> {
        let mut graph = UnGraph::new_undirected();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();
        for device in self.device_nodes.keys() {
            index.insert(device.as_str(), graph.add_node(device.clone()));
        }
        for (node, devices) in &self.node_devices {
            if let Some((first, rest)) = devices.split_first() {
                for other in rest {
                    if let (Some(a), Some(b)) = (index.get(first.as_str()), index.get(other.as_str()))
                    {
                        graph.add_edge(*a, *b, node.clone());
                    }
                }
            }
        }
        graph
    }
}

/// Component map keyed by a representative device id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Components {
    groups: BTreeMap<String, Vec<String>>,
    membership: HashMap<String, String>,
}

impl Components {
    fn from_groups(groups: BTreeMap<String, Vec<String>>) -> Self {
        let mut membership = HashMap::new();
        for (root, members) in &groups {
            for member in members {
                membership.insert(member.clone(), root.clone());
            }
        }
        Self { groups, membership }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// An empty feeder or a single component counts as whole.
    pub fn is_whole(&self) -> bool {
        self.groups.len() <= 1
    }

    pub fn representatives(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn members(&self, representative: &str) -> &[String] {
        self.groups
            .get(representative)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn component_of(&self, device: &str) -> Option<&str> {
        self.membership.get(device).map(String::as_str)
    }

    pub fn same_component(&self, a: &str, b: &str) -> bool {
        match (self.component_of(a), self.component_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups
            .iter()
            .map(|(root, members)| (root.as_str(), members.as_slice()))
    }

    /// Largest component first; ties broken by representative id.
    pub fn by_size(&self) -> Vec<(&str, &[String])> {
        let mut ordered: Vec<_> = self.iter().collect();
        ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));
        ordered
    }
}

/// Summary statistics produced by `graph stats`.
#[derive(Debug)]
pub struct GraphStats {
    pub device_count: usize,
    pub node_count: usize,
    pub connected_components: usize,
    pub min_degree: usize,
    pub avg_degree: f64,
    pub max_degree: usize,
    /// Largest number of devices sharing one node
    pub max_node_fanout: usize,
    pub dead_ends: usize,
}

/// Device-degree distribution, node fan-out and component count for one feeder.
pub fn graph_stats(graph: &FeederGraph) -> GraphStats {
    let device_count = graph.device_count();
    let degrees: Vec<usize> = graph
        .devices()
        .map(|device| graph.neighbors(device).len())
        .collect();
    let min_degree = degrees.iter().copied().min().unwrap_or(0);
    let max_degree = degrees.iter().copied().max().unwrap_or(0);
    let avg_degree = if device_count == 0 {
        0.0
    } else {
        degrees.iter().sum::<usize>() as f64 / device_count as f64
    };
    let max_node_fanout = graph
        .nodes()
        .map(|node| graph.reference_count(node))
        .max()
        .unwrap_or(0);
    GraphStats {
        device_count,
        node_count: graph.node_count(),
        connected_components: connected_components(&graph.to_petgraph()),
        min_degree,
        avg_degree,
        max_degree,
        max_node_fanout,
        dead_ends: graph.dead_end_nodes().len(),
    }
}

/// Export the feeder to a DOT string (Graphviz) with devices as boxes and nodes as points.
pub fn export_graph(graph: &FeederGraph, format: &str) -> Result<String> {
    match format.to_ascii_lowercase().as_str() {
        "graphviz" | "dot" => Ok(render_dot(graph)),
        other => Err(anyhow!("unsupported graph export format '{other}'")),
    }
}

fn render_dot(graph: &FeederGraph) -> String {
    let mut buffer = String::new();
    buffer.push_str("graph feeder {\n");
    for device in graph.devices() {
        let label = sanitize_label(device);
        buffer.push_str(&format!("  \"d:{label}\" [shape=box,label=\"{label}\"];\n"));
    }
    for node in graph.nodes() {
        let label = sanitize_label(node);
        buffer.push_str(&format!("  \"n:{label}\" [shape=point,xlabel=\"{label}\"];\n"));
        for device in graph.devices_on(node) {
            let device = sanitize_label(device);
            buffer.push_str(&format!("  \"d:{device}\" -- \"n:{label}\";\n"));
        }
    }
    buffer.push('}');
    buffer
}

fn sanitize_label(label: &str) -> String {
    label.replace('"', "\\\"")
}
