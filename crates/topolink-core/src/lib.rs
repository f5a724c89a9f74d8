//! # topolink-core: Feeder Topology Model
//!
//! Provides the record types shared by every topolink crate and the feeder graph
//! used for connectivity analysis.
//!
//! ## Design Philosophy
//!
//! A distribution feeder is stored as a flat table of **two-terminal device records**
//! ([`Topo`]). Connection points ("nodes") are not stored on their own: a node exists
//! only as a string value shared by the `first_node`/`second_node` fields of two or more
//! records. Two devices are adjacent iff they share a node value.
//!
//! This keeps the persisted shape identical to the upstream topology table while the
//! [`graph_utils::FeederGraph`] view rebuilds adjacency on demand:
//! - device -> node values (at most two per record)
//! - node value -> devices referencing it
//! - connected components (a feeder must form exactly one)
//!
//! ## Quick Start
//!
//! ```rust
//! use topolink_core::*;
//!
//! let records = vec![
//!     Topo::new("D1", "350000", "F1").with_nodes(Some("A"), Some("B")),
//!     Topo::new("D2", "350000", "F1").with_nodes(Some("B"), Some("C")),
//!     Topo::new("D3", "350000", "F1").with_nodes(None, Some("D")),
//! ];
//!
//! let graph = FeederGraph::build(&records);
//! let components = graph.components();
//! assert_eq!(components.len(), 2);
//! assert!(!components.is_whole());
//! ```
//!
//! ## Modules
//!
//! - [`diagnostics`] - Issue collection for sync/repair/stitch passes
//! - [`error`] - Unified error type
//! - [`graph_utils`] - Adjacency, components, statistics and DOT export

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod diagnostics;
pub mod error;
pub mod graph_utils;

pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{TopoError, TopoResult};
pub use graph_utils::*;

/// One of the two endpoints of a device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Terminal {
    First,
    Second,
}

impl Terminal {
    pub const BOTH: [Terminal; 2] = [Terminal::First, Terminal::Second];

    pub fn other(self) -> Terminal {
        match self {
            Terminal::First => Terminal::Second,
            Terminal::Second => Terminal::First,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Terminal::First => "first",
            Terminal::Second => "second",
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device-topology record: the unit of electrical connectivity.
///
/// Empty node strings coming from upstream tables are normalized to `None`
/// by [`Topo::with_nodes`] and [`Topo::set_node`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topo {
    pub id: String,
    pub owner: String,
    pub feeder_id: String,
    #[serde(default)]
    pub first_node: Option<String>,
    #[serde(default)]
    pub second_node: Option<String>,
    #[serde(default)]
    pub effective_time: Option<String>,
    #[serde(default)]
    pub expiry_time: Option<String>,
    #[serde(default)]
    pub stamp: Option<String>,
}

impl Topo {
    pub fn new(id: impl Into<String>, owner: impl Into<String>, feeder_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            feeder_id: feeder_id.into(),
            first_node: None,
            second_node: None,
            effective_time: None,
            expiry_time: None,
            stamp: None,
        }
    }

    pub fn with_nodes(mut self, first: Option<&str>, second: Option<&str>) -> Self {
        self.first_node = normalize_node(first);
        self.second_node = normalize_node(second);
        self
    }

    pub fn with_stamp(mut self, stamp: impl Into<String>) -> Self {
        self.stamp = Some(stamp.into());
        self
    }

    /// Node value held by one terminal, `None` when unassigned.
    pub fn node(&self, terminal: Terminal) -> Option<&str> {
        match terminal {
            Terminal::First => self.first_node.as_deref(),
            Terminal::Second => self.second_node.as_deref(),
        }
    }

    pub fn set_node(&mut self, terminal: Terminal, node: Option<&str>) {
        let value = normalize_node(node);
        match terminal {
            Terminal::First => self.first_node = value,
            Terminal::Second => self.second_node = value,
        }
    }

    /// Populated node values in terminal order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        Terminal::BOTH.into_iter().filter_map(move |t| self.node(t))
    }

    pub fn populated_count(&self) -> usize {
        self.nodes().count()
    }

    /// First terminal without a node, if any.
    pub fn empty_terminal(&self) -> Option<Terminal> {
        Terminal::BOTH.into_iter().find(|t| self.node(*t).is_none())
    }

    /// Terminal holding `node`, first terminal wins when both do.
    pub fn terminal_of(&self, node: &str) -> Option<Terminal> {
        Terminal::BOTH
            .into_iter()
            .find(|t| self.node(*t) == Some(node))
    }

    /// Order-insensitive endpoint pair used for duplicate detection.
    pub fn endpoint_key(&self) -> (Option<String>, Option<String>) {
        let a = self.first_node.clone();
        let b = self.second_node.clone();
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

/// Treat blank node strings as "no node".
pub fn normalize_node(node: Option<&str>) -> Option<String> {
    node.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Source device classes carried by the CIM export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Breaker,
    Disconnector,
    Fuse,
    PowerTransformer,
    BusbarSection,
    AcLineSegment,
    Pole,
    FaultIndicator,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 8] = [
        DeviceKind::Breaker,
        DeviceKind::Disconnector,
        DeviceKind::Fuse,
        DeviceKind::PowerTransformer,
        DeviceKind::BusbarSection,
        DeviceKind::AcLineSegment,
        DeviceKind::Pole,
        DeviceKind::FaultIndicator,
    ];

    /// Element name used by the RDF export.
    pub fn cim_tag(&self) -> &'static str {
        match self {
            DeviceKind::Breaker => "Breaker",
            DeviceKind::Disconnector => "Disconnector",
            DeviceKind::Fuse => "Fuse",
            DeviceKind::PowerTransformer => "PowerTransformer",
            DeviceKind::BusbarSection => "BusbarSection",
            DeviceKind::AcLineSegment => "ACLineSegment",
            DeviceKind::Pole => "Pole",
            DeviceKind::FaultIndicator => "Faultindicator",
        }
    }

    pub fn from_cim_tag(tag: &str) -> Option<DeviceKind> {
        DeviceKind::ALL
            .into_iter()
            .find(|kind| kind.cim_tag().eq_ignore_ascii_case(tag))
    }

    /// Internal table the device record lives in.
    pub fn table(&self) -> &'static str {
        match self {
            DeviceKind::Breaker => "breaker",
            DeviceKind::Disconnector => "disconnector",
            DeviceKind::Fuse => "fuse",
            DeviceKind::PowerTransformer => "powertransformer",
            DeviceKind::BusbarSection => "busbarsection",
            DeviceKind::AcLineSegment => "aclinesegment",
            DeviceKind::Pole => "pole",
            DeviceKind::FaultIndicator => "faultindicator",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Source device id -> internal device id, scoped by region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    pub id: String,
    pub source_id: String,
    pub table: String,
    pub region_id: String,
}

/// `owner + source node id` -> internal node id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMapping {
    pub key: String,
    pub node_id: String,
}

impl NodeMapping {
    pub fn key_for(owner: &str, source_node: &str) -> String {
        format!("{owner}{source_node}")
    }
}

/// Feeder line descriptor: source feeder id -> internal feeder id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeederRecord {
    pub id: String,
    pub source_id: String,
    pub owner: String,
}

/// Join state between a distribution feeder and the main network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeederJoin {
    pub feeder_id: String,
    #[serde(default)]
    pub is_joined: bool,
    /// Main-network junction device.
    #[serde(default)]
    pub main_device_id: Option<String>,
    /// Main-network node the feeder was attached to.
    #[serde(default)]
    pub main_node: Option<String>,
    /// Distribution-side junction device.
    #[serde(default)]
    pub sub_device_id: Option<String>,
}

/// Device ledger entry created when a source device has no internal counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub kind: DeviceKind,
    pub source_id: String,
    pub name: String,
    pub owner: String,
    pub feeder_id: String,
    pub stamp: String,
}

/// Conditional endpoint write: applied only while the endpoint still holds `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUpdate {
    pub device_id: String,
    pub terminal: Terminal,
    pub expected: Option<String>,
    pub node: Option<String>,
}

impl EndpointUpdate {
    pub fn new(device_id: impl Into<String>, terminal: Terminal) -> Self {
        Self {
            device_id: device_id.into(),
            terminal,
            expected: None,
            node: None,
        }
    }

    pub fn expecting(mut self, expected: Option<&str>) -> Self {
        self.expected = normalize_node(expected);
        self
    }

    pub fn to_node(mut self, node: Option<&str>) -> Self {
        self.node = normalize_node(node);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_nodes_normalize_to_none() {
        let topo = Topo::new("D1", "o", "f").with_nodes(Some(""), Some("  "));
        assert_eq!(topo.populated_count(), 0);
        assert_eq!(topo.empty_terminal(), Some(Terminal::First));
    }

    #[test]
    fn endpoint_key_ignores_order() {
        let a = Topo::new("D1", "o", "f").with_nodes(Some("A"), Some("B"));
        let b = Topo::new("D2", "o", "f").with_nodes(Some("B"), Some("A"));
        assert_eq!(a.endpoint_key(), b.endpoint_key());
    }

    #[test]
    fn terminal_lookup_prefers_first() {
        let topo = Topo::new("D1", "o", "f").with_nodes(Some("A"), Some("A"));
        assert_eq!(topo.terminal_of("A"), Some(Terminal::First));
        assert_eq!(topo.terminal_of("B"), None);
    }

    #[test]
    fn device_kind_round_trips_cim_tag() {
        for kind in DeviceKind::ALL {
            assert_eq!(DeviceKind::from_cim_tag(kind.cim_tag()), Some(kind));
        }
        assert_eq!(DeviceKind::from_cim_tag("Terminal"), None);
    }

    #[test]
    fn topo_deserializes_without_optional_fields() {
        let topo: Topo =
            serde_json::from_str(r#"{"id":"D1","owner":"o","feeder_id":"f"}"#).unwrap();
        assert_eq!(topo.first_node, None);
        assert_eq!(topo.stamp, None);
    }
}
