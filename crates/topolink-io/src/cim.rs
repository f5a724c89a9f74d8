use std::{collections::HashMap, fs, path::Path};

use quick_xml::{
    events::{BytesStart, Event},
    name::LocalName,
    Reader,
};
use topolink_core::{DeviceKind, TopoError, TopoResult};
use tracing::debug;

/// Feeder (circuit) as exported by the source system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CimCircuit {
    pub id: String,
    pub name: String,
    /// HV substation the feeder leaves from.
    pub hv_substation: Option<String>,
    pub region: Option<String>,
    /// `iscurrentfeeder == 1`: the feeder this export was produced for.
    pub is_current_feeder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CimDevice {
    pub id: String,
    pub kind: DeviceKind,
    pub name: String,
    pub circuit: Option<String>,
    pub container: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CimTerminal {
    pub id: String,
    pub equipment: String,
    pub node: String,
}

/// Device of a current feeder together with its terminal nodes, in terminal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDevice {
    pub id: String,
    pub kind: DeviceKind,
    pub name: String,
    pub feeder_id: String,
    pub nodes: Vec<String>,
}

/// In-memory view of one RDF/XML export.
#[derive(Debug, Clone, Default)]
pub struct CimModel {
    pub circuits: Vec<CimCircuit>,
    pub devices: Vec<CimDevice>,
    pub terminals: Vec<CimTerminal>,
    pub connectivity_nodes: Vec<String>,
}

impl CimModel {
    pub fn circuit(&self, id: &str) -> Option<&CimCircuit> {
        self.circuits.iter().find(|c| c.id == id)
    }

    pub fn current_feeders(&self) -> impl Iterator<Item = &CimCircuit> {
        self.circuits.iter().filter(|c| c.is_current_feeder)
    }

    pub fn device(&self, id: &str) -> Option<&CimDevice> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Device id -> node ids, following terminal order in the document.
    pub fn device_terminals(&self) -> HashMap<&str, Vec<&str>> {
        let mut map: HashMap<&str, Vec<&str>> = HashMap::new();
        for terminal in &self.terminals {
            map.entry(terminal.equipment.as_str())
                .or_default()
                .push(terminal.node.as_str());
        }
        map
    }

    /// Devices of `feeder_id` that have at least one terminal.
    pub fn feeder_devices(&self, feeder_id: &str) -> Vec<SourceDevice> {
        let terminals = self.device_terminals();
        let mut result = Vec::new();
        for device in &self.devices {
            if device.circuit.as_deref() != Some(feeder_id) {
                continue;
            }
            let Some(nodes) = terminals.get(device.id.as_str()) else {
                debug!(device = %device.id, "device has no terminals, skipped");
                continue;
            };
            result.push(SourceDevice {
                id: device.id.clone(),
                kind: device.kind,
                name: device.name.clone(),
                feeder_id: feeder_id.to_string(),
                nodes: nodes.iter().map(|n| n.to_string()).collect(),
            });
        }
        result
    }

    /// Devices of every current feeder.
    pub fn current_feeder_devices(&self) -> Vec<SourceDevice> {
        self.current_feeders()
            .flat_map(|circuit| self.feeder_devices(&circuit.id))
            .collect()
    }

    /// Equipment contained in the HV substation `feeder_id` leaves from.
    pub fn entry_equipment(&self, feeder_id: &str) -> Vec<&CimDevice> {
        let Some(substation) = self
            .circuit(feeder_id)
            .and_then(|c| c.hv_substation.as_deref())
        else {
            return Vec::new();
        };
        self.devices
            .iter()
            .filter(|d| d.container.as_deref() == Some(substation))
            .collect()
    }
}

pub fn parse_cim_file(path: &Path) -> TopoResult<CimModel> {
    let text = fs::read_to_string(path)?;
    parse_cim_str(&text)
        .map_err(|err| TopoError::Parse(format!("'{}': {err}", path.display())))
}

enum Pending {
    Circuit(CimCircuit),
    Device(CimDevice),
    Terminal {
        id: String,
        equipment: Option<String>,
        node: Option<String>,
    },
    Node(String),
}

pub fn parse_cim_str(document: &str) -> TopoResult<CimModel> {
    let mut model = CimModel::default();
    let mut reader = Reader::from_str(document);
    reader.trim_text(true);

    let mut current: Option<(String, Pending)> = None;
    let mut active_tag: Option<String> = None;

    loop {
        let event = reader.read_event().map_err(|err| {
            TopoError::Parse(format!(
                "malformed XML at byte {}: {err}",
                reader.buffer_position()
            ))
        })?;
        match event {
            Event::Start(ref e) => {
                let name = e.local_name();
                let tag = local_name_as_str(&name);
                if current.is_none() {
                    current = start_object(tag, e)?.map(|p| (tag.to_string(), p));
                } else if let Some((_, pending)) = current.as_mut() {
                    apply_resource(pending, tag, e)?;
                }
                active_tag = Some(tag.to_string());
            }
            Event::Empty(ref e) => {
                let name = e.local_name();
                let tag = local_name_as_str(&name);
                match current.as_mut() {
                    Some((_, pending)) => apply_resource(pending, tag, e)?,
                    None => {
                        if let Some(pending) = start_object(tag, e)? {
                            finish_object(&mut model, pending);
                        }
                    }
                }
            }
            Event::Text(e) => {
                if let (Some(tag), Some((_, pending))) = (active_tag.as_deref(), current.as_mut()) {
                    let text = e
                        .unescape()
                        .map_err(|err| TopoError::Parse(err.to_string()))?
                        .trim()
                        .to_string();
                    apply_text(pending, tag, text);
                }
            }
            Event::End(ref e) => {
                let name = e.local_name();
                let tag = local_name_as_str(&name);
                if current.as_ref().map(|(open, _)| open == tag).unwrap_or(false) {
                    if let Some((_, pending)) = current.take() {
                        finish_object(&mut model, pending);
                    }
                }
                active_tag = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if model.circuits.is_empty() && model.devices.is_empty() {
        return Err(TopoError::Parse(
            "no circuit or device definitions discovered in CIM document".into(),
        ));
    }
    Ok(model)
}

fn start_object(tag: &str, e: &BytesStart) -> TopoResult<Option<Pending>> {
    let id = match object_id(e)? {
        Some(id) => id,
        None => return Ok(None),
    };
    let pending = match tag {
        "Circuit" => Pending::Circuit(CimCircuit {
            id,
            ..CimCircuit::default()
        }),
        "Terminal" => Pending::Terminal {
            id,
            equipment: None,
            node: None,
        },
        "ConnectivityNode" => Pending::Node(id),
        other => match DeviceKind::from_cim_tag(other) {
            Some(kind) => Pending::Device(CimDevice {
                id,
                kind,
                name: String::new(),
                circuit: None,
                container: None,
            }),
            None => return Ok(None),
        },
    };
    Ok(Some(pending))
}

fn apply_resource(pending: &mut Pending, tag: &str, e: &BytesStart) -> TopoResult<()> {
    let Some(resource) = attribute_value(e, "resource")? else {
        return Ok(());
    };
    let resource = resource.trim_start_matches('#').to_string();
    match pending {
        Pending::Circuit(circuit) => match tag {
            "Circuit.BelongtoHVSubstation" => circuit.hv_substation = Some(resource),
            "PowerSystemResource.SubGeographicalRegion" => circuit.region = Some(resource),
            _ => {}
        },
        Pending::Device(device) => match tag {
            "PowerSystemResource.Circuit" => device.circuit = Some(resource),
            "Equipment.EquipmentContainer" => device.container = Some(resource),
            _ => {}
        },
        Pending::Terminal {
            equipment, node, ..
        } => match tag {
            "Terminal.ConductingEquipment" => *equipment = Some(resource),
            "Terminal.ConnectivityNode" => *node = Some(resource),
            _ => {}
        },
        Pending::Node(_) => {}
    }
    Ok(())
}

fn apply_text(pending: &mut Pending, tag: &str, text: String) {
    match pending {
        Pending::Circuit(circuit) => {
            if tag == "IdentifiedObject.name" {
                circuit.name = text;
            } else if tag.to_ascii_lowercase().ends_with("iscurrentfeeder") {
                circuit.is_current_feeder = text == "1" || text.eq_ignore_ascii_case("true");
            }
        }
        Pending::Device(device) => {
            if tag == "IdentifiedObject.name" {
                device.name = text;
            }
        }
        Pending::Terminal { .. } | Pending::Node(_) => {}
    }
}

fn finish_object(model: &mut CimModel, pending: Pending) {
    match pending {
        Pending::Circuit(circuit) => model.circuits.push(circuit),
        Pending::Device(device) => model.devices.push(device),
        Pending::Node(id) => model.connectivity_nodes.push(id),
        Pending::Terminal {
            id,
            equipment: Some(equipment),
            node: Some(node),
        } => model.terminals.push(CimTerminal {
            id,
            equipment,
            node,
        }),
        Pending::Terminal { id, .. } => {
            debug!(terminal = %id, "terminal without equipment or node, skipped");
        }
    }
}

fn object_id(e: &BytesStart) -> TopoResult<Option<String>> {
    if let Some(id) = attribute_value(e, "ID")? {
        return Ok(Some(id));
    }
    Ok(attribute_value(e, "about")?.map(|about| about.trim_start_matches('#').to_string()))
}

fn attribute_value(event: &BytesStart, key: &str) -> TopoResult<Option<String>> {
    for attr in event.attributes().with_checks(false) {
        let attr = attr.map_err(|err| TopoError::Parse(err.to_string()))?;
        if let Ok(name) = std::str::from_utf8(attr.key.local_name().as_ref()) {
            if name.eq_ignore_ascii_case(key) {
                let value = attr
                    .unescape_value()
                    .map_err(|err| TopoError::Parse(err.to_string()))?;
                return Ok(Some(value.into_owned()));
            }
        }
    }
    Ok(None)
}

fn local_name_as_str<'a>(name: &'a LocalName<'a>) -> &'a str {
    std::str::from_utf8(name.as_ref()).unwrap_or_default()
}
