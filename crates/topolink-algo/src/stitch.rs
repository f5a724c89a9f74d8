//! Attach a distribution feeder's entry device to its main-network junction.

use serde::{Deserialize, Serialize};
use topolink_core::{EndpointUpdate, FeederJoin, Terminal, Topo, TopoResult};
use topolink_io::TopologyStore;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyJoined,
    /// Neither the join descriptor nor exploration names a main-side device.
    NoJunction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StitchOutcome {
    Skipped { reason: SkipReason },
    Stitched {
        sub_device: String,
        terminal: Option<Terminal>,
        main_node: String,
    },
    Unresolved { reason: String },
}

/// Junction devices found outside the join descriptor, as internal ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JunctionHint {
    pub main_device_id: Option<String>,
    pub sub_device_id: Option<String>,
}

pub struct Stitcher<'a> {
    store: &'a dyn TopologyStore,
}

impl<'a> Stitcher<'a> {
    pub fn new(store: &'a dyn TopologyStore) -> Self {
        Self { store }
    }

    /// Rewrite one sub-side endpoint to the main junction node.
    ///
    /// Only an empty endpoint or one referenced by a single record store-wide is
    /// rewritten, so no existing connection is ever overwritten. The join
    /// descriptor takes precedence over `hint` for both junction devices.
    ///
    /// A joined feeder whose sub device no longer holds the main node (after a
    /// re-import replaced its endpoints) is attached again from the recorded join.
    pub fn stitch_feeder(&self, feeder_id: &str, hint: &JunctionHint) -> TopoResult<StitchOutcome> {
        let join = self.store.feeder_join(feeder_id)?.unwrap_or_else(|| FeederJoin {
            feeder_id: feeder_id.to_string(),
            ..FeederJoin::default()
        });
        if join.is_joined {
            return self.rejoin(join);
        }

        let Some(main_device) = join
            .main_device_id
            .clone()
            .or_else(|| hint.main_device_id.clone())
        else {
            return Ok(StitchOutcome::Skipped {
                reason: SkipReason::NoJunction,
            });
        };
        let Some(main) = self.store.main_topology(&main_device)? else {
            return Ok(unresolved(
                feeder_id,
                format!("main junction device {main_device} not in main network"),
            ));
        };
        let Some(main_node) = junction_node(&main) else {
            return Ok(unresolved(
                feeder_id,
                format!("main junction device {main_device} has no terminal node"),
            ));
        };

        let Some(sub_device) = join
            .sub_device_id
            .clone()
            .or_else(|| hint.sub_device_id.clone())
        else {
            return Ok(unresolved(feeder_id, "no sub-side junction device".to_string()));
        };
        let Some(sub) = self.store.topology(&sub_device)? else {
            return Ok(unresolved(
                feeder_id,
                format!("sub junction device {sub_device} has no topology record"),
            ));
        };

        let joined = FeederJoin {
            feeder_id: feeder_id.to_string(),
            is_joined: true,
            main_device_id: Some(main_device),
            main_node: Some(main_node.clone()),
            sub_device_id: Some(sub_device.clone()),
        };

        if sub.terminal_of(&main_node).is_some() {
            self.store.save_feeder_join(joined)?;
            return Ok(StitchOutcome::Stitched {
                sub_device,
                terminal: None,
                main_node,
            });
        }
        self.attach(&sub, main_node, joined)
    }

    fn rejoin(&self, join: FeederJoin) -> TopoResult<StitchOutcome> {
        let already = StitchOutcome::Skipped {
            reason: SkipReason::AlreadyJoined,
        };
        let Some(sub_device) = join.sub_device_id.clone() else {
            return Ok(already);
        };
        let main_node = match (&join.main_node, &join.main_device_id) {
            (Some(node), _) => Some(node.clone()),
            (None, Some(device)) => self
                .store
                .main_topology(device)?
                .and_then(|main| junction_node(&main)),
            (None, None) => None,
        };
        let Some(main_node) = main_node else {
            return Ok(already);
        };
        let Some(sub) = self.store.topology(&sub_device)? else {
            return Ok(unresolved(
                &join.feeder_id,
                format!("sub junction device {sub_device} has no topology record"),
            ));
        };
        if sub.terminal_of(&main_node).is_some() {
            return Ok(already);
        }

        info!(feeder = %join.feeder_id, device = %sub_device, node = %main_node, "joined feeder lost its main node, attaching again");
        let joined = FeederJoin {
            main_node: Some(main_node.clone()),
            ..join
        };
        self.attach(&sub, main_node, joined)
    }

    /// Rewrite the first endpoint of `sub` that is empty or unshared.
    fn attach(&self, sub: &Topo, main_node: String, joined: FeederJoin) -> TopoResult<StitchOutcome> {
        let feeder_id = joined.feeder_id.clone();
        for terminal in Terminal::BOTH {
            let current = sub.node(terminal);
            let eligible = match current {
                None => true,
                Some(node) => self.store.node_reference_count(node)? == 1,
            };
            if !eligible {
                continue;
            }

            let update = EndpointUpdate::new(&sub.id, terminal)
                .expecting(current)
                .to_node(Some(&main_node));
            if !self.store.update_endpoint(&update)? {
                return Ok(unresolved(
                    &feeder_id,
                    format!("{terminal} endpoint of {} changed during stitch", sub.id),
                ));
            }
            self.store.save_feeder_join(joined)?;
            info!(feeder = %feeder_id, device = %sub.id, node = %main_node, %terminal, "feeder stitched to main network");
            return Ok(StitchOutcome::Stitched {
                sub_device: sub.id.clone(),
                terminal: Some(terminal),
                main_node,
            });
        }

        Ok(unresolved(
            &feeder_id,
            format!("every endpoint of {} is shared", sub.id),
        ))
    }
}

/// Second terminal node of the main junction device, else its first.
fn junction_node(main: &Topo) -> Option<String> {
    main.node(Terminal::Second)
        .or_else(|| main.node(Terminal::First))
        .map(str::to_string)
}

fn unresolved(feeder_id: &str, reason: String) -> StitchOutcome {
    warn!(feeder = feeder_id, %reason, "stitch unresolved");
    StitchOutcome::Unresolved { reason }
}
