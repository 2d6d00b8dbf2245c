//! Constant-tie analysis: derivation of the tie tables from a live device
//! model, their wire-format form, and the verification gate that
//! cross-checks a decoded table against a live device.

use std::collections::{BTreeMap, HashMap};

use bincode::{Decode, Encode};
use fabric_device::{ConstantTies, Device, PinDefault, TieValue, TileTypeId, TtWireId};
use itertools::Itertools;
use unnamed_entity::EntityId;

use crate::error::{InterchangeError, Result};
use crate::table::StringTable;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub enum TieMsg {
    Gnd,
    Vcc,
}

impl From<TieValue> for TieMsg {
    fn from(v: TieValue) -> Self {
        match v {
            TieValue::Gnd => TieMsg::Gnd,
            TieValue::Vcc => TieMsg::Vcc,
        }
    }
}

impl From<TieMsg> for TieValue {
    fn from(v: TieMsg) -> Self {
        match v {
            TieMsg::Gnd => TieValue::Gnd,
            TieMsg::Vcc => TieValue::Vcc,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub enum PinDefaultMsg {
    Gnd,
    Vcc,
    Float,
}

impl From<PinDefault> for PinDefaultMsg {
    fn from(v: PinDefault) -> Self {
        match v {
            PinDefault::Gnd => PinDefaultMsg::Gnd,
            PinDefault::Vcc => PinDefaultMsg::Vcc,
            PinDefault::Float => PinDefaultMsg::Float,
        }
    }
}

impl From<PinDefaultMsg> for PinDefault {
    fn from(v: PinDefaultMsg) -> Self {
        match v {
            PinDefaultMsg::Gnd => PinDefault::Gnd,
            PinDefaultMsg::Vcc => PinDefault::Vcc,
            PinDefaultMsg::Float => PinDefault::Float,
        }
    }
}

/// A bel pin hard-wired to a constant, within a site type (referenced by
/// its position in the device message's site-type table).
#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct SiteSourceMsg {
    pub site_type: u32,
    pub bel: u32,
    pub pin: u32,
    pub tie: TieMsg,
}

/// A per-tile-instance tie exception, by tile and wire name.
#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct NodeSourceMsg {
    pub tile: u32,
    pub wire: u32,
    pub tie: TieMsg,
}

/// Tile-type-level tied wires; lives inside each tile-type record.
#[derive(Clone, Debug, Encode, Decode)]
pub struct WireConstantsMsg {
    pub tie: TieMsg,
    pub wires: Vec<u32>,
}

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct PinDefaultEntryMsg {
    pub pin: u32,
    pub value: PinDefaultMsg,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct CellPinDefaultsMsg {
    pub cell_type: u32,
    pub pins: Vec<PinDefaultEntryMsg>,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct ConstantsMsg {
    pub site_sources: Vec<SiteSourceMsg>,
    pub node_sources: Vec<NodeSourceMsg>,
    pub default_cell_conns: Vec<CellPinDefaultsMsg>,
    pub best_constant: TieMsg,
    pub gnd_cell: (u32, u32),
    pub vcc_cell: (u32, u32),
    pub gnd_net: u32,
    pub vcc_net: u32,
}

const TIED_GND: usize = 0;
const TIED_VCC: usize = 1;
const UNTIED: usize = 2;

/// Derives the tie tables from a live device model.
///
/// Every node carries its ground-truth tie; a (tile type, wire) pair whose
/// instances are consistently tied becomes a type-level rule, anything
/// inconsistent is demoted to a per-tile exception. Tied bels must have a
/// single pin. Static configuration (pin defaults, net names) is carried
/// over from the device's own table.
pub fn derive_ties(dev: &Device) -> Result<ConstantTies> {
    let mut ties = ConstantTies {
        cell_pin_defaults: dev.constants.cell_pin_defaults.clone(),
        best_constant: dev.constants.best_constant,
        gnd_cell: dev.constants.gnd_cell.clone(),
        vcc_cell: dev.constants.vcc_cell.clone(),
        gnd_net: dev.constants.gnd_net.clone(),
        vcc_net: dev.constants.vcc_net.clone(),
        ..ConstantTies::default()
    };

    for (st, st_name, stype) in dev.site_types.iter() {
        for (bel, bel_name, b) in stype.bels.iter() {
            let Some(tie) = b.tie else { continue };
            if b.pins.len() != 1 {
                return Err(InterchangeError::DeviceMismatch(format!(
                    "constant-source bel {st_name}/{bel_name} has {n} pins, expected 1",
                    n = b.pins.len()
                )));
            }
            let pin = b.pins.ids().next().unwrap();
            match tie {
                TieValue::Vcc => ties.vcc_bels.insert((st, bel), pin),
                TieValue::Gnd => ties.gnd_bels.insert((st, bel), pin),
            };
        }
    }

    // count tied/untied instances per (tile type, canonical wire)
    let mut counters: BTreeMap<(TileTypeId, TtWireId), [u32; 3]> = BTreeMap::new();
    for node in dev.nodes.values() {
        let Some(tie) = node.tie else { continue };
        let (tile, wire) = node.wires[0];
        let c = counters
            .entry((dev.tiles[tile].kind, wire))
            .or_insert([0; 3]);
        match tie {
            TieValue::Gnd => c[TIED_GND] += 1,
            TieValue::Vcc => c[TIED_VCC] += 1,
        }
    }
    let wires_by_type: HashMap<TileTypeId, Vec<TtWireId>> =
        counters.keys().map(|&(tt, wire)| (tt, wire)).into_group_map();
    for (tid, _, tile) in dev.tiles.iter() {
        let Some(wires) = wires_by_type.get(&tile.kind) else {
            continue;
        };
        for &wire in wires {
            let Some(node) = dev.node_at(tid, wire) else {
                continue;
            };
            if dev.nodes[node].tie.is_none() {
                counters.get_mut(&(tile.kind, wire)).unwrap()[UNTIED] += 1;
            }
        }
    }

    for node in dev.nodes.values() {
        let Some(tie) = node.tie else { continue };
        let key @ (tile, wire) = node.wires[0];
        let kind = dev.tiles[tile].kind;
        let c = counters[&(kind, wire)];
        let tied_gnd = tie == TieValue::Gnd;
        let exceptional = c[UNTIED] > 0
            || (c[TIED_GND] > 0
                && c[TIED_VCC] > 0
                && tied_gnd == (c[TIED_GND] < c[TIED_VCC]));
        if exceptional {
            match tie {
                TieValue::Gnd => ties.gnd_node_exceptions.insert(key),
                TieValue::Vcc => ties.vcc_node_exceptions.insert(key),
            };
        } else {
            match tie {
                TieValue::Gnd => ties.gnd_wires.insert((kind, wire)),
                TieValue::Vcc => ties.vcc_wires.insert((kind, wire)),
            };
        }
    }

    if let Some(desc) = ties.find_ambiguous(dev) {
        return Err(InterchangeError::AmbiguousTie(desc));
    }
    Ok(ties)
}

/// Cross-checks a tie table against a live device model: every node's and
/// every constant-source bel's tie status must match. Used as the
/// correctness gate after regenerating a device image.
pub fn verify_ties(dev: &Device, ties: &ConstantTies) -> Result<()> {
    if let Some(desc) = ties.find_ambiguous(dev) {
        return Err(InterchangeError::AmbiguousTie(desc));
    }

    for (node, data) in dev.nodes.iter() {
        let (tile, wire) = data.wires[0];
        let name = || {
            format!(
                "{tile}/{wire}",
                tile = dev.tiles.key(tile),
                wire = dev.tile_types[dev.tiles[tile].kind].wires[wire]
            )
        };
        if data.tie.is_some() != ties.is_node_tied(dev, node) {
            return Err(InterchangeError::TieMismatch(format!(
                "node {name} tied={gold} but table says {table}",
                name = name(),
                gold = data.tie.is_some(),
                table = ties.is_node_tied(dev, node),
            )));
        }
        if let Some(tie) = data.tie {
            let gnd = ties.is_node_tied_gnd(dev, node);
            let vcc = ties.is_node_tied_vcc(dev, node);
            if gnd != (tie == TieValue::Gnd) || vcc != (tie == TieValue::Vcc) {
                return Err(InterchangeError::TieMismatch(format!(
                    "node {name} is tied to {tie} but table disagrees",
                    name = name(),
                    tie = tie.name(),
                )));
            }
        }
    }

    for (st, st_name, stype) in dev.site_types.iter() {
        for (bel, bel_name, b) in stype.bels.iter() {
            let expected = b.tie;
            let table = ties
                .bel_tie(st, bel)
                .map(|(tie, _)| tie);
            if expected != table {
                return Err(InterchangeError::TieMismatch(format!(
                    "bel {st_name}/{bel_name} tie is {expected:?} but table says {table:?}"
                )));
            }
        }
    }

    if ties.cell_pin_defaults != dev.constants.cell_pin_defaults {
        return Err(InterchangeError::TieMismatch(
            "cell pin defaults differ from device model".to_string(),
        ));
    }
    if ties.gnd_net != dev.constants.gnd_net || ties.vcc_net != dev.constants.vcc_net {
        return Err(InterchangeError::TieMismatch(format!(
            "constant net names {gnd}/{vcc} differ from device model",
            gnd = ties.gnd_net,
            vcc = ties.vcc_net,
        )));
    }
    Ok(())
}

/// Serializes the table parts that are not per tile type. Site types are
/// referenced by their position in the device message's site-type table.
pub fn ties_to_msg(dev: &Device, ties: &ConstantTies, strings: &mut StringTable) -> ConstantsMsg {
    let mut site_sources = Vec::new();
    for (bels, tie) in [(&ties.gnd_bels, TieMsg::Gnd), (&ties.vcc_bels, TieMsg::Vcc)] {
        for (&(st, bel), &pin) in bels.iter() {
            let stype = &dev.site_types[st];
            site_sources.push(SiteSourceMsg {
                site_type: st.to_idx() as u32,
                bel: strings.index_of(stype.bels.key(bel)).to_idx() as u32,
                pin: strings.index_of(stype.bels[bel].pins.key(pin)).to_idx() as u32,
                tie,
            });
        }
    }

    let mut node_sources = Vec::new();
    for (nodes, tie) in [
        (&ties.gnd_node_exceptions, TieMsg::Gnd),
        (&ties.vcc_node_exceptions, TieMsg::Vcc),
    ] {
        for &(tile, wire) in nodes.iter() {
            let wire_name = &dev.tile_types[dev.tiles[tile].kind].wires[wire];
            node_sources.push(NodeSourceMsg {
                tile: strings.index_of(dev.tiles.key(tile)).to_idx() as u32,
                wire: strings.index_of(wire_name).to_idx() as u32,
                tie,
            });
        }
    }

    let default_cell_conns = ties
        .cell_pin_defaults
        .iter()
        .map(|(cell_type, pins)| CellPinDefaultsMsg {
            cell_type: strings.index_of(cell_type).to_idx() as u32,
            pins: pins
                .iter()
                .map(|(pin, &value)| PinDefaultEntryMsg {
                    pin: strings.index_of(pin).to_idx() as u32,
                    value: value.into(),
                })
                .collect(),
        })
        .collect();

    ConstantsMsg {
        site_sources,
        node_sources,
        default_cell_conns,
        best_constant: ties.best_constant.into(),
        gnd_cell: (
            strings.index_of(&ties.gnd_cell.0).to_idx() as u32,
            strings.index_of(&ties.gnd_cell.1).to_idx() as u32,
        ),
        vcc_cell: (
            strings.index_of(&ties.vcc_cell.0).to_idx() as u32,
            strings.index_of(&ties.vcc_cell.1).to_idx() as u32,
        ),
        gnd_net: strings.index_of(&ties.gnd_net).to_idx() as u32,
        vcc_net: strings.index_of(&ties.vcc_net).to_idx() as u32,
    }
}

/// The per-tile-type tied-wire lists for one tile type.
pub fn tile_wire_constants(ties: &ConstantTies, tt: TileTypeId) -> Vec<WireConstantsMsg> {
    let mut out = Vec::new();
    for (wires, tie) in [(&ties.gnd_wires, TieMsg::Gnd), (&ties.vcc_wires, TieMsg::Vcc)] {
        let list: Vec<u32> = wires
            .iter()
            .filter(|&&(t, _)| t == tt)
            .map(|&(_, w)| w.to_idx() as u32)
            .collect();
        if !list.is_empty() {
            out.push(WireConstantsMsg { tie, wires: list });
        }
    }
    out
}

/// Rebuilds the non-per-tile-type parts of a tie table against a device
/// whose structural tables are already decoded. The per-tile-type wire
/// lists are folded in separately by the device codec.
pub fn ties_from_msg(
    dev: &Device,
    msg: &ConstantsMsg,
    strings: &StringTable,
) -> Result<ConstantTies> {
    let mut ties = ConstantTies::default();

    for src in &msg.site_sources {
        let st_idx = src.site_type as usize;
        if st_idx >= dev.site_types.len() {
            return Err(InterchangeError::DanglingIndex {
                kind: "site type",
                index: src.site_type,
                len: dev.site_types.len(),
            });
        }
        let st = fabric_device::SiteTypeId::from_idx(st_idx);
        let stype = &dev.site_types[st];
        let bel_name = strings.get(src.bel)?;
        let (bel, b) = stype
            .get_bel(bel_name)
            .ok_or_else(|| InterchangeError::UnknownBel {
                site: dev.site_types.key(st).clone(),
                bel: bel_name.to_string(),
            })?;
        let pin_name = strings.get(src.pin)?;
        let (pin, _) = b
            .pins
            .get(pin_name)
            .ok_or_else(|| InterchangeError::UnknownBelPin {
                site: dev.site_types.key(st).clone(),
                bel: bel_name.to_string(),
                pin: pin_name.to_string(),
            })?;
        match src.tie {
            TieMsg::Gnd => ties.gnd_bels.insert((st, bel), pin),
            TieMsg::Vcc => ties.vcc_bels.insert((st, bel), pin),
        };
    }

    for src in &msg.node_sources {
        let tile_name = strings.get(src.tile)?;
        let (tile, t) = dev
            .tiles
            .get(tile_name)
            .ok_or_else(|| InterchangeError::UnknownTile(tile_name.to_string()))?;
        let wire_name = strings.get(src.wire)?;
        let wire = dev.tile_types[t.kind].get_wire(wire_name).ok_or_else(|| {
            InterchangeError::UnknownWire {
                tile: tile_name.to_string(),
                wire: wire_name.to_string(),
            }
        })?;
        match src.tie {
            TieMsg::Gnd => ties.gnd_node_exceptions.insert((tile, wire)),
            TieMsg::Vcc => ties.vcc_node_exceptions.insert((tile, wire)),
        };
    }

    for conns in &msg.default_cell_conns {
        let cell_type = strings.get(conns.cell_type)?.to_string();
        let mut pins = BTreeMap::new();
        for p in &conns.pins {
            pins.insert(strings.get(p.pin)?.to_string(), p.value.into());
        }
        ties.cell_pin_defaults.insert(cell_type, pins);
    }

    ties.best_constant = msg.best_constant.into();
    ties.gnd_cell = (
        strings.get(msg.gnd_cell.0)?.to_string(),
        strings.get(msg.gnd_cell.1)?.to_string(),
    );
    ties.vcc_cell = (
        strings.get(msg.vcc_cell.0)?.to_string(),
        strings.get(msg.vcc_cell.1)?.to_string(),
    );
    ties.gnd_net = strings.get(msg.gnd_net)?.to_string();
    ties.vcc_net = strings.get(msg.vcc_net)?.to_string();

    Ok(ties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use fabric_device::{BelClass, PinDir};

    /// Two tile types; wire "T" tied consistently in TA, inconsistently in
    /// TB; one constant-source bel.
    fn tied_device() -> Device {
        let mut dev = Device::new("testdev");
        let ta = dev.tile_type("TA");
        let wa = dev.tile_types[ta].wire("T");
        let tb = dev.tile_type("TB");
        let wb = dev.tile_types[tb].wire("T");
        dev.tile_types[tb].wire("U");

        let st = dev.site_type("SLICE");
        {
            let s = &mut dev.site_types[st];
            let hard = s.add_bel("HARDGND", BelClass::Logic, Some(TieValue::Gnd));
            s.add_bel_pin(hard, "0", PinDir::Output, Some("W_GND"));
        }

        let a0 = dev.add_tile("TA_X0Y0", ta, 0, 0);
        let a1 = dev.add_tile("TA_X0Y1", ta, 1, 0);
        let b0 = dev.add_tile("TB_X1Y0", tb, 0, 1);
        let b1 = dev.add_tile("TB_X1Y1", tb, 1, 1);
        dev.add_site("SLICE_X0Y0", a0, st);

        dev.add_node(&[(a0, wa)], Some(TieValue::Vcc));
        dev.add_node(&[(a1, wa)], Some(TieValue::Vcc));
        dev.add_node(&[(b0, wb)], Some(TieValue::Gnd));
        dev.add_node(&[(b1, wb)], None);
        dev
    }

    #[test]
    fn derivation_splits_rules_and_exceptions() {
        let mut dev = tied_device();
        let ties = derive_ties(&dev).unwrap();
        let (ta, _) = dev.tile_types.get("TA").unwrap();
        let (tb, _) = dev.tile_types.get("TB").unwrap();
        let wa = dev.tile_types[ta].get_wire("T").unwrap();
        let wb = dev.tile_types[tb].get_wire("T").unwrap();
        let (b0, _) = dev.tiles.get("TB_X1Y0").unwrap();

        assert!(ties.vcc_wires.contains(&(ta, wa)));
        assert!(!ties.gnd_wires.contains(&(tb, wb)));
        assert!(ties.gnd_node_exceptions.contains(&(b0, wb)));
        let (st, _) = dev.site_types.get("SLICE").unwrap();
        let (bel, _) = dev.site_types[st].get_bel("HARDGND").unwrap();
        assert!(ties.is_bel_tied_gnd(st, bel));

        // the derived table must pass its own gate
        dev.constants = ties.clone();
        verify_ties(&dev, &ties).unwrap();
    }

    #[test]
    fn verification_catches_mismatch() {
        let dev = tied_device();
        let mut ties = derive_ties(&dev).unwrap();
        let (ta, _) = dev.tile_types.get("TA").unwrap();
        let wa = dev.tile_types[ta].get_wire("T").unwrap();
        ties.vcc_wires.remove(&(ta, wa));
        assert_matches!(
            verify_ties(&dev, &ties),
            Err(InterchangeError::TieMismatch(_))
        );
    }

    #[test]
    fn verification_rejects_ambiguity() {
        let dev = tied_device();
        let mut ties = derive_ties(&dev).unwrap();
        let (ta, _) = dev.tile_types.get("TA").unwrap();
        let wa = dev.tile_types[ta].get_wire("T").unwrap();
        ties.gnd_wires.insert((ta, wa));
        assert_matches!(
            verify_ties(&dev, &ties),
            Err(InterchangeError::AmbiguousTie(_))
        );
    }

    #[test]
    fn message_roundtrip() {
        let dev = tied_device();
        let ties = derive_ties(&dev).unwrap();
        let mut strings = StringTable::new();
        let msg = ties_to_msg(&dev, &ties, &mut strings);
        let strings = StringTable::from_vec(strings.into_vec());
        let mut back = ties_from_msg(&dev, &msg, &strings).unwrap();
        // wire lists travel with the tile types; fold them back by hand
        back.gnd_wires = ties.gnd_wires.clone();
        back.vcc_wires = ties.vcc_wires.clone();
        assert_eq!(back.gnd_bels, ties.gnd_bels);
        assert_eq!(back.vcc_bels, ties.vcc_bels);
        assert_eq!(back.gnd_node_exceptions, ties.gnd_node_exceptions);
        assert_eq!(back.vcc_node_exceptions, ties.vcc_node_exceptions);
        assert_eq!(back.cell_pin_defaults, ties.cell_pin_defaults);
        assert_eq!(back.gnd_net, ties.gnd_net);
        verify_ties(&dev, &back).unwrap();
    }
}
