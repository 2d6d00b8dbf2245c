//! Constant-tie tables: which bel pins and node wires are hard-wired to
//! VCC or GND, plus per-tile exceptions overriding the tile-type default.

use std::collections::{BTreeMap, BTreeSet};

use crate::{BelPinId, BelSlotId, Device, NodeId, SiteTypeId, TileId, TileTypeId, TtWireId};

/// Canonical name of the ground net.
pub const GND_NET: &str = "GLOBAL_LOGIC0";
/// Canonical name of the power net.
pub const VCC_NET: &str = "GLOBAL_LOGIC1";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TieValue {
    Gnd,
    Vcc,
}

impl TieValue {
    pub fn name(self) -> &'static str {
        match self {
            TieValue::Gnd => "GND",
            TieValue::Vcc => "VCC",
        }
    }
}

/// Default value driven onto an unconnected cell pin.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PinDefault {
    Gnd,
    Vcc,
    Float,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConstantTies {
    pub vcc_bels: BTreeMap<(SiteTypeId, BelSlotId), BelPinId>,
    pub gnd_bels: BTreeMap<(SiteTypeId, BelSlotId), BelPinId>,
    pub vcc_wires: BTreeSet<(TileTypeId, TtWireId)>,
    pub gnd_wires: BTreeSet<(TileTypeId, TtWireId)>,
    /// Nodes (by canonical tile + wire) whose tie differs from the
    /// tile-type default.
    pub vcc_node_exceptions: BTreeSet<(TileId, TtWireId)>,
    pub gnd_node_exceptions: BTreeSet<(TileId, TtWireId)>,
    /// Per cell type, default values of unconnected pins.
    pub cell_pin_defaults: BTreeMap<String, BTreeMap<String, PinDefault>>,
    /// Preferred constant when either would do.
    pub best_constant: TieValue,
    /// Constant-source cell types and their output pins.
    pub gnd_cell: (String, String),
    pub vcc_cell: (String, String),
    /// Names the constant nets must carry in a physical netlist.
    pub gnd_net: String,
    pub vcc_net: String,
}

impl Default for ConstantTies {
    fn default() -> Self {
        ConstantTies {
            vcc_bels: BTreeMap::new(),
            gnd_bels: BTreeMap::new(),
            vcc_wires: BTreeSet::new(),
            gnd_wires: BTreeSet::new(),
            vcc_node_exceptions: BTreeSet::new(),
            gnd_node_exceptions: BTreeSet::new(),
            cell_pin_defaults: BTreeMap::new(),
            best_constant: TieValue::Vcc,
            gnd_cell: ("GND".to_string(), "G".to_string()),
            vcc_cell: ("VCC".to_string(), "P".to_string()),
            gnd_net: GND_NET.to_string(),
            vcc_net: VCC_NET.to_string(),
        }
    }
}

impl ConstantTies {
    pub fn bel_tie(&self, site_type: SiteTypeId, bel: BelSlotId) -> Option<(TieValue, BelPinId)> {
        if let Some(&pin) = self.vcc_bels.get(&(site_type, bel)) {
            return Some((TieValue::Vcc, pin));
        }
        if let Some(&pin) = self.gnd_bels.get(&(site_type, bel)) {
            return Some((TieValue::Gnd, pin));
        }
        None
    }

    pub fn is_bel_tied(&self, site_type: SiteTypeId, bel: BelSlotId) -> bool {
        self.bel_tie(site_type, bel).is_some()
    }

    pub fn is_bel_tied_vcc(&self, site_type: SiteTypeId, bel: BelSlotId) -> bool {
        self.vcc_bels.contains_key(&(site_type, bel))
    }

    pub fn is_bel_tied_gnd(&self, site_type: SiteTypeId, bel: BelSlotId) -> bool {
        self.gnd_bels.contains_key(&(site_type, bel))
    }

    pub fn is_node_tied_vcc(&self, dev: &Device, node: NodeId) -> bool {
        self.node_tied(dev, node, TieValue::Vcc)
    }

    pub fn is_node_tied_gnd(&self, dev: &Device, node: NodeId) -> bool {
        self.node_tied(dev, node, TieValue::Gnd)
    }

    pub fn is_node_tied(&self, dev: &Device, node: NodeId) -> bool {
        self.is_node_tied_vcc(dev, node) || self.is_node_tied_gnd(dev, node)
    }

    fn node_tied(&self, dev: &Device, node: NodeId, value: TieValue) -> bool {
        let key = dev.nodes[node].wires[0];
        let (same, other) = match value {
            TieValue::Vcc => (&self.vcc_node_exceptions, &self.gnd_node_exceptions),
            TieValue::Gnd => (&self.gnd_node_exceptions, &self.vcc_node_exceptions),
        };
        if same.contains(&key) {
            return true;
        }
        if other.contains(&key) {
            return false;
        }
        let wires = match value {
            TieValue::Vcc => &self.vcc_wires,
            TieValue::Gnd => &self.gnd_wires,
        };
        dev.nodes[node]
            .wires
            .iter()
            .any(|&(tile, wire)| wires.contains(&(dev.tiles[tile].kind, wire)))
    }

    /// Returns a description of the first key claimed by both the VCC and
    /// GND sets, if any. A tie table with such a key is unusable.
    pub fn find_ambiguous(&self, dev: &Device) -> Option<String> {
        for key @ &(st, bel) in self.vcc_bels.keys() {
            if self.gnd_bels.contains_key(key) {
                return Some(format!(
                    "bel {st}/{bel} tied to both VCC and GND",
                    st = dev.site_types.key(st),
                    bel = dev.site_types[st].bels.key(bel),
                ));
            }
        }
        for key @ &(tt, wire) in self.vcc_wires.iter() {
            if self.gnd_wires.contains(key) {
                return Some(format!(
                    "wire {tt}/{wire} tied to both VCC and GND",
                    tt = dev.tile_types.key(tt),
                    wire = dev.tile_types[tt].wires[wire],
                ));
            }
        }
        for key @ &(tile, wire) in self.vcc_node_exceptions.iter() {
            if self.gnd_node_exceptions.contains(key) {
                return Some(format!(
                    "node {tile}/{wire} tied to both VCC and GND",
                    tile = dev.tiles.key(tile),
                    wire = dev.tile_types[dev.tiles[tile].kind].wires[wire],
                ));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipDef;

    fn tied_device() -> Device {
        let mut dev = Device::new("testdev");
        let tt = dev.tile_type("INT");
        let (w_gnd, w_sig) = {
            let t = &mut dev.tile_types[tt];
            let g = t.wire("GND_WIRE");
            let s = t.wire("SIG");
            t.add_pip(
                g,
                s,
                PipDef {
                    directional: true,
                    buffered: true,
                },
            );
            (g, s)
        };
        let t0 = dev.add_tile("INT_X0Y0", tt, 0, 0);
        let t1 = dev.add_tile("INT_X0Y1", tt, 1, 0);
        dev.add_node(&[(t0, w_gnd)], Some(TieValue::Gnd));
        // same tile-type wire, but untied in this tile
        dev.add_node(&[(t1, w_gnd)], None);
        dev.add_node(&[(t0, w_sig), (t1, w_sig)], None);
        dev
    }

    #[test]
    fn exception_overrides_type_default() {
        let mut dev = tied_device();
        let (tt, _) = dev.tile_types.get("INT").unwrap();
        let w_gnd = dev.tile_types[tt].get_wire("GND_WIRE").unwrap();
        let (t0, _) = dev.tiles.get("INT_X0Y0").unwrap();
        let (t1, _) = dev.tiles.get("INT_X0Y1").unwrap();
        let n0 = dev.node_at(t0, w_gnd).unwrap();
        let n1 = dev.node_at(t1, w_gnd).unwrap();

        // type-level rule says tied
        dev.constants.gnd_wires.insert((tt, w_gnd));
        assert!(dev.constants.is_node_tied_gnd(&dev, n0));
        assert!(dev.constants.is_node_tied_gnd(&dev, n1));

        // an exception flips one instance without touching the other
        dev.constants.gnd_wires.remove(&(tt, w_gnd));
        dev.constants.gnd_node_exceptions.insert((t0, w_gnd));
        assert!(dev.constants.is_node_tied_gnd(&dev, n0));
        assert!(!dev.constants.is_node_tied_gnd(&dev, n1));
        assert!(!dev.constants.is_node_tied_vcc(&dev, n0));
    }

    #[test]
    fn ambiguity_detected() {
        let mut dev = tied_device();
        let (tt, _) = dev.tile_types.get("INT").unwrap();
        let w_gnd = dev.tile_types[tt].get_wire("GND_WIRE").unwrap();
        assert!(dev.constants.find_ambiguous(&dev).is_none());
        dev.constants.gnd_wires.insert((tt, w_gnd));
        dev.constants.vcc_wires.insert((tt, w_gnd));
        let desc = dev.constants.find_ambiguous(&dev).unwrap();
        assert!(desc.contains("GND_WIRE"));
    }
}
