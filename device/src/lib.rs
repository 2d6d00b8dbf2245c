//! Physical device model.
//!
//! A [`Device`] is a grid of tiles, each of a shared [`TileType`]; tiles
//! contain sites, each of a shared [`SiteType`]. Tile wires are joined into
//! electrical [`Node`]s across tile boundaries. All connectivity queries the
//! interchange codec needs (node lookup, backward pips, site pin bindings,
//! intra-site wire fanout) live here.

use std::collections::BTreeMap;

use fabric_netlist::Netlist;
use unnamed_entity::{EntityMap, EntityPartVec, EntitySet, EntityVec, entity_id};

pub mod tie;

pub use tie::{ConstantTies, GND_NET, PinDefault, TieValue, VCC_NET};

entity_id! {
    pub id TileTypeId u16;
    pub id SiteTypeId u16;
    pub id TileId u32;
    pub id SiteId u32;
    pub id NodeId u32;
    pub id TtWireId u16;
    pub id PipId u32;
    pub id SiteWireId u16;
    pub id BelSlotId u16;
    pub id BelPinId u16;
    pub id SitePinId u16;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BelClass {
    /// A placeable logic element.
    Logic,
    /// A routing mux; its input/output pin pairs are the site pips.
    Routing,
    /// A site port; carries exactly one pin bound to a site pin.
    Port,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PinDir {
    Input,
    Output,
    Bidir,
}

impl PinDir {
    pub fn flip(self) -> PinDir {
        match self {
            PinDir::Input => PinDir::Output,
            PinDir::Output => PinDir::Input,
            PinDir::Bidir => PinDir::Bidir,
        }
    }
}

/// A bel pin; `wire` is the site wire the pin is attached to, if any.
#[derive(Clone, Debug)]
pub struct BelPin {
    pub dir: PinDir,
    pub wire: Option<SiteWireId>,
}

#[derive(Clone, Debug)]
pub struct Bel {
    pub class: BelClass,
    /// Set on logic bels that are hard-wired constant sources; such a bel
    /// has exactly one (output) pin.
    pub tie: Option<TieValue>,
    pub pins: EntityMap<BelPinId, String, BelPin>,
}

#[derive(Clone, Debug, Default)]
pub struct SiteWire {
    pub pins: Vec<(BelSlotId, BelPinId)>,
}

/// A site pin. `dir` is the external direction: `Input` means the signal
/// enters the site. The backing port bel's pin carries the flipped,
/// site-internal direction.
#[derive(Clone, Copy, Debug)]
pub struct SitePinDef {
    pub bel: BelSlotId,
    pub dir: PinDir,
}

#[derive(Clone, Debug, Default)]
pub struct SiteType {
    pub bels: EntityMap<BelSlotId, String, Bel>,
    pub wires: EntityMap<SiteWireId, String, SiteWire>,
    pub pins: EntityMap<SitePinId, String, SitePinDef>,
}

impl SiteType {
    pub fn site_wire(&mut self, name: &str) -> SiteWireId {
        match self.wires.get(name) {
            Some((w, _)) => w,
            None => self.wires.insert(name.to_string(), SiteWire::default()).0,
        }
    }

    #[track_caller]
    pub fn add_bel(&mut self, name: &str, class: BelClass, tie: Option<TieValue>) -> BelSlotId {
        self.bels.insert_new(
            name.to_string(),
            Bel {
                class,
                tie,
                pins: EntityMap::new(),
            },
        )
    }

    pub fn add_bel_pin(
        &mut self,
        bel: BelSlotId,
        name: &str,
        dir: PinDir,
        wire: Option<&str>,
    ) -> BelPinId {
        let wire = wire.map(|w| self.site_wire(w));
        let pin = self.bels[bel]
            .pins
            .insert_new(name.to_string(), BelPin { dir, wire });
        if let Some(w) = wire {
            self.wires[w].pins.push((bel, pin));
        }
        pin
    }

    /// Adds a site pin of the given external direction, backed by a port bel
    /// of the same name attached to `wire`.
    pub fn add_site_pin(&mut self, name: &str, dir: PinDir, wire: &str) -> SitePinId {
        let bel = self.add_bel(name, BelClass::Port, None);
        self.add_bel_pin(bel, name, dir.flip(), Some(wire));
        self.pins.insert_new(name.to_string(), SitePinDef { bel, dir })
    }

    pub fn get_bel(&self, name: &str) -> Option<(BelSlotId, &Bel)> {
        self.bels.get(name)
    }

    pub fn pin_wire(&self, bel: BelSlotId, pin: BelPinId) -> Option<SiteWireId> {
        self.bels[bel].pins[pin].wire
    }

    /// The unique site-internal driver pin on a site wire (an output pin of
    /// a logic or port bel, or of an untied routing bel).
    pub fn source_pin_of_wire(&self, wire: SiteWireId) -> Option<(BelSlotId, BelPinId)> {
        self.wires[wire]
            .pins
            .iter()
            .copied()
            .find(|&(bel, pin)| self.bels[bel].pins[pin].dir == PinDir::Output)
    }

    /// The site pin backed by the given port bel, if any.
    pub fn site_pin_for_bel(&self, bel: BelSlotId) -> Option<SitePinId> {
        self.pins
            .iter()
            .find(|(_, _, def)| def.bel == bel)
            .map(|(id, _, _)| id)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PipDef {
    pub directional: bool,
    pub buffered: bool,
}

#[derive(Clone, Debug, Default)]
pub struct TileType {
    pub wires: EntitySet<TtWireId, String>,
    pub pips: EntityMap<PipId, (TtWireId, TtWireId), PipDef>,
}

impl TileType {
    pub fn wire(&mut self, name: &str) -> TtWireId {
        self.wires.get_or_insert(name)
    }

    pub fn get_wire(&self, name: &str) -> Option<TtWireId> {
        self.wires.get(name)
    }

    #[track_caller]
    pub fn add_pip(&mut self, wire0: TtWireId, wire1: TtWireId, def: PipDef) -> PipId {
        self.pips.insert_new((wire0, wire1), def)
    }

    /// Finds the pip connecting `wire0 -> wire1`; for a non-directional pip
    /// the reversed orientation matches too, with `forward == false`.
    pub fn pip_between(&self, wire0: TtWireId, wire1: TtWireId) -> Option<(PipId, bool)> {
        if let Some((pip, _)) = self.pips.get(&(wire0, wire1)) {
            return Some((pip, true));
        }
        match self.pips.get(&(wire1, wire0)) {
            Some((pip, def)) if !def.directional => Some((pip, false)),
            _ => None,
        }
    }

    /// All pips that can drive `wire`.
    pub fn pips_into(&self, wire: TtWireId) -> Vec<PipId> {
        self.pips
            .iter()
            .filter(|&(_, &(w0, w1), ref def)| w1 == wire || (!def.directional && w0 == wire))
            .map(|(id, _, _)| id)
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct Tile {
    pub kind: TileTypeId,
    pub row: u16,
    pub col: u16,
    pub sites: Vec<SiteId>,
    pub wire_nodes: EntityPartVec<TtWireId, NodeId>,
}

#[derive(Clone, Debug)]
pub struct Site {
    pub tile: TileId,
    pub kind: SiteTypeId,
    /// Site pin -> external tile wire binding.
    pub pin_wires: EntityPartVec<SitePinId, TtWireId>,
}

#[derive(Clone, Debug)]
pub struct Node {
    /// Member wires; the first entry is the node's canonical (tile, wire).
    pub wires: Vec<(TileId, TtWireId)>,
    /// Ground truth: hard-wired constant value of this node, if any.
    pub tie: Option<TieValue>,
}

#[derive(Clone, Debug)]
pub struct Device {
    pub name: String,
    pub tile_types: EntityMap<TileTypeId, String, TileType>,
    pub site_types: EntityMap<SiteTypeId, String, SiteType>,
    pub tiles: EntityMap<TileId, String, Tile>,
    pub sites: EntityMap<SiteId, String, Site>,
    pub nodes: EntityVec<NodeId, Node>,
    pub constants: ConstantTies,
    /// Primitive and macro cell library shipped with the device.
    pub prim_lib: Netlist,
    /// Primitives whose default macro expansion is overridden, mapped to the
    /// replacement macro cell name.
    pub macro_expansions: BTreeMap<String, String>,
}

impl Device {
    pub fn new(name: impl Into<String>) -> Self {
        Device {
            name: name.into(),
            tile_types: EntityMap::new(),
            site_types: EntityMap::new(),
            tiles: EntityMap::new(),
            sites: EntityMap::new(),
            nodes: EntityVec::new(),
            constants: ConstantTies::default(),
            prim_lib: Netlist::new("prims"),
            macro_expansions: BTreeMap::new(),
        }
    }

    pub fn tile_type(&mut self, name: &str) -> TileTypeId {
        match self.tile_types.get(name) {
            Some((tt, _)) => tt,
            None => {
                self.tile_types
                    .insert(name.to_string(), TileType::default())
                    .0
            }
        }
    }

    pub fn site_type(&mut self, name: &str) -> SiteTypeId {
        match self.site_types.get(name) {
            Some((st, _)) => st,
            None => {
                self.site_types
                    .insert(name.to_string(), SiteType::default())
                    .0
            }
        }
    }

    #[track_caller]
    pub fn add_tile(&mut self, name: &str, kind: TileTypeId, row: u16, col: u16) -> TileId {
        self.tiles.insert_new(
            name.to_string(),
            Tile {
                kind,
                row,
                col,
                sites: Vec::new(),
                wire_nodes: EntityPartVec::new(),
            },
        )
    }

    #[track_caller]
    pub fn add_site(&mut self, name: &str, tile: TileId, kind: SiteTypeId) -> SiteId {
        let site = self.sites.insert_new(
            name.to_string(),
            Site {
                tile,
                kind,
                pin_wires: EntityPartVec::new(),
            },
        );
        self.tiles[tile].sites.push(site);
        site
    }

    /// Binds a site pin to the tile wire it escapes to.
    pub fn bind_site_pin(&mut self, site: SiteId, pin: SitePinId, wire: TtWireId) {
        self.sites[site].pin_wires.insert(pin, wire);
    }

    #[track_caller]
    pub fn add_node(&mut self, wires: &[(TileId, TtWireId)], tie: Option<TieValue>) -> NodeId {
        assert!(!wires.is_empty());
        let node = self.nodes.push(Node {
            wires: wires.to_vec(),
            tie,
        });
        for &(tile, wire) in wires {
            if self.tiles[tile].wire_nodes.insert(wire, node).is_some() {
                panic!(
                    "node wire double set {tile}",
                    tile = self.tiles.key(tile)
                );
            }
        }
        node
    }

    pub fn node_at(&self, tile: TileId, wire: TtWireId) -> Option<NodeId> {
        self.tiles[tile].wire_nodes.get(wire).copied()
    }

    pub fn tile_type_of(&self, tile: TileId) -> &TileType {
        &self.tile_types[self.tiles[tile].kind]
    }

    pub fn site_type_of(&self, site: SiteId) -> &SiteType {
        &self.site_types[self.sites[site].kind]
    }

    /// All pips that can drive any wire of `node`, with their tiles.
    pub fn backward_pips(&self, node: NodeId) -> Vec<(TileId, PipId)> {
        let mut out = Vec::new();
        for &(tile, wire) in &self.nodes[node].wires {
            let tt = &self.tile_types[self.tiles[tile].kind];
            for pip in tt.pips_into(wire) {
                out.push((tile, pip));
            }
        }
        out
    }

    /// Site pins bound to any wire of `node`.
    pub fn node_site_pins(&self, node: NodeId) -> Vec<(SiteId, SitePinId)> {
        let mut out = Vec::new();
        for &(tile, wire) in &self.nodes[node].wires {
            for &site in &self.tiles[tile].sites {
                for (pin, &pw) in self.sites[site].pin_wires.iter() {
                    if pw == wire {
                        out.push((site, pin));
                    }
                }
            }
        }
        out
    }

    /// The tile wire a site pin is bound to, as a node.
    pub fn site_pin_node(&self, site: SiteId, pin: SitePinId) -> Option<NodeId> {
        let s = &self.sites[site];
        let wire = *s.pin_wires.get(pin)?;
        self.node_at(s.tile, wire)
    }
}
