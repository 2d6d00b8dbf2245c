//! Placed-and-routed design model.
//!
//! A [`Design`] pairs a logical [`Netlist`] with physical state: site
//! instances holding placed cells and intra-site routing, and physical nets
//! holding pips and site pins. The interchange codec populates this model on
//! decode and walks it on encode; no placement or routing is computed here.

use std::collections::{BTreeMap, BTreeSet};

use fabric_device::{
    BelPinId, BelSlotId, PipId, SiteId, SitePinId, SiteTypeId, SiteWireId, TileId, TtWireId,
};
use fabric_netlist::Netlist;
use unnamed_entity::{EntityMap, entity_id};

entity_id! {
    pub id SiteInstId u32;
    pub id PhysNetId u32;
}

pub use fabric_device::{GND_NET, VCC_NET};

/// Name prefix of site instances synthesized for implicit constant sources.
pub const STATIC_SOURCE_PREFIX: &str = "STATIC_SOURCE";
/// Placeholder name of locked (black-box) cells.
pub const LOCKED_CELL: &str = "<LOCKED>";
/// Cell type marking a top-level port placeholder.
pub const PORT_CELL_TYPE: &str = "<PORT>";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NetClass {
    Signal,
    Gnd,
    Vcc,
}

impl NetClass {
    pub fn is_static(self) -> bool {
        matches!(self, NetClass::Gnd | NetClass::Vcc)
    }

    /// The required name of a constant net of this class, if constrained.
    pub fn required_name(self) -> Option<&'static str> {
        match self {
            NetClass::Gnd => Some(GND_NET),
            NetClass::Vcc => Some(VCC_NET),
            NetClass::Signal => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PhysCellKind {
    /// Backed by a logical cell instance.
    Ordinary,
    /// Locked black box; no logical pairing exists.
    Locked,
    /// Placeholder for an unconnected top-level port.
    Port,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OtherCell {
    pub name: String,
    pub cell_type: String,
}

/// One logical-pin-to-physical-pin binding of a placed cell. `other_cell`
/// redirects the mapping to a different cell sharing the same bel (a
/// pass-through placement).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PinMapping {
    pub bel: BelSlotId,
    pub bel_pin: BelPinId,
    pub cell_pin: String,
    pub fixed: bool,
    pub other_cell: Option<OtherCell>,
}

#[derive(Clone, Debug)]
pub struct PlacedCell {
    pub name: String,
    pub kind: PhysCellKind,
    pub cell_type: String,
    pub bel_fixed: bool,
    pub site_fixed: bool,
    pub routethru: bool,
    pub pin_map: Vec<PinMapping>,
    /// Secondary bels consumed by this placement (multi-bel primitives).
    pub other_bels: BTreeSet<BelSlotId>,
}

impl PlacedCell {
    pub fn new(name: impl Into<String>, cell_type: impl Into<String>) -> Self {
        PlacedCell {
            name: name.into(),
            kind: PhysCellKind::Ordinary,
            cell_type: cell_type.into(),
            bel_fixed: false,
            site_fixed: false,
            routethru: false,
            pin_map: Vec::new(),
            other_bels: BTreeSet::new(),
        }
    }

    /// The logical pin mapped onto the given bel pin, if any.
    pub fn logical_pin(&self, bel: BelSlotId, bel_pin: BelPinId) -> Option<&str> {
        self.pin_map
            .iter()
            .find(|m| m.bel == bel && m.bel_pin == bel_pin)
            .map(|m| m.cell_pin.as_str())
    }
}

/// A site pip: a routing bel plus the selected input pin.
pub type SitePipKey = (BelSlotId, BelPinId);

#[derive(Clone, Debug)]
pub struct SiteInst {
    pub site: SiteId,
    pub kind: SiteTypeId,
    pub locked: bool,
    pub cells: BTreeMap<BelSlotId, PlacedCell>,
    /// Active site pips; the value is the fixed flag.
    pub used_site_pips: BTreeMap<SitePipKey, bool>,
    /// Site wire -> net occupying it.
    pub wire_nets: BTreeMap<SiteWireId, PhysNetId>,
}

impl SiteInst {
    pub fn new(site: SiteId, kind: SiteTypeId) -> Self {
        SiteInst {
            site,
            kind,
            locked: false,
            cells: BTreeMap::new(),
            used_site_pips: BTreeMap::new(),
            wire_nets: BTreeMap::new(),
        }
    }

    pub fn get_cell(&self, bel: BelSlotId) -> Option<&PlacedCell> {
        self.cells.get(&bel)
    }

    pub fn add_site_pip(&mut self, key: SitePipKey, fixed: bool) {
        self.used_site_pips.insert(key, fixed);
    }

    pub fn is_site_pip_used(&self, key: SitePipKey) -> bool {
        self.used_site_pips.contains_key(&key)
    }

    /// Binds a site wire to a net; rebinding to a different net is refused.
    pub fn route_site_wire(&mut self, wire: SiteWireId, net: PhysNetId) -> bool {
        match self.wire_nets.get(&wire) {
            Some(&cur) => cur == net,
            None => {
                self.wire_nets.insert(wire, net);
                true
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PlacedPip {
    pub tile: TileId,
    pub pip: PipId,
    pub forward: bool,
    pub fixed: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SitePinRef {
    pub site_inst: SiteInstId,
    pub pin: SitePinId,
}

/// A routing stub: a node (by tile + wire) claimed by the net without a
/// full pip, e.g. a pip whose end wire is disconnected.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct StubNode {
    pub tile: TileId,
    pub wire: TtWireId,
    pub fixed: bool,
}

impl Default for NetClass {
    fn default() -> Self {
        NetClass::Signal
    }
}

#[derive(Clone, Debug, Default)]
pub struct PhysNet {
    pub class: NetClass,
    pub pips: Vec<PlacedPip>,
    pub pins: Vec<SitePinRef>,
    pub stub_nodes: Vec<StubNode>,
}

impl PhysNet {
    pub fn new(class: NetClass) -> Self {
        PhysNet {
            class,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct Design {
    pub name: String,
    pub part: String,
    pub netlist: Netlist,
    pub site_insts: EntityMap<SiteInstId, String, SiteInst>,
    pub nets: EntityMap<PhysNetId, String, PhysNet>,
    pub auto_io_buffers: bool,
    pub out_of_context: bool,
    /// Physical cell name -> primary placement.
    pub cells_by_name: BTreeMap<String, (SiteInstId, BelSlotId)>,
    site_lookup: BTreeMap<SiteId, SiteInstId>,
}

impl Design {
    pub fn new(name: impl Into<String>, part: impl Into<String>, netlist: Netlist) -> Self {
        Design {
            name: name.into(),
            part: part.into(),
            netlist,
            site_insts: EntityMap::new(),
            nets: EntityMap::new(),
            auto_io_buffers: true,
            out_of_context: false,
            cells_by_name: BTreeMap::new(),
            site_lookup: BTreeMap::new(),
        }
    }

    #[track_caller]
    pub fn create_site_inst(
        &mut self,
        name: impl Into<String>,
        site: SiteId,
        kind: SiteTypeId,
    ) -> SiteInstId {
        let si = self
            .site_insts
            .insert_new(name.into(), SiteInst::new(site, kind));
        let old = self.site_lookup.insert(site, si);
        assert!(old.is_none(), "site already has an instance");
        si
    }

    pub fn site_inst_for_site(&self, site: SiteId) -> Option<SiteInstId> {
        self.site_lookup.get(&site).copied()
    }

    #[track_caller]
    pub fn add_net(&mut self, name: impl Into<String>, class: NetClass) -> PhysNetId {
        self.nets.insert_new(name.into(), PhysNet::new(class))
    }

    /// Places a cell on a bel, tracking the primary placement by name.
    /// Returns `false` if the bel is already occupied.
    pub fn place_cell(&mut self, si: SiteInstId, bel: BelSlotId, cell: PlacedCell) -> bool {
        let inst = &mut self.site_insts[si];
        if inst.cells.contains_key(&bel) {
            return false;
        }
        self.cells_by_name
            .entry(cell.name.clone())
            .or_insert((si, bel));
        inst.cells.insert(bel, cell);
        true
    }

    pub fn find_cell(&self, name: &str) -> Option<(SiteInstId, BelSlotId)> {
        self.cells_by_name.get(name).copied()
    }

    pub fn cell(&self, si: SiteInstId, bel: BelSlotId) -> Option<&PlacedCell> {
        self.site_insts[si].cells.get(&bel)
    }
}
