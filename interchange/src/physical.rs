//! Physical netlist codec.
//!
//! Placement records bind cell names to sites and bels; routing records are
//! forests of recursive route branches, each segment one of pip / bel pin /
//! site pip / site pin. Encode reconstructs the forest by linking every
//! segment to its driver; decode replays the records into a design,
//! resolving device names through the type-level caches.

use std::collections::{HashMap, HashSet, VecDeque};

use bincode::{Decode, Encode};
use fabric_design::{
    Design, GND_NET, LOCKED_CELL, NetClass, OtherCell, PORT_CELL_TYPE, PhysCellKind, PhysNet,
    PhysNetId, PinMapping, PlacedCell, PlacedPip, STATIC_SOURCE_PREFIX, SiteInstId, SitePinRef,
    StubNode, VCC_NET,
};
use fabric_device::{
    BelClass, BelPinId, BelSlotId, Device, PinDir, SiteId, SitePinId, TileId,
};
use fabric_netlist::{Instance, MACROS_LIBRARY, Netlist};
use unnamed_entity::EntityId;

use crate::error::{InterchangeError, Result};
use crate::resolve::{BelPinCache, PipCache};
use crate::table::StringTable;
use crate::wire::{self, WireOptions};

pub const DISABLE_AUTO_IO_BUFFERS: &str = "DISABLE_AUTO_IO_BUFFERS";
pub const OUT_OF_CONTEXT: &str = "OUT_OF_CONTEXT";

/// The one macro kind exempt from the full-leaf-placement check; its legs
/// are optional. Kept narrow pending confirmation against the macro
/// expansion rules.
pub const MACRO_EXEMPT_FROM_COMPLETENESS: &str = "IOBUFDS";

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct SiteInstMsg {
    pub site: u32,
    pub kind: u32,
}

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct OtherCellMsg {
    pub name: u32,
    pub cell_type: u32,
}

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct PinMappingMsg {
    pub bel: u32,
    pub bel_pin: u32,
    pub cell_pin: u32,
    pub fixed: bool,
    pub other_cell: Option<OtherCellMsg>,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct PlacementMsg {
    pub cell_name: u32,
    pub cell_type: u32,
    pub site: u32,
    pub bel: Option<u32>,
    pub bel_fixed: bool,
    pub site_fixed: bool,
    pub other_bels: Vec<u32>,
    pub pin_map: Vec<PinMappingMsg>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub enum PhysCellKindMsg {
    Locked,
    Port,
}

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct PhysCellMsg {
    pub cell_name: u32,
    pub kind: PhysCellKindMsg,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub enum NetClassMsg {
    Signal,
    Gnd,
    Vcc,
}

impl From<NetClass> for NetClassMsg {
    fn from(c: NetClass) -> Self {
        match c {
            NetClass::Signal => NetClassMsg::Signal,
            NetClass::Gnd => NetClassMsg::Gnd,
            NetClass::Vcc => NetClassMsg::Vcc,
        }
    }
}

impl From<NetClassMsg> for NetClass {
    fn from(c: NetClassMsg) -> Self {
        match c {
            NetClassMsg::Signal => NetClass::Signal,
            NetClassMsg::Gnd => NetClass::Gnd,
            NetClassMsg::Vcc => NetClass::Vcc,
        }
    }
}

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub enum SegmentMsg {
    Pip {
        tile: u32,
        wire0: u32,
        wire1: u32,
        forward: bool,
        fixed: bool,
    },
    BelPin {
        site: u32,
        bel: u32,
        pin: u32,
    },
    SitePip {
        site: u32,
        bel: u32,
        pin: u32,
        fixed: bool,
    },
    SitePin {
        site: u32,
        pin: u32,
    },
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct RouteBranchMsg {
    pub segment: SegmentMsg,
    pub branches: Vec<RouteBranchMsg>,
}

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct StubNodeMsg {
    pub tile: u32,
    pub wire: u32,
    pub fixed: bool,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct PhysNetMsg {
    pub name: u32,
    pub kind: NetClassMsg,
    pub sources: Vec<RouteBranchMsg>,
    pub stubs: Vec<RouteBranchMsg>,
    pub stub_nodes: Vec<StubNodeMsg>,
}

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct PropertyMsg {
    pub key: u32,
    pub value: u32,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct PhysNetlistMsg {
    pub part: String,
    pub strings: Vec<String>,
    pub site_insts: Vec<SiteInstMsg>,
    pub placements: Vec<PlacementMsg>,
    pub phys_cells: Vec<PhysCellMsg>,
    pub nets: Vec<PhysNetMsg>,
    /// Stubs of the null net: active site pips not associated with any net.
    pub null_net: Vec<RouteBranchMsg>,
    pub properties: Vec<PropertyMsg>,
}

// ---------------------------------------------------------------------------
// encode
// ---------------------------------------------------------------------------

/// One routing segment gathered from the design before forest assembly.
#[derive(Clone, Copy, Debug)]
enum Seg {
    Pip(PlacedPip),
    BelPin {
        si: SiteInstId,
        bel: BelSlotId,
        pin: BelPinId,
        routethru: bool,
    },
    SitePip {
        si: SiteInstId,
        bel: BelSlotId,
        pin: BelPinId,
        fixed: bool,
    },
    SitePin {
        si: SiteInstId,
        pin: SitePinId,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
enum SegKey {
    Pip(TileId, fabric_device::PipId),
    BelPin(SiteInstId, BelSlotId, BelPinId),
    SitePip(SiteInstId, BelSlotId, BelPinId),
    SitePin(SiteInstId, SitePinId),
}

impl Seg {
    fn key(&self) -> SegKey {
        match *self {
            Seg::Pip(p) => SegKey::Pip(p.tile, p.pip),
            Seg::BelPin { si, bel, pin, .. } => SegKey::BelPin(si, bel, pin),
            Seg::SitePip { si, bel, pin, .. } => SegKey::SitePip(si, bel, pin),
            Seg::SitePin { si, pin } => SegKey::SitePin(si, pin),
        }
    }
}

struct BranchNode {
    seg: Seg,
    children: Vec<usize>,
    has_parent: bool,
    visited: bool,
}

struct Encoder<'a> {
    design: &'a Design,
    device: &'a Device,
    strings: StringTable,
}

impl<'a> Encoder<'a> {
    fn new(design: &'a Design, device: &'a Device) -> Self {
        Encoder {
            design,
            device,
            strings: StringTable::new(),
        }
    }

    fn idx(&mut self, s: &str) -> u32 {
        self.strings.index_of(s).to_idx() as u32
    }

    fn site_name(&self, si: SiteInstId) -> &'a str {
        self.device.sites.key(self.design.site_insts[si].site)
    }

    /// True when the segment can drive a net: an output pin of a populated
    /// logic bel that is not being passed through.
    fn is_source(&self, seg: &Seg) -> bool {
        match *seg {
            Seg::BelPin {
                si,
                bel,
                pin,
                routethru,
            } => {
                let st = self.device.site_type_of(self.design.site_insts[si].site);
                let b = &st.bels[bel];
                b.class == BelClass::Logic && b.pins[pin].dir == PinDir::Output && !routethru
            }
            _ => false,
        }
    }

    /// Everything that could drive this segment, as lookup keys.
    fn drivers(&self, seg: &Seg) -> Vec<SegKey> {
        let dev = self.device;
        let design = self.design;
        let mut out = Vec::new();
        match *seg {
            Seg::Pip(p) => {
                let tt = dev.tile_type_of(p.tile);
                let &(w0, w1) = tt.pips.key(p.pip);
                let start = if p.forward { w0 } else { w1 };
                if let Some(node) = dev.node_at(p.tile, start) {
                    for (tile, pip) in dev.backward_pips(node) {
                        if (tile, pip) != (p.tile, p.pip) {
                            out.push(SegKey::Pip(tile, pip));
                        }
                    }
                    for (site, pin) in dev.node_site_pins(node) {
                        let st = dev.site_type_of(site);
                        if st.pins[pin].dir == PinDir::Output {
                            if let Some(si) = design.site_inst_for_site(site) {
                                out.push(SegKey::SitePin(si, pin));
                            }
                        }
                    }
                }
            }
            Seg::SitePip { si, bel, pin, .. } => {
                let st = dev.site_type_of(design.site_insts[si].site);
                if let Some(wire) = st.pin_wire(bel, pin) {
                    if let Some((sbel, spin)) = st.source_pin_of_wire(wire) {
                        out.push(SegKey::BelPin(si, sbel, spin));
                    }
                }
            }
            Seg::SitePin { si, pin } => {
                let site = design.site_insts[si].site;
                let st = dev.site_type_of(site);
                let def = st.pins[pin];
                if def.dir == PinDir::Output {
                    // driven from inside the site, through the port bel
                    if let Some(ppin) = st.bels[def.bel].pins.ids().next() {
                        out.push(SegKey::BelPin(si, def.bel, ppin));
                    }
                } else if let Some(node) = dev.site_pin_node(site, pin) {
                    for (tile, pip) in dev.backward_pips(node) {
                        out.push(SegKey::Pip(tile, pip));
                    }
                }
            }
            Seg::BelPin {
                si,
                bel,
                pin,
                routethru,
            } => {
                let st = dev.site_type_of(design.site_insts[si].site);
                let b = &st.bels[bel];
                let dir = b.pins[pin].dir;
                match b.class {
                    BelClass::Routing => {
                        if dir == PinDir::Output {
                            for (ipin, _, bp) in b.pins.iter() {
                                if bp.dir == PinDir::Input {
                                    out.push(SegKey::SitePip(si, bel, ipin));
                                }
                            }
                        } else if let Some(wire) = b.pins[pin].wire {
                            if let Some((sbel, spin)) = st.source_pin_of_wire(wire) {
                                out.push(SegKey::BelPin(si, sbel, spin));
                            }
                        }
                    }
                    BelClass::Port => {
                        if let Some(spin) = st.site_pin_for_bel(bel) {
                            if dir == PinDir::Output {
                                // an input site pin drives this port bel
                                out.push(SegKey::SitePin(si, spin));
                            } else if let Some(wire) = b.pins[pin].wire {
                                if let Some((sbel, sp)) = st.source_pin_of_wire(wire) {
                                    if (sbel, sp) != (bel, pin) {
                                        out.push(SegKey::BelPin(si, sbel, sp));
                                    }
                                }
                            }
                        }
                    }
                    BelClass::Logic => {
                        if dir == PinDir::Output && routethru {
                            for (ipin, _, bp) in b.pins.iter() {
                                if bp.dir == PinDir::Input {
                                    out.push(SegKey::BelPin(si, bel, ipin));
                                }
                            }
                        } else if dir != PinDir::Output {
                            if let Some(wire) = b.pins[pin].wire {
                                if let Some((sbel, spin)) = st.source_pin_of_wire(wire) {
                                    if (sbel, spin) != (bel, pin) {
                                        out.push(SegKey::BelPin(si, sbel, spin));
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// Intra-site segments of a net: for every site wire the net occupies,
    /// the bel pins of populated elements and the active site pips.
    fn gather_intra_site(&self, net_id: PhysNetId, net: &PhysNet, segs: &mut Vec<Seg>) {
        for (si, _, inst) in self.design.site_insts.iter() {
            let st = self.device.site_type_of(inst.site);
            for (&wire, &wnet) in &inst.wire_nets {
                if wnet != net_id {
                    continue;
                }
                for &(bel, pin) in &st.wires[wire].pins {
                    let b = &st.bels[bel];
                    let dir = b.pins[pin].dir;
                    match b.class {
                        BelClass::Logic => {
                            let cell = inst.cells.get(&bel);
                            if dir == PinDir::Input {
                                let Some(cell) = cell else { continue };
                                if cell.logical_pin(bel, pin).is_none() {
                                    // pin not used by this cell
                                    continue;
                                }
                                segs.push(Seg::BelPin {
                                    si,
                                    bel,
                                    pin,
                                    routethru: false,
                                });
                            } else {
                                if cell.is_none() && !net.class.is_static() {
                                    continue;
                                }
                                let routethru = cell.is_some_and(|c| c.routethru);
                                segs.push(Seg::BelPin {
                                    si,
                                    bel,
                                    pin,
                                    routethru,
                                });
                            }
                        }
                        BelClass::Routing => {
                            if dir == PinDir::Input {
                                let Some(&fixed) = inst.used_site_pips.get(&(bel, pin)) else {
                                    continue;
                                };
                                segs.push(Seg::SitePip {
                                    si,
                                    bel,
                                    pin,
                                    fixed,
                                });
                                segs.push(Seg::BelPin {
                                    si,
                                    bel,
                                    pin,
                                    routethru: false,
                                });
                            } else {
                                if net.class.is_static() && b.tie.is_some() {
                                    // implicit constant source, not serialized
                                    continue;
                                }
                                segs.push(Seg::BelPin {
                                    si,
                                    bel,
                                    pin,
                                    routethru: false,
                                });
                            }
                        }
                        BelClass::Port => {
                            let Some(spin) = st.site_pin_for_bel(bel) else {
                                continue;
                            };
                            let on_net = net
                                .pins
                                .iter()
                                .any(|p| p.site_inst == si && p.pin == spin);
                            if !on_net {
                                continue;
                            }
                            segs.push(Seg::BelPin {
                                si,
                                bel,
                                pin,
                                routethru: false,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Builds the route forest: links every segment to its driver, walks
    /// from sources, and classifies the unreachable rest as stubs (or as
    /// implicit sources on constant nets).
    fn build_net(&mut self, net_id: PhysNetId, net: &PhysNet) -> PhysNetMsg {
        let mut segs: Vec<Seg> = Vec::new();
        for &pip in &net.pips {
            segs.push(Seg::Pip(pip));
        }
        for &pin in &net.pins {
            segs.push(Seg::SitePin {
                si: pin.site_inst,
                pin: pin.pin,
            });
        }
        self.gather_intra_site(net_id, net, &mut segs);

        let mut arena: Vec<BranchNode> = Vec::with_capacity(segs.len());
        let mut index: HashMap<SegKey, usize> = HashMap::new();
        for seg in segs {
            let key = seg.key();
            if index.contains_key(&key) {
                continue;
            }
            index.insert(key, arena.len());
            arena.push(BranchNode {
                seg,
                children: Vec::new(),
                has_parent: false,
                visited: false,
            });
        }

        // pass 1: connect each segment to its first present driver
        let mut sources: Vec<usize> = Vec::new();
        for i in 0..arena.len() {
            if self.is_source(&arena[i].seg) {
                sources.push(i);
                continue;
            }
            for key in self.drivers(&arena[i].seg) {
                let Some(&j) = index.get(&key) else { continue };
                if j == i {
                    continue;
                }
                arena[j].children.push(i);
                arena[i].has_parent = true;
                break;
            }
        }

        // pass 2: anything not reachable from a source becomes a stub;
        // dangling output pins on constant nets are implicit sources
        let mut queue: VecDeque<usize> = sources.iter().copied().collect();
        while let Some(i) = queue.pop_front() {
            if arena[i].visited {
                continue;
            }
            arena[i].visited = true;
            queue.extend(arena[i].children.iter().copied());
        }
        let mut stubs: Vec<usize> = Vec::new();
        for i in 0..arena.len() {
            if arena[i].visited || arena[i].has_parent {
                continue;
            }
            let promote = net.class.is_static()
                && match arena[i].seg {
                    Seg::SitePin { si, pin } => {
                        let st = self
                            .device
                            .site_type_of(self.design.site_insts[si].site);
                        st.pins[pin].dir == PinDir::Output
                    }
                    Seg::BelPin { si, bel, pin, .. } => {
                        let st = self
                            .device
                            .site_type_of(self.design.site_insts[si].site);
                        st.bels[bel].pins[pin].dir == PinDir::Output
                    }
                    _ => false,
                };
            if promote {
                sources.push(i);
                let mut q = VecDeque::from([i]);
                while let Some(j) = q.pop_front() {
                    if arena[j].visited {
                        continue;
                    }
                    arena[j].visited = true;
                    q.extend(arena[j].children.iter().copied());
                }
            } else {
                stubs.push(i);
            }
        }

        let name = self.idx(self.design.nets.key(net_id));
        let sources = sources
            .iter()
            .map(|&i| self.branch_to_msg(&arena, i))
            .collect();
        let stubs = stubs
            .iter()
            .map(|&i| self.branch_to_msg(&arena, i))
            .collect();
        let stub_nodes = net
            .stub_nodes
            .iter()
            .map(|sn| {
                let tile_name = self.device.tiles.key(sn.tile).clone();
                let wire_name =
                    self.device.tile_type_of(sn.tile).wires[sn.wire].clone();
                StubNodeMsg {
                    tile: self.idx(&tile_name),
                    wire: self.idx(&wire_name),
                    fixed: sn.fixed,
                }
            })
            .collect();

        PhysNetMsg {
            name,
            kind: net.class.into(),
            sources,
            stubs,
            stub_nodes,
        }
    }

    fn seg_to_msg(&mut self, seg: &Seg) -> SegmentMsg {
        match *seg {
            Seg::Pip(p) => {
                let tile_name = self.device.tiles.key(p.tile).clone();
                let tt = self.device.tile_type_of(p.tile);
                let &(w0, w1) = tt.pips.key(p.pip);
                let w0_name = tt.wires[w0].clone();
                let w1_name = tt.wires[w1].clone();
                SegmentMsg::Pip {
                    tile: self.idx(&tile_name),
                    wire0: self.idx(&w0_name),
                    wire1: self.idx(&w1_name),
                    forward: p.forward,
                    fixed: p.fixed,
                }
            }
            Seg::BelPin { si, bel, pin, .. } => {
                let site_name = self.site_name(si).to_string();
                let st = self.device.site_type_of(self.design.site_insts[si].site);
                let bel_name = st.bels.key(bel).clone();
                let pin_name = st.bels[bel].pins.key(pin).clone();
                SegmentMsg::BelPin {
                    site: self.idx(&site_name),
                    bel: self.idx(&bel_name),
                    pin: self.idx(&pin_name),
                }
            }
            Seg::SitePip {
                si,
                bel,
                pin,
                fixed,
            } => {
                let site_name = self.site_name(si).to_string();
                let st = self.device.site_type_of(self.design.site_insts[si].site);
                let bel_name = st.bels.key(bel).clone();
                let pin_name = st.bels[bel].pins.key(pin).clone();
                SegmentMsg::SitePip {
                    site: self.idx(&site_name),
                    bel: self.idx(&bel_name),
                    pin: self.idx(&pin_name),
                    fixed,
                }
            }
            Seg::SitePin { si, pin } => {
                let site_name = self.site_name(si).to_string();
                let st = self.device.site_type_of(self.design.site_insts[si].site);
                let pin_name = st.pins.key(pin).clone();
                SegmentMsg::SitePin {
                    site: self.idx(&site_name),
                    pin: self.idx(&pin_name),
                }
            }
        }
    }

    fn branch_to_msg(&mut self, arena: &[BranchNode], i: usize) -> RouteBranchMsg {
        RouteBranchMsg {
            segment: self.seg_to_msg(&arena[i].seg),
            branches: arena[i]
                .children
                .iter()
                .map(|&c| self.branch_to_msg(arena, c))
                .collect(),
        }
    }

    fn build_placements(&mut self) -> (Vec<PlacementMsg>, Vec<PhysCellMsg>) {
        let mut placements = Vec::new();
        let mut phys_cells = Vec::new();
        for (si, _, inst) in self.design.site_insts.iter() {
            let site_name = self.site_name(si).to_string();
            let st = self.device.site_type_of(inst.site);
            for (&bel, cell) in &inst.cells {
                // secondary legs are folded into their primary placement;
                // locked and port placeholders always stand alone
                if cell.kind == PhysCellKind::Ordinary
                    && self.design.find_cell(&cell.name) != Some((si, bel))
                {
                    continue;
                }
                let bel_name = st.bels.key(bel).clone();
                let cell_name = match cell.kind {
                    PhysCellKind::Locked => {
                        let name = format!("{site_name}_{bel_name}_{LOCKED_CELL}");
                        phys_cells.push(PhysCellMsg {
                            cell_name: self.idx(&name),
                            kind: PhysCellKindMsg::Locked,
                        });
                        name
                    }
                    PhysCellKind::Port => {
                        phys_cells.push(PhysCellMsg {
                            cell_name: self.idx(&cell.name),
                            kind: PhysCellKindMsg::Port,
                        });
                        cell.name.clone()
                    }
                    PhysCellKind::Ordinary => cell.name.clone(),
                };

                let mut other_bels = cell.other_bels.clone();
                let mut pin_map: Vec<&PinMapping> = cell.pin_map.iter().collect();
                if cell.kind == PhysCellKind::Ordinary {
                    for (&obel, other) in &inst.cells {
                        if obel != bel && other.name == cell.name {
                            other_bels.insert(obel);
                            pin_map.extend(other.pin_map.iter());
                        }
                    }
                }

                let pin_map = pin_map
                    .iter()
                    .map(|m| {
                        let mbel_name = st.bels.key(m.bel).clone();
                        let mpin_name = st.bels[m.bel].pins.key(m.bel_pin).clone();
                        let other_cell = m.other_cell.as_ref().map(|oc| OtherCellMsg {
                            name: self.idx(&oc.name),
                            cell_type: self.idx(&oc.cell_type),
                        });
                        PinMappingMsg {
                            bel: self.idx(&mbel_name),
                            bel_pin: self.idx(&mpin_name),
                            cell_pin: self.idx(&m.cell_pin),
                            fixed: m.fixed,
                            other_cell,
                        }
                    })
                    .collect();

                let other_bels = other_bels
                    .iter()
                    .map(|&b| {
                        let name = st.bels.key(b).clone();
                        self.idx(&name)
                    })
                    .collect();

                let cell_type = cell.cell_type.clone();
                placements.push(PlacementMsg {
                    cell_name: self.idx(&cell_name),
                    cell_type: self.idx(&cell_type),
                    site: self.idx(&site_name),
                    bel: Some(self.idx(&bel_name)),
                    bel_fixed: cell.bel_fixed,
                    site_fixed: cell.site_fixed,
                    other_bels,
                    pin_map,
                });
            }
        }
        (placements, phys_cells)
    }

    /// Active site pips whose input wire carries no net: stubs of the null
    /// net.
    fn build_null_net(&mut self) -> Vec<RouteBranchMsg> {
        let mut out = Vec::new();
        for (si, _, inst) in self.design.site_insts.iter() {
            let st = self.device.site_type_of(inst.site);
            for (&(bel, pin), &fixed) in &inst.used_site_pips {
                let wired = st
                    .pin_wire(bel, pin)
                    .is_some_and(|w| inst.wire_nets.contains_key(&w));
                if wired {
                    continue;
                }
                let seg = Seg::SitePip {
                    si,
                    bel,
                    pin,
                    fixed,
                };
                out.push(RouteBranchMsg {
                    segment: self.seg_to_msg(&seg),
                    branches: Vec::new(),
                });
            }
        }
        out
    }

    fn build(mut self) -> PhysNetlistMsg {
        let mut site_insts = Vec::new();
        for (si, _, inst) in self.design.site_insts.iter() {
            let site_name = self.site_name(si).to_string();
            let kind_name = self.device.site_types.key(inst.kind).clone();
            site_insts.push(SiteInstMsg {
                site: self.idx(&site_name),
                kind: self.idx(&kind_name),
            });
        }

        let (placements, phys_cells) = self.build_placements();

        let net_ids: Vec<PhysNetId> = self.design.nets.ids().collect();
        let mut nets = Vec::with_capacity(net_ids.len());
        for net_id in net_ids {
            let net = &self.design.nets[net_id];
            nets.push(self.build_net(net_id, net));
        }

        let null_net = self.build_null_net();

        let mut properties = Vec::new();
        let key = self.idx(DISABLE_AUTO_IO_BUFFERS);
        let value = self.idx(if self.design.auto_io_buffers { "0" } else { "1" });
        properties.push(PropertyMsg { key, value });
        let key = self.idx(OUT_OF_CONTEXT);
        let value = self.idx(if self.design.out_of_context { "1" } else { "0" });
        properties.push(PropertyMsg { key, value });

        PhysNetlistMsg {
            part: self.design.part.clone(),
            strings: self.strings.into_vec(),
            site_insts,
            placements,
            phys_cells,
            nets,
            null_net,
            properties,
        }
    }
}

pub fn design_to_msg(design: &Design, device: &Device) -> PhysNetlistMsg {
    Encoder::new(design, device).build()
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

struct Decoder<'a> {
    msg: &'a PhysNetlistMsg,
    device: &'a Device,
    design: Design,
    strings: StringTable,
    bel_pins: BelPinCache<'a>,
    pips: PipCache<'a>,
    static_count: u32,
}

impl<'a> Decoder<'a> {
    fn new(msg: &'a PhysNetlistMsg, device: &'a Device, netlist: Netlist) -> Self {
        let name = netlist.name.clone();
        Decoder {
            msg,
            device,
            design: Design::new(name, msg.part.clone(), netlist),
            strings: StringTable::from_vec(msg.strings.clone()),
            bel_pins: BelPinCache::new(device),
            pips: PipCache::new(device),
            static_count: 0,
        }
    }

    fn site_by_name(&self, name: &str) -> Result<SiteId> {
        self.device
            .sites
            .get(name)
            .map(|(id, _)| id)
            .ok_or_else(|| InterchangeError::UnknownSite(name.to_string()))
    }

    /// At most one GND and one VCC net, canonically named; no net name may
    /// repeat.
    fn check_net_naming(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let mut found_gnd = false;
        let mut found_vcc = false;
        for net in &self.msg.nets {
            let name = self.strings.get(net.name)?;
            if !seen.insert(name) {
                return Err(InterchangeError::DuplicateNet(name.to_string()));
            }
            match net.kind {
                NetClassMsg::Gnd => {
                    if found_gnd {
                        return Err(InterchangeError::DuplicateConstantNet("GND"));
                    }
                    found_gnd = true;
                    if name != GND_NET {
                        return Err(InterchangeError::BadConstantNetName {
                            class: "GND",
                            name: name.to_string(),
                            expected: GND_NET,
                        });
                    }
                }
                NetClassMsg::Vcc => {
                    if found_vcc {
                        return Err(InterchangeError::DuplicateConstantNet("VCC"));
                    }
                    found_vcc = true;
                    if name != VCC_NET {
                        return Err(InterchangeError::BadConstantNetName {
                            class: "VCC",
                            name: name.to_string(),
                            expected: VCC_NET,
                        });
                    }
                }
                NetClassMsg::Signal => {}
            }
        }
        Ok(())
    }

    fn read_site_insts(&mut self) -> Result<()> {
        if self.msg.site_insts.is_empty() && !self.msg.placements.is_empty() {
            eprintln!(
                "WARNING: no site instance records present; site types will be \
                 inferred from the device"
            );
        }
        for si in &self.msg.site_insts {
            let site_name = self.strings.get(si.site)?.to_string();
            let site = self.site_by_name(&site_name)?;
            let kind_name = self.strings.get(si.kind)?;
            let (kind, _) = self
                .device
                .site_types
                .get(kind_name)
                .ok_or_else(|| InterchangeError::UnknownSiteType(kind_name.to_string()))?;
            self.design.create_site_inst(site_name, site, kind);
        }
        Ok(())
    }

    /// Site instance for a routing segment; on a constant net (or for a
    /// site holding a dedicated constant source) a placeholder instance is
    /// synthesized.
    fn site_inst_or_static(&mut self, site_name: &str, class: NetClass) -> Result<SiteInstId> {
        let site = self.site_by_name(site_name)?;
        if let Some(si) = self.design.site_inst_for_site(site) {
            return Ok(si);
        }
        let kind = self.device.sites[site].kind;
        let has_tied_bel = self.device.site_types[kind]
            .bels
            .values()
            .any(|b| b.tie.is_some());
        if !class.is_static() && !has_tied_bel {
            return Err(InterchangeError::MissingSiteInst {
                site: site_name.to_string(),
                net: match class {
                    NetClass::Signal => "signal".to_string(),
                    NetClass::Gnd => GND_NET.to_string(),
                    NetClass::Vcc => VCC_NET.to_string(),
                },
            });
        }
        let name = format!("{STATIC_SOURCE_PREFIX}{n}", n = self.static_count);
        self.static_count += 1;
        Ok(self.design.create_site_inst(name, site, kind))
    }

    fn read_placements(&mut self) -> Result<()> {
        let mut side: HashMap<&str, PhysCellKindMsg> = HashMap::new();
        for pc in &self.msg.phys_cells {
            side.insert(self.strings.get(pc.cell_name)?, pc.kind);
        }

        for placement in &self.msg.placements {
            let cell_name = self.strings.get(placement.cell_name)?.to_string();
            let cell_type = self.strings.get(placement.cell_type)?.to_string();
            let site_name = self.strings.get(placement.site)?.to_string();
            let site = self.site_by_name(&site_name)?;
            let si = match self.design.site_inst_for_site(site) {
                Some(si) => si,
                None => {
                    let kind = self.device.sites[site].kind;
                    self.design.create_site_inst(site_name.clone(), site, kind)
                }
            };
            let kind = self.design.site_insts[si].kind;
            let st = &self.device.site_types[kind];

            let bel = match placement.bel {
                Some(b) => {
                    let bel_name = self.strings.get(b)?;
                    Some(
                        st.get_bel(bel_name)
                            .map(|(id, _)| id)
                            .ok_or_else(|| InterchangeError::UnknownBel {
                                site: site_name.clone(),
                                bel: bel_name.to_string(),
                            })?,
                    )
                }
                None => None,
            };

            let kind_tag = side.get(cell_name.as_str()).copied();
            if kind_tag.is_none() {
                // ordinary placement: pair with the logical instance, or
                // synthesize one so reconstruction never blocks
                if self
                    .device
                    .prim_lib
                    .get_cell(MACROS_LIBRARY, &cell_type)
                    .is_some()
                {
                    return Err(InterchangeError::MacroPlacement {
                        inst: cell_name,
                        cell_type,
                    });
                }
                match self.design.netlist.find_inst_by_hier_name(&cell_name) {
                    Some(iid) => {
                        let type_name =
                            &self.design.netlist.cells[self.design.netlist.insts[iid].cell].name;
                        if *type_name != cell_type {
                            eprintln!(
                                "WARNING: placement for {cell_name} has type {cell_type}, \
                                 but the logical instance is of type {type_name}"
                            );
                        }
                    }
                    None => {
                        let netlist = &mut self.design.netlist;
                        let cell = match netlist.find_cell(&cell_type) {
                            Some(c) => c,
                            None => {
                                let lib = netlist.library("work");
                                netlist.add_cell(lib, cell_type.clone(), "netlist")
                            }
                        };
                        netlist.insts.push(Instance {
                            name: cell_name.clone(),
                            cell,
                            view: "netlist".to_string(),
                            properties: Default::default(),
                        });
                    }
                }
            }

            let Some(bel) = bel else {
                if kind_tag == Some(PhysCellKindMsg::Locked) {
                    self.design.site_insts[si].locked = true;
                }
                continue;
            };

            let mut other_bels = std::collections::BTreeSet::new();
            for &ob in &placement.other_bels {
                let ob_name = self.strings.get(ob)?;
                let (ob_id, _) = self.device.site_types[kind]
                    .get_bel(ob_name)
                    .ok_or_else(|| InterchangeError::UnknownBel {
                        site: site_name.clone(),
                        bel: ob_name.to_string(),
                    })?;
                other_bels.insert(ob_id);
            }

            match kind_tag {
                Some(PhysCellKindMsg::Locked) => {
                    self.design.site_insts[si].locked = true;
                    if self.design.cell(si, bel).is_none() {
                        let mut cell = PlacedCell::new(LOCKED_CELL, &cell_type);
                        cell.kind = PhysCellKind::Locked;
                        cell.bel_fixed = placement.bel_fixed;
                        self.design.place_cell(si, bel, cell);
                    }
                }
                Some(PhysCellKindMsg::Port) => {
                    let mut cell = PlacedCell::new(&cell_name, PORT_CELL_TYPE);
                    cell.kind = PhysCellKind::Port;
                    cell.bel_fixed = placement.bel_fixed;
                    cell.site_fixed = placement.site_fixed;
                    self.design.place_cell(si, bel, cell);
                }
                None => {
                    if self.device.site_types[kind].bels[bel].tie.is_some() {
                        return Err(InterchangeError::PlacementOnTiedBel {
                            site: site_name.clone(),
                            bel: st.bels.key(bel).clone(),
                        });
                    }
                    if let Some(existing) = self.design.cell(si, bel) {
                        return Err(InterchangeError::ConflictingPlacement {
                            cell: cell_name,
                            site: site_name.clone(),
                            bel: self.device.site_types[kind].bels.key(bel).clone(),
                            existing: existing.name.clone(),
                        });
                    }
                    let mut cell = PlacedCell::new(&cell_name, &cell_type);
                    cell.bel_fixed = placement.bel_fixed;
                    cell.site_fixed = placement.site_fixed;
                    cell.other_bels = other_bels.clone();
                    self.design.place_cell(si, bel, cell);
                }
            }

            for pm in &placement.pin_map {
                let (mbel, mpin) =
                    self.bel_pins
                        .get(&self.strings, kind, &site_name, pm.bel, pm.bel_pin)?;
                let cell_pin = self.strings.get(pm.cell_pin)?.to_string();
                let other_cell = match &pm.other_cell {
                    Some(oc) => Some(OtherCell {
                        name: self.strings.get(oc.name)?.to_string(),
                        cell_type: self.strings.get(oc.cell_type)?.to_string(),
                    }),
                    None => None,
                };
                let mapping = PinMapping {
                    bel: mbel,
                    bel_pin: mpin,
                    cell_pin,
                    fixed: pm.fixed,
                    other_cell,
                };
                if mbel == bel {
                    let target = self.design.site_insts[si].cells.get_mut(&bel).unwrap();
                    if mapping.other_cell.is_some() {
                        target.routethru = true;
                    }
                    target.pin_map.push(mapping);
                } else if self.design.cell(si, mbel).is_some() {
                    let target = self.design.site_insts[si].cells.get_mut(&mbel).unwrap();
                    if mapping.other_cell.is_some() {
                        target.routethru = true;
                    }
                    target.pin_map.push(mapping);
                } else if other_bels.contains(&mbel) {
                    // a secondary leg of this cell; materialize it
                    let mut leg = PlacedCell::new(&cell_name, &cell_type);
                    leg.routethru = true;
                    leg.pin_map.push(mapping);
                    self.design.place_cell(si, mbel, leg);
                } else {
                    let st = &self.device.site_types[kind];
                    return Err(InterchangeError::MissingOtherBel {
                        bel: st.bels.key(mbel).clone(),
                        bel_pin: st.bels[mbel].pins.key(mpin).clone(),
                        cell_pin: self.strings.get(pm.cell_pin)?.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Every placed leg of a macro instance implies all of the macro's
    /// required legs are placed.
    fn check_macros(&self) -> Result<()> {
        let Some((_, macros)) = self.device.prim_lib.libraries.get(MACROS_LIBRARY) else {
            return Ok(());
        };
        let mut checked: HashSet<&str> = HashSet::new();
        for name in self.design.cells_by_name.keys() {
            let Some(slash) = name.rfind('/') else { continue };
            let parent_path = &name[..slash];
            if !checked.insert(parent_path) {
                continue;
            }
            let Some(iid) = self.design.netlist.find_inst_by_hier_name(parent_path) else {
                continue;
            };
            let parent_type = &self.design.netlist.cells[self.design.netlist.insts[iid].cell];
            let Some(&macro_cell) = macros.cells.get(&parent_type.name) else {
                continue;
            };
            if parent_type.name == MACRO_EXEMPT_FROM_COMPLETENESS {
                continue;
            }
            let mut missing = Vec::new();
            for (leaf_path, leaf_inst) in self.device.prim_lib.leaf_insts_of(macro_cell) {
                let leaf_type =
                    &self.device.prim_lib.cells[self.device.prim_lib.insts[leaf_inst].cell].name;
                if leaf_type == "VCC" || leaf_type == "GND" {
                    continue;
                }
                let full = format!("{parent_path}/{leaf_path}");
                if !self.design.cells_by_name.contains_key(&full) {
                    missing.push(leaf_path);
                }
            }
            if !missing.is_empty() {
                return Err(InterchangeError::MacroNotFullyPlaced {
                    inst: parent_path.to_string(),
                    missing,
                });
            }
        }
        Ok(())
    }

    fn read_branch(&mut self, branch: &RouteBranchMsg, net: PhysNetId, class: NetClass) -> Result<()> {
        match branch.segment {
            SegmentMsg::Pip {
                tile,
                wire0,
                wire1,
                forward,
                fixed,
            } => {
                let tile_name = self.strings.get(tile)?;
                let (tid, _) = self
                    .device
                    .tiles
                    .get(tile_name)
                    .ok_or_else(|| InterchangeError::UnknownTile(tile_name.to_string()))?;
                let (pip, _) = self.pips.get(&self.strings, tid, wire0, wire1)?;
                self.design.nets[net].pips.push(PlacedPip {
                    tile: tid,
                    pip,
                    forward,
                    fixed,
                });
            }
            SegmentMsg::BelPin { site, bel, pin } => {
                let site_name = self.strings.get(site)?.to_string();
                let si = self.site_inst_or_static(&site_name, class)?;
                let kind = self.design.site_insts[si].kind;
                let (bel, pin) = self
                    .bel_pins
                    .get(&self.strings, kind, &site_name, bel, pin)?;
                if let Some(wire) = self.device.site_types[kind].pin_wire(bel, pin) {
                    if !self.design.site_insts[si].route_site_wire(wire, net) {
                        eprintln!(
                            "WARNING: net {name} visits site wire already claimed by \
                             another net in site {site_name}",
                            name = self.design.nets.key(net),
                        );
                    }
                }
            }
            SegmentMsg::SitePip {
                site,
                bel,
                pin,
                fixed,
            } => {
                let site_name = self.strings.get(site)?.to_string();
                let si = self.site_inst_or_static(&site_name, class)?;
                let kind = self.design.site_insts[si].kind;
                let (bel, pin) = self
                    .bel_pins
                    .get(&self.strings, kind, &site_name, bel, pin)?;
                self.design.site_insts[si].add_site_pip((bel, pin), fixed);
            }
            SegmentMsg::SitePin { site, pin } => {
                let site_name = self.strings.get(site)?.to_string();
                let si = self.site_inst_or_static(&site_name, class)?;
                let kind = self.design.site_insts[si].kind;
                let pin_name = self.strings.get(pin)?;
                let (pin, _) = self.device.site_types[kind].pins.get(pin_name).ok_or_else(
                    || InterchangeError::UnknownSitePin {
                        site: site_name.clone(),
                        pin: pin_name.to_string(),
                    },
                )?;
                self.design.nets[net].pins.push(SitePinRef { site_inst: si, pin });
            }
        }
        for child in &branch.branches {
            self.read_branch(child, net, class)?;
        }
        Ok(())
    }

    fn read_routing(&mut self) -> Result<()> {
        for nm in &self.msg.nets {
            let name = self.strings.get(nm.name)?.to_string();
            let class: NetClass = nm.kind.into();
            let net = self.design.add_net(name, class);
            for branch in nm.sources.iter().chain(nm.stubs.iter()) {
                self.read_branch(branch, net, class)?;
            }
            for sn in &nm.stub_nodes {
                let tile_name = self.strings.get(sn.tile)?;
                let (tid, tile) = self
                    .device
                    .tiles
                    .get(tile_name)
                    .ok_or_else(|| InterchangeError::UnknownTile(tile_name.to_string()))?;
                let wire_name = self.strings.get(sn.wire)?;
                let wire = self.device.tile_types[tile.kind]
                    .get_wire(wire_name)
                    .ok_or_else(|| InterchangeError::UnknownWire {
                        tile: tile_name.to_string(),
                        wire: wire_name.to_string(),
                    })?;
                self.design.nets[net].stub_nodes.push(StubNode {
                    tile: tid,
                    wire,
                    fixed: sn.fixed,
                });
            }
        }
        Ok(())
    }

    fn read_null_net(&mut self) -> Result<()> {
        for stub in &self.msg.null_net {
            let SegmentMsg::SitePip {
                site,
                bel,
                pin,
                fixed,
            } = stub.segment
            else {
                eprintln!("WARNING: null net stub is not a site pip; ignored");
                continue;
            };
            let site_name = self.strings.get(site)?.to_string();
            let site_id = self.site_by_name(&site_name)?;
            let si = match self.design.site_inst_for_site(site_id) {
                Some(si) => si,
                None => {
                    let kind = self.device.sites[site_id].kind;
                    self.design
                        .create_site_inst(site_name.clone(), site_id, kind)
                }
            };
            let kind = self.design.site_insts[si].kind;
            let (bel, pin) = self
                .bel_pins
                .get(&self.strings, kind, &site_name, bel, pin)?;
            self.design.site_insts[si].add_site_pip((bel, pin), fixed);
        }
        Ok(())
    }

    fn read_properties(&mut self) -> Result<()> {
        for prop in &self.msg.properties {
            let key = self.strings.get(prop.key)?;
            let value = self.strings.get(prop.value)?;
            if key == DISABLE_AUTO_IO_BUFFERS {
                self.design.auto_io_buffers = value == "0";
            } else if key == OUT_OF_CONTEXT {
                self.design.out_of_context = value == "1";
            }
        }
        Ok(())
    }

    fn run(mut self) -> Result<Design> {
        self.check_net_naming()?;
        self.read_site_insts()?;
        self.read_placements()?;
        self.check_macros()?;
        self.read_null_net()?;
        self.read_routing()?;
        self.read_properties()?;
        Ok(self.design)
    }
}

/// Decodes a physical netlist message against a device and its logical
/// netlist. The netlist is consumed; decoded physical state refers to it.
pub fn msg_to_design(msg: &PhysNetlistMsg, device: &Device, netlist: Netlist) -> Result<Design> {
    Decoder::new(msg, device, netlist).run()
}

pub fn write_design(
    design: &Design,
    device: &Device,
    path: impl AsRef<std::path::Path>,
    opts: WireOptions,
) -> Result<()> {
    wire::write_message(path, &design_to_msg(design, device), opts)
}

pub fn read_design(
    path: impl AsRef<std::path::Path>,
    device: &Device,
    netlist: Netlist,
    opts: WireOptions,
) -> Result<Design> {
    let msg: PhysNetlistMsg = wire::read_message(path, opts)?;
    msg_to_design(&msg, device, netlist)
}
