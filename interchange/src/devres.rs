//! Device-resources codec: the static device description (tile and site
//! types, the tile grid, nodes, constant ties, and the primitive/macro cell
//! library) in wire form, plus the verification gate run after regenerating
//! a device image.

use bincode::{Decode, Encode};
use fabric_device::{
    BelClass, Device, PinDir, PipDef, SitePinDef, TieValue, TileId, TtWireId,
};
use fabric_netlist::PRIMITIVES_LIBRARY;
use unnamed_entity::{EntityId, entity_id};

use crate::constants::{self, ConstantsMsg, WireConstantsMsg};
use crate::error::{InterchangeError, Result};
use crate::logical::{self, LogNetlistMsg};
use crate::table::{PairTable, StringTable};
use crate::wire::{self, WireOptions};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub enum PinDirMsg {
    Input,
    Output,
    Bidir,
}

impl From<PinDir> for PinDirMsg {
    fn from(d: PinDir) -> Self {
        match d {
            PinDir::Input => PinDirMsg::Input,
            PinDir::Output => PinDirMsg::Output,
            PinDir::Bidir => PinDirMsg::Bidir,
        }
    }
}

impl From<PinDirMsg> for PinDir {
    fn from(d: PinDirMsg) -> Self {
        match d {
            PinDirMsg::Input => PinDir::Input,
            PinDirMsg::Output => PinDir::Output,
            PinDirMsg::Bidir => PinDir::Bidir,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub enum BelClassMsg {
    Logic,
    Routing,
    Port,
}

impl From<BelClass> for BelClassMsg {
    fn from(c: BelClass) -> Self {
        match c {
            BelClass::Logic => BelClassMsg::Logic,
            BelClass::Routing => BelClassMsg::Routing,
            BelClass::Port => BelClassMsg::Port,
        }
    }
}

impl From<BelClassMsg> for BelClass {
    fn from(c: BelClassMsg) -> Self {
        match c {
            BelClassMsg::Logic => BelClass::Logic,
            BelClassMsg::Routing => BelClass::Routing,
            BelClassMsg::Port => BelClass::Port,
        }
    }
}

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct BelPinMsg {
    pub name: u32,
    pub dir: PinDirMsg,
    /// Site wire, as a position in the enclosing site type's wire list.
    pub wire: Option<u32>,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct BelMsg {
    pub name: u32,
    pub class: BelClassMsg,
    pub tie: Option<constants::TieMsg>,
    pub pins: Vec<BelPinMsg>,
}

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct SitePinMsg {
    pub name: u32,
    /// Backing port bel, as a position in the bel list.
    pub bel: u32,
    pub dir: PinDirMsg,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct SiteTypeMsg {
    pub name: u32,
    pub wires: Vec<u32>,
    pub bels: Vec<BelMsg>,
    pub pins: Vec<SitePinMsg>,
}

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct PipMsg {
    pub wire0: u32,
    pub wire1: u32,
    pub directional: bool,
    pub buffered: bool,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct TileTypeMsg {
    pub name: u32,
    pub wires: Vec<u32>,
    pub pips: Vec<PipMsg>,
    pub constants: Vec<WireConstantsMsg>,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct SiteMsg {
    pub name: u32,
    /// Position in the site-type table.
    pub kind: u32,
    /// Tile wire bound to each site pin, in site-type pin order.
    pub pin_wires: Vec<Option<u32>>,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct TileMsg {
    pub name: u32,
    /// Position in the tile-type table.
    pub kind: u32,
    pub row: u16,
    pub col: u16,
    pub sites: Vec<SiteMsg>,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct NodeMsg {
    /// (tile table position, wire position within the tile's type) pairs;
    /// the first is the node's canonical wire.
    pub wires: Vec<(u32, u32)>,
    pub tie: Option<constants::TieMsg>,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct DeviceResourcesMsg {
    pub name: String,
    pub strings: Vec<String>,
    pub site_types: Vec<SiteTypeMsg>,
    pub tile_types: Vec<TileTypeMsg>,
    pub tiles: Vec<TileMsg>,
    pub nodes: Vec<NodeMsg>,
    pub constants: ConstantsMsg,
    /// Primitive and macro cell library, as an embedded logical netlist.
    pub prim_lib: LogNetlistMsg,
    /// Primitive name -> overriding macro cell name.
    pub macro_expansions: Vec<(u32, u32)>,
}

pub fn device_to_msg(dev: &Device) -> DeviceResourcesMsg {
    let mut strings = StringTable::new();
    let idx = |strings: &mut StringTable, s: &str| strings.index_of(s).to_idx() as u32;

    let mut site_types = Vec::with_capacity(dev.site_types.len());
    for (_, st_name, st) in dev.site_types.iter() {
        let wires = st
            .wires
            .iter()
            .map(|(_, name, _)| idx(&mut strings, name))
            .collect();
        let bels = st
            .bels
            .iter()
            .map(|(_, bel_name, bel)| BelMsg {
                name: idx(&mut strings, bel_name),
                class: bel.class.into(),
                tie: bel.tie.map(Into::into),
                pins: bel
                    .pins
                    .iter()
                    .map(|(_, pin_name, pin)| BelPinMsg {
                        name: idx(&mut strings, pin_name),
                        dir: pin.dir.into(),
                        wire: pin.wire.map(|w| w.to_idx() as u32),
                    })
                    .collect(),
            })
            .collect();
        let pins = st
            .pins
            .iter()
            .map(|(_, pin_name, def)| SitePinMsg {
                name: idx(&mut strings, pin_name),
                bel: def.bel.to_idx() as u32,
                dir: def.dir.into(),
            })
            .collect();
        site_types.push(SiteTypeMsg {
            name: idx(&mut strings, st_name),
            wires,
            bels,
            pins,
        });
    }

    let mut tile_types = Vec::with_capacity(dev.tile_types.len());
    for (tt_id, tt_name, tt) in dev.tile_types.iter() {
        let wires = tt.wires.values().map(|w| idx(&mut strings, w)).collect();
        let pips = tt
            .pips
            .iter()
            .map(|(_, &(w0, w1), def)| PipMsg {
                wire0: w0.to_idx() as u32,
                wire1: w1.to_idx() as u32,
                directional: def.directional,
                buffered: def.buffered,
            })
            .collect();
        tile_types.push(TileTypeMsg {
            name: idx(&mut strings, tt_name),
            wires,
            pips,
            constants: constants::tile_wire_constants(&dev.constants, tt_id),
        });
    }

    let mut tiles = Vec::with_capacity(dev.tiles.len());
    for (_, tile_name, tile) in dev.tiles.iter() {
        let sites = tile
            .sites
            .iter()
            .map(|&sid| {
                let site = &dev.sites[sid];
                let st = &dev.site_types[site.kind];
                let pin_wires = st
                    .pins
                    .ids()
                    .map(|pin| site.pin_wires.get(pin).map(|w| w.to_idx() as u32))
                    .collect();
                SiteMsg {
                    name: idx(&mut strings, dev.sites.key(sid)),
                    kind: site.kind.to_idx() as u32,
                    pin_wires,
                }
            })
            .collect();
        tiles.push(TileMsg {
            name: idx(&mut strings, tile_name),
            kind: tile.kind.to_idx() as u32,
            row: tile.row,
            col: tile.col,
            sites,
        });
    }

    let nodes = dev
        .nodes
        .values()
        .map(|node| NodeMsg {
            wires: node
                .wires
                .iter()
                .map(|&(tile, wire)| (tile.to_idx() as u32, wire.to_idx() as u32))
                .collect(),
            tie: node.tie.map(Into::into),
        })
        .collect();

    let constants = constants::ties_to_msg(dev, &dev.constants, &mut strings);

    let macro_expansions = dev
        .macro_expansions
        .iter()
        .map(|(prim, mac)| {
            let prim = idx(&mut strings, prim);
            let mac = idx(&mut strings, mac);
            (prim, mac)
        })
        .collect();

    DeviceResourcesMsg {
        name: dev.name.clone(),
        strings: strings.into_vec(),
        site_types,
        tile_types,
        tiles,
        nodes,
        constants,
        prim_lib: logical::netlist_to_msg(&dev.prim_lib),
        macro_expansions,
    }
}

entity_id! {
    id NodeWireKeyId u32;
}

pub fn msg_to_device(msg: &DeviceResourcesMsg) -> Result<Device> {
    let strings = StringTable::from_vec(msg.strings.clone());
    let mut dev = Device::new(msg.name.clone());

    for stm in &msg.site_types {
        let st_name = strings.get(stm.name)?.to_string();
        let st_id = dev.site_type(&st_name);
        let st = &mut dev.site_types[st_id];
        let mut wire_names = Vec::with_capacity(stm.wires.len());
        for &w in &stm.wires {
            let name = strings.get(w)?.to_string();
            st.site_wire(&name);
            wire_names.push(name);
        }
        for bm in &stm.bels {
            let bel_name = strings.get(bm.name)?.to_string();
            let bel = st.add_bel(&bel_name, bm.class.into(), bm.tie.map(Into::into));
            for pm in &bm.pins {
                let pin_name = strings.get(pm.name)?.to_string();
                let wire = match pm.wire {
                    Some(w) => Some(wire_names.get(w as usize).map(String::as_str).ok_or(
                        InterchangeError::DanglingIndex {
                            kind: "site wire",
                            index: w,
                            len: wire_names.len(),
                        },
                    )?),
                    None => None,
                };
                st.add_bel_pin(bel, &pin_name, pm.dir.into(), wire);
            }
        }
        for pm in &stm.pins {
            let pin_name = strings.get(pm.name)?.to_string();
            let bel_idx = pm.bel as usize;
            if bel_idx >= st.bels.len() {
                return Err(InterchangeError::DanglingIndex {
                    kind: "bel",
                    index: pm.bel,
                    len: st.bels.len(),
                });
            }
            st.pins.insert_new(
                pin_name,
                SitePinDef {
                    bel: fabric_device::BelSlotId::from_idx(bel_idx),
                    dir: pm.dir.into(),
                },
            );
        }
    }

    for ttm in &msg.tile_types {
        let tt_name = strings.get(ttm.name)?.to_string();
        let tt_id = dev.tile_type(&tt_name);
        {
            let tt = &mut dev.tile_types[tt_id];
            for &w in &ttm.wires {
                let name = strings.get(w)?;
                tt.wire(name);
            }
        }
        let wire_count = dev.tile_types[tt_id].wires.len();
        let check_wire = |w: u32| -> Result<TtWireId> {
            if (w as usize) < wire_count {
                Ok(TtWireId::from_idx(w as usize))
            } else {
                Err(InterchangeError::DanglingIndex {
                    kind: "tile wire",
                    index: w,
                    len: wire_count,
                })
            }
        };
        for pm in &ttm.pips {
            let w0 = check_wire(pm.wire0)?;
            let w1 = check_wire(pm.wire1)?;
            dev.tile_types[tt_id].add_pip(
                w0,
                w1,
                PipDef {
                    directional: pm.directional,
                    buffered: pm.buffered,
                },
            );
        }
        for wc in &ttm.constants {
            let tie: TieValue = wc.tie.into();
            for &w in &wc.wires {
                let wire = check_wire(w)?;
                match tie {
                    TieValue::Gnd => dev.constants.gnd_wires.insert((tt_id, wire)),
                    TieValue::Vcc => dev.constants.vcc_wires.insert((tt_id, wire)),
                };
            }
        }
    }

    for tm in &msg.tiles {
        let tile_name = strings.get(tm.name)?.to_string();
        let kind_idx = tm.kind as usize;
        if kind_idx >= dev.tile_types.len() {
            return Err(InterchangeError::DanglingIndex {
                kind: "tile type",
                index: tm.kind,
                len: dev.tile_types.len(),
            });
        }
        let kind = fabric_device::TileTypeId::from_idx(kind_idx);
        let tile = dev.add_tile(&tile_name, kind, tm.row, tm.col);
        for sm in &tm.sites {
            let site_name = strings.get(sm.name)?.to_string();
            let st_idx = sm.kind as usize;
            if st_idx >= dev.site_types.len() {
                return Err(InterchangeError::DanglingIndex {
                    kind: "site type",
                    index: sm.kind,
                    len: dev.site_types.len(),
                });
            }
            let st_id = fabric_device::SiteTypeId::from_idx(st_idx);
            let site = dev.add_site(&site_name, tile, st_id);
            let pin_count = dev.site_types[st_id].pins.len();
            if sm.pin_wires.len() != pin_count {
                return Err(InterchangeError::DeviceMismatch(format!(
                    "site {site_name} has {got} pin bindings, its type has {pin_count} pins",
                    got = sm.pin_wires.len(),
                )));
            }
            let tt_wires = dev.tile_types[kind].wires.len();
            for (i, &pw) in sm.pin_wires.iter().enumerate() {
                let Some(w) = pw else { continue };
                if w as usize >= tt_wires {
                    return Err(InterchangeError::DanglingIndex {
                        kind: "tile wire",
                        index: w,
                        len: tt_wires,
                    });
                }
                dev.bind_site_pin(
                    site,
                    fabric_device::SitePinId::from_idx(i),
                    TtWireId::from_idx(w as usize),
                );
            }
        }
    }

    // rebuild nodes, rejecting duplicate (tile, wire) membership
    let mut seen: PairTable<NodeWireKeyId> = PairTable::new();
    for nm in &msg.nodes {
        let mut wires = Vec::with_capacity(nm.wires.len());
        for &(t, w) in &nm.wires {
            let t_idx = t as usize;
            if t_idx >= dev.tiles.len() {
                return Err(InterchangeError::DanglingIndex {
                    kind: "tile",
                    index: t,
                    len: dev.tiles.len(),
                });
            }
            let tile = TileId::from_idx(t_idx);
            let wire_count = dev.tile_types[dev.tiles[tile].kind].wires.len();
            if w as usize >= wire_count {
                return Err(InterchangeError::DanglingIndex {
                    kind: "tile wire",
                    index: w,
                    len: wire_count,
                });
            }
            let (_, fresh) = seen.insert(t, w);
            if !fresh {
                return Err(InterchangeError::DeviceMismatch(format!(
                    "wire {w} of tile {tile} belongs to two nodes",
                    tile = dev.tiles.key(tile),
                )));
            }
            wires.push((tile, TtWireId::from_idx(w as usize)));
        }
        if wires.is_empty() {
            return Err(InterchangeError::DeviceMismatch(
                "node with no wires".to_string(),
            ));
        }
        dev.add_node(&wires, nm.tie.map(Into::into));
    }

    dev.prim_lib = logical::msg_to_netlist(&msg.prim_lib)?;
    if !dev.prim_lib.cells.is_empty()
        && dev.prim_lib.libraries.get(PRIMITIVES_LIBRARY).is_none()
    {
        return Err(InterchangeError::MissingLibrary(
            PRIMITIVES_LIBRARY.to_string(),
        ));
    }

    for &(prim, mac) in &msg.macro_expansions {
        dev.macro_expansions.insert(
            strings.get(prim)?.to_string(),
            strings.get(mac)?.to_string(),
        );
    }

    let partial = constants::ties_from_msg(&dev, &msg.constants, &strings)?;
    dev.constants.gnd_bels = partial.gnd_bels;
    dev.constants.vcc_bels = partial.vcc_bels;
    dev.constants.gnd_node_exceptions = partial.gnd_node_exceptions;
    dev.constants.vcc_node_exceptions = partial.vcc_node_exceptions;
    dev.constants.cell_pin_defaults = partial.cell_pin_defaults;
    dev.constants.best_constant = partial.best_constant;
    dev.constants.gnd_cell = partial.gnd_cell;
    dev.constants.vcc_cell = partial.vcc_cell;
    dev.constants.gnd_net = partial.gnd_net;
    dev.constants.vcc_net = partial.vcc_net;

    if let Some(desc) = dev.constants.find_ambiguous(&dev) {
        return Err(InterchangeError::AmbiguousTie(desc));
    }

    Ok(dev)
}

/// Cross-checks a freshly produced device image against the live device
/// model it was generated from: structural tables must match and the
/// constant-tie gate must pass.
pub fn verify_device(dev: &Device, msg: &DeviceResourcesMsg) -> Result<()> {
    let decoded = msg_to_device(msg)?;

    if decoded.name != dev.name {
        return Err(InterchangeError::DeviceMismatch(format!(
            "device name {decoded} != {live}",
            decoded = decoded.name,
            live = dev.name,
        )));
    }
    let counts = [
        ("site types", decoded.site_types.len(), dev.site_types.len()),
        ("tile types", decoded.tile_types.len(), dev.tile_types.len()),
        ("tiles", decoded.tiles.len(), dev.tiles.len()),
        ("sites", decoded.sites.len(), dev.sites.len()),
        ("nodes", decoded.nodes.len(), dev.nodes.len()),
    ];
    for (what, got, want) in counts {
        if got != want {
            return Err(InterchangeError::DeviceMismatch(format!(
                "{what}: {got} decoded, {want} in the device model"
            )));
        }
    }
    for (_, name, _) in decoded.tiles.iter() {
        if dev.tiles.get(name).is_none() {
            return Err(InterchangeError::DeviceMismatch(format!(
                "tile {name} not in the device model"
            )));
        }
    }
    for ((_, node), (_, live)) in decoded.nodes.iter().zip(dev.nodes.iter()) {
        if node.tie != live.tie || node.wires.len() != live.wires.len() {
            return Err(InterchangeError::DeviceMismatch(
                "node table differs from the device model".to_string(),
            ));
        }
    }

    constants::verify_ties(dev, &decoded.constants)
}

pub fn write_device(
    dev: &Device,
    path: impl AsRef<std::path::Path>,
    opts: WireOptions,
) -> Result<()> {
    wire::write_message(path, &device_to_msg(dev), opts)
}

pub fn read_device(path: impl AsRef<std::path::Path>, opts: WireOptions) -> Result<Device> {
    let msg: DeviceResourcesMsg = wire::read_message(path, opts)?;
    msg_to_device(&msg)
}
