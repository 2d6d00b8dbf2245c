//! Logical netlist codec.
//!
//! The wire form is a set of flat tables — strings, cells, ports, instances
//! — linked purely by integer indices, so the hierarchical netlist can be
//! serialized without following reference cycles. Encode enumerates every
//! reachable object into index tables first, then emits records; decode
//! resolves cells recursively with memoization, since the cell table has no
//! guaranteed topological order.

use bincode::{Decode, Encode};
use fabric_netlist::{
    BusRange, CellId, InstId, Net, Netlist, Port, PortDirection, PortId, PortRef, PropertyMap,
    PropertyValue, TopDesign,
};
use rayon::prelude::*;
use unnamed_entity::{EntityId, EntitySet, entity_id};

use crate::error::{InterchangeError, Result};
use crate::table::{StringTable, SyncStringTable};
use crate::wire::{self, WireOptions};

pub const PROP_TAG_TEXT: u8 = 0;
pub const PROP_TAG_INT: u8 = 1;
pub const PROP_TAG_BOOL: u8 = 2;

/// A property entry with an explicitly tagged value. The tag is kept as a
/// raw byte so that an unrecognized value kind surfaces as a descriptive
/// decode error rather than a codec failure.
#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct PropEntryMsg {
    pub key: u32,
    pub tag: u8,
    pub num: i64,
    pub text: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub enum PortDirMsg {
    Input,
    Output,
    Inout,
}

impl From<PortDirection> for PortDirMsg {
    fn from(dir: PortDirection) -> Self {
        match dir {
            PortDirection::Input => PortDirMsg::Input,
            PortDirection::Output => PortDirMsg::Output,
            PortDirection::Inout => PortDirMsg::Inout,
        }
    }
}

impl From<PortDirMsg> for PortDirection {
    fn from(dir: PortDirMsg) -> Self {
        match dir {
            PortDirMsg::Input => PortDirection::Input,
            PortDirMsg::Output => PortDirection::Output,
            PortDirMsg::Inout => PortDirection::Inout,
        }
    }
}

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct BusMsg {
    pub left: u32,
    pub right: u32,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct PortMsg {
    pub name: u32,
    pub dir: PortDirMsg,
    pub bus: Option<BusMsg>,
    pub props: Vec<PropEntryMsg>,
}

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct NetEndMsg {
    pub port: u32,
    /// Absent for a connection to the containing cell's own port.
    pub inst: Option<u32>,
    pub bus_bit: Option<u32>,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct NetMsg {
    pub name: u32,
    pub props: Vec<PropEntryMsg>,
    pub endpoints: Vec<NetEndMsg>,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct CellMsg {
    pub name: u32,
    pub view: u32,
    pub library: u32,
    pub props: Vec<PropEntryMsg>,
    pub ports: Vec<u32>,
    pub insts: Vec<u32>,
    pub nets: Vec<NetMsg>,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct InstMsg {
    pub name: u32,
    pub cell: u32,
    pub view: u32,
    pub props: Vec<PropEntryMsg>,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct TopMsg {
    pub cell: u32,
    pub inst_name: u32,
    pub props: Vec<PropEntryMsg>,
}

#[derive(Clone, Debug, Encode, Decode)]
pub struct LogNetlistMsg {
    pub name: String,
    pub strings: Vec<String>,
    pub cells: Vec<CellMsg>,
    pub ports: Vec<PortMsg>,
    pub insts: Vec<InstMsg>,
    pub top: Option<TopMsg>,
    pub props: Vec<PropEntryMsg>,
}

entity_id! {
    id WCellId u32;
    id WPortId u32;
    id WInstId u32;
}

struct Encoder<'a> {
    netlist: &'a Netlist,
    strings: StringTable,
    cells: EntitySet<WCellId, CellId>,
    ports: EntitySet<WPortId, PortId>,
    insts: EntitySet<WInstId, InstId>,
}

impl<'a> Encoder<'a> {
    fn new(netlist: &'a Netlist, strings: StringTable) -> Self {
        Encoder {
            netlist,
            strings,
            cells: EntitySet::new(),
            ports: EntitySet::new(),
            insts: EntitySet::new(),
        }
    }

    /// Enumerates all cells, ports and instances in export order, breaking
    /// the cyclic references in the netlist into stable indices.
    fn enumerate(&mut self) {
        for lib in self.netlist.libraries.values() {
            for &cid in lib.cells.values() {
                self.cells.insert(cid);
                let cell = &self.netlist.cells[cid];
                for &pid in &cell.ports {
                    self.ports.insert(pid);
                }
                for &iid in &cell.insts {
                    self.insts.insert(iid);
                }
            }
        }
    }

    fn props(&mut self, props: &PropertyMap) -> Vec<PropEntryMsg> {
        props
            .iter()
            .map(|(key, value)| {
                let key = self.strings.index_of(key).to_idx() as u32;
                match value {
                    PropertyValue::Text(text) => PropEntryMsg {
                        key,
                        tag: PROP_TAG_TEXT,
                        num: 0,
                        text: self.strings.index_of(text).to_idx() as u32,
                    },
                    PropertyValue::Int(i) => PropEntryMsg {
                        key,
                        tag: PROP_TAG_INT,
                        num: *i as i64,
                        text: 0,
                    },
                    PropertyValue::Bool(b) => PropEntryMsg {
                        key,
                        tag: PROP_TAG_BOOL,
                        num: *b as i64,
                        text: 0,
                    },
                }
            })
            .collect()
    }

    fn str_idx(&mut self, s: &str) -> u32 {
        self.strings.index_of(s).to_idx() as u32
    }

    fn build(mut self) -> LogNetlistMsg {
        self.enumerate();

        let mut cells = Vec::with_capacity(self.cells.len());
        for cid in self.cells.values().copied().collect::<Vec<_>>() {
            let cell = &self.netlist.cells[cid];
            let name = self.str_idx(&cell.name);
            let view = self.str_idx(&cell.view);
            let library = self.str_idx(self.netlist.libraries.key(cell.library));
            let props = self.props(&cell.properties);
            let ports = cell
                .ports
                .iter()
                .map(|&pid| self.ports.get(&pid).unwrap().to_idx() as u32)
                .collect();
            let insts = cell
                .insts
                .iter()
                .map(|&iid| self.insts.get(&iid).unwrap().to_idx() as u32)
                .collect();
            let nets = cell
                .nets
                .iter()
                .map(|net| {
                    let name = self.str_idx(&net.name);
                    let props = self.props(&net.properties);
                    let endpoints = net
                        .endpoints
                        .iter()
                        .map(|ep| NetEndMsg {
                            port: self.ports.get(&ep.port).unwrap().to_idx() as u32,
                            inst: ep.inst.map(|iid| self.insts.get(&iid).unwrap().to_idx() as u32),
                            bus_bit: ep.bus_bit,
                        })
                        .collect();
                    NetMsg {
                        name,
                        props,
                        endpoints,
                    }
                })
                .collect();
            cells.push(CellMsg {
                name,
                view,
                library,
                props,
                ports,
                insts,
                nets,
            });
        }

        let mut ports = Vec::with_capacity(self.ports.len());
        for pid in self.ports.values().copied().collect::<Vec<_>>() {
            let port = &self.netlist.ports[pid];
            ports.push(PortMsg {
                name: self.str_idx(&port.name),
                dir: port.dir.into(),
                bus: port.bus.map(|b| BusMsg {
                    left: b.left,
                    right: b.right,
                }),
                props: self.props(&port.properties),
            });
        }

        let mut insts = Vec::with_capacity(self.insts.len());
        for iid in self.insts.values().copied().collect::<Vec<_>>() {
            let inst = &self.netlist.insts[iid];
            insts.push(InstMsg {
                name: self.str_idx(&inst.name),
                cell: self.cells.get(&inst.cell).unwrap().to_idx() as u32,
                view: self.str_idx(&inst.view),
                props: self.props(&inst.properties),
            });
        }

        let netlist = self.netlist;
        let top = match &netlist.top {
            Some(top) => Some(TopMsg {
                cell: self.cells.get(&top.cell).unwrap().to_idx() as u32,
                inst_name: self.strings.index_of(&top.inst_name).to_idx() as u32,
                props: self.props(&top.properties),
            }),
            None => None,
        };

        let props = self.props(&netlist.properties);

        LogNetlistMsg {
            name: netlist.name.clone(),
            strings: self.strings.into_vec(),
            cells,
            ports,
            insts,
            top,
            props,
        }
    }
}

pub fn netlist_to_msg(netlist: &Netlist) -> LogNetlistMsg {
    Encoder::new(netlist, StringTable::new()).build()
}

/// Like [`netlist_to_msg`], but string enumeration is sharded per library
/// over the concurrent table before the single-threaded record emission.
pub fn netlist_to_msg_parallel(netlist: &Netlist) -> LogNetlistMsg {
    let strings = SyncStringTable::new();
    let libs: Vec<_> = netlist.libraries.iter().collect();
    libs.par_iter().for_each(|&(_, lib_name, lib)| {
        strings.index_of(lib_name);
        for &cid in lib.cells.values() {
            let cell = &netlist.cells[cid];
            strings.index_of(&cell.name);
            strings.index_of(&cell.view);
            intern_props(&strings, &cell.properties);
            for &pid in &cell.ports {
                let port = &netlist.ports[pid];
                strings.index_of(&port.name);
                intern_props(&strings, &port.properties);
            }
            for &iid in &cell.insts {
                let inst = &netlist.insts[iid];
                strings.index_of(&inst.name);
                strings.index_of(&inst.view);
                intern_props(&strings, &inst.properties);
            }
            for net in &cell.nets {
                strings.index_of(&net.name);
                intern_props(&strings, &net.properties);
            }
        }
    });
    Encoder::new(netlist, strings.into_inner()).build()
}

fn intern_props(strings: &SyncStringTable, props: &PropertyMap) {
    for (key, value) in props {
        strings.index_of(key);
        if let PropertyValue::Text(text) = value {
            strings.index_of(text);
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Slot {
    Unresolved,
    InProgress,
    Resolved(CellId),
}

struct Decoder<'a> {
    msg: &'a LogNetlistMsg,
    strings: StringTable,
    netlist: Netlist,
    port_ids: Vec<PortId>,
    cell_slots: Vec<Slot>,
    inst_ids: Vec<Option<InstId>>,
}

impl<'a> Decoder<'a> {
    fn new(msg: &'a LogNetlistMsg) -> Self {
        Decoder {
            msg,
            strings: StringTable::from_vec(msg.strings.clone()),
            netlist: Netlist::new(msg.name.clone()),
            port_ids: Vec::with_capacity(msg.ports.len()),
            cell_slots: vec![Slot::Unresolved; msg.cells.len()],
            inst_ids: vec![None; msg.insts.len()],
        }
    }

    fn props(&self, msgs: &[PropEntryMsg]) -> Result<PropertyMap> {
        let mut out = PropertyMap::new();
        for m in msgs {
            let key = self.strings.get(m.key)?.to_string();
            let value = match m.tag {
                PROP_TAG_TEXT => PropertyValue::Text(self.strings.get(m.text)?.to_string()),
                PROP_TAG_INT => PropertyValue::Int(m.num as i32),
                PROP_TAG_BOOL => PropertyValue::Bool(m.num != 0),
                tag => return Err(InterchangeError::UnknownPropertyTag { tag, key }),
            };
            out.insert(key, value);
        }
        Ok(out)
    }

    fn port_id(&self, index: u32) -> Result<PortId> {
        self.port_ids
            .get(index as usize)
            .copied()
            .ok_or(InterchangeError::DanglingIndex {
                kind: "port",
                index,
                len: self.port_ids.len(),
            })
    }

    /// Resolves cell `index`, materializing it and everything it references
    /// first. A cell already materialized is returned straight from its
    /// slot; a slot hit while still in progress means the instantiation
    /// graph has a cycle.
    fn resolve_cell(&mut self, index: u32) -> Result<CellId> {
        let i = index as usize;
        if i >= self.msg.cells.len() {
            return Err(InterchangeError::DanglingIndex {
                kind: "cell",
                index,
                len: self.msg.cells.len(),
            });
        }
        match self.cell_slots[i] {
            Slot::Resolved(cid) => return Ok(cid),
            Slot::InProgress => {
                return Err(InterchangeError::CellCycle {
                    cell: self.strings.get(self.msg.cells[i].name)?.to_string(),
                });
            }
            Slot::Unresolved => {}
        }
        self.cell_slots[i] = Slot::InProgress;

        let cm = &self.msg.cells[i];
        let lib_name = self.strings.get(cm.library)?.to_string();
        let name = self.strings.get(cm.name)?.to_string();
        let view = self.strings.get(cm.view)?.to_string();
        let lib = self.netlist.library(&lib_name);
        if self.netlist.get_cell(&lib_name, &name).is_some() {
            return Err(InterchangeError::DuplicateCell {
                library: lib_name,
                name,
            });
        }
        let cid = self.netlist.add_cell(lib, name, view);
        self.netlist.cells[cid].properties = self.props(&cm.props)?;

        for &pidx in &cm.ports {
            let pid = self.port_id(pidx)?;
            self.netlist.cells[cid].ports.push(pid);
        }

        for &iidx in &cm.insts {
            self.resolve_inst(iidx, cid)?;
        }

        for nm in &cm.nets {
            let mut net = Net::new(self.strings.get(nm.name)?);
            net.properties = self.props(&nm.props)?;
            for ep in &nm.endpoints {
                let port = self.port_id(ep.port)?;
                let inst = match ep.inst {
                    None => None,
                    Some(iidx) => match self.inst_ids.get(iidx as usize) {
                        Some(Some(iid)) => Some(*iid),
                        Some(None) => return Err(InterchangeError::ForeignInstance(iidx)),
                        None => {
                            return Err(InterchangeError::DanglingIndex {
                                kind: "instance",
                                index: iidx,
                                len: self.inst_ids.len(),
                            });
                        }
                    },
                };
                net.endpoints.push(PortRef {
                    port,
                    inst,
                    bus_bit: ep.bus_bit,
                });
            }
            self.netlist.add_net(cid, net);
        }

        self.cell_slots[i] = Slot::Resolved(cid);
        Ok(cid)
    }

    fn resolve_inst(&mut self, index: u32, parent: CellId) -> Result<InstId> {
        let i = index as usize;
        if i >= self.msg.insts.len() {
            return Err(InterchangeError::DanglingIndex {
                kind: "instance",
                index,
                len: self.msg.insts.len(),
            });
        }
        if let Some(iid) = self.inst_ids[i] {
            return Ok(iid);
        }
        let im = &self.msg.insts[i];
        let cell = self.resolve_cell(im.cell)?;
        let name = self.strings.get(im.name)?.to_string();
        let view = self.strings.get(im.view)?.to_string();
        let iid = self.netlist.add_inst(parent, name, cell, view);
        self.netlist.insts[iid].properties = self.props(&im.props)?;
        self.inst_ids[i] = Some(iid);
        Ok(iid)
    }

    fn run(mut self) -> Result<Netlist> {
        for pm in &self.msg.ports {
            let port = Port {
                name: self.strings.get(pm.name)?.to_string(),
                dir: pm.dir.into(),
                bus: pm.bus.map(|b| BusRange {
                    left: b.left,
                    right: b.right,
                }),
                properties: self.props(&pm.props)?,
            };
            let pid = self.netlist.ports.push(port);
            self.port_ids.push(pid);
        }

        for i in 0..self.msg.cells.len() {
            self.resolve_cell(i as u32)?;
        }

        if let Some(top) = &self.msg.top {
            let cell = self.resolve_cell(top.cell)?;
            self.netlist.top = Some(TopDesign {
                cell,
                inst_name: self.strings.get(top.inst_name)?.to_string(),
                properties: self.props(&top.props)?,
            });
        }
        self.netlist.properties = self.props(&self.msg.props)?;

        // downstream consumers see a deterministic library order regardless
        // of the order values appeared in the file
        self.netlist.sort_libraries();
        Ok(self.netlist)
    }
}

pub fn msg_to_netlist(msg: &LogNetlistMsg) -> Result<Netlist> {
    Decoder::new(msg).run()
}

pub fn write_netlist(
    netlist: &Netlist,
    path: impl AsRef<std::path::Path>,
    opts: WireOptions,
) -> Result<()> {
    wire::write_message(path, &netlist_to_msg(netlist), opts)
}

pub fn read_netlist(path: impl AsRef<std::path::Path>, opts: WireOptions) -> Result<Netlist> {
    let msg: LogNetlistMsg = wire::read_message(path, opts)?;
    msg_to_netlist(&msg)
}
