//! Hierarchical logical netlist model.
//!
//! Cells, ports, instances and nets live in flat id-indexed arenas owned by
//! the [`Netlist`]; all cross-references are ids, so the instantiation graph
//! can be walked without back-pointers.

use std::collections::BTreeMap;

use unnamed_entity::{EntityMap, EntityVec, entity_id};

entity_id! {
    pub id LibraryId u16;
    pub id CellId u32;
    pub id PortId u32;
    pub id InstId u32;
}

/// Name of the library holding device primitive cells.
pub const PRIMITIVES_LIBRARY: &str = "primitives";
/// Name of the library holding macro cells that expand into primitives.
pub const MACROS_LIBRARY: &str = "macros";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PortDirection {
    Input,
    Output,
    Inout,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct BusRange {
    pub left: u32,
    pub right: u32,
}

impl BusRange {
    pub fn width(self) -> u32 {
        self.left.abs_diff(self.right) + 1
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum PropertyValue {
    Text(String),
    Int(i32),
    Bool(bool),
}

pub type PropertyMap = BTreeMap<String, PropertyValue>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Port {
    pub name: String,
    pub dir: PortDirection,
    pub bus: Option<BusRange>,
    pub properties: PropertyMap,
}

impl Port {
    pub fn new(name: impl Into<String>, dir: PortDirection) -> Self {
        Port {
            name: name.into(),
            dir,
            bus: None,
            properties: PropertyMap::new(),
        }
    }

    pub fn new_bus(name: impl Into<String>, dir: PortDirection, left: u32, right: u32) -> Self {
        Port {
            name: name.into(),
            dir,
            bus: Some(BusRange { left, right }),
            properties: PropertyMap::new(),
        }
    }

    pub fn width(&self) -> u32 {
        match self.bus {
            Some(bus) => bus.width(),
            None => 1,
        }
    }

    /// Display name including the bus range, e.g. `D[7:0]`.
    pub fn bus_label(&self) -> String {
        match self.bus {
            Some(bus) => format!("{}[{}:{}]", self.name, bus.left, bus.right),
            None => self.name.clone(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    pub name: String,
    pub cell: CellId,
    pub view: String,
    pub properties: PropertyMap,
}

/// One endpoint of a net: a port, optionally narrowed to a bus bit, on an
/// instance — or on the containing cell itself when `inst` is `None`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PortRef {
    pub port: PortId,
    pub inst: Option<InstId>,
    pub bus_bit: Option<u32>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Net {
    pub name: String,
    pub properties: PropertyMap,
    pub endpoints: Vec<PortRef>,
}

impl Net {
    pub fn new(name: impl Into<String>) -> Self {
        Net {
            name: name.into(),
            properties: PropertyMap::new(),
            endpoints: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cell {
    pub library: LibraryId,
    pub name: String,
    pub view: String,
    pub properties: PropertyMap,
    pub ports: Vec<PortId>,
    pub insts: Vec<InstId>,
    pub nets: Vec<Net>,
}

impl Cell {
    pub fn is_leaf(&self) -> bool {
        self.insts.is_empty()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Library {
    pub cells: BTreeMap<String, CellId>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TopDesign {
    pub cell: CellId,
    pub inst_name: String,
    pub properties: PropertyMap,
}

#[derive(Clone, Debug, Default)]
pub struct Netlist {
    pub name: String,
    pub libraries: EntityMap<LibraryId, String, Library>,
    pub cells: EntityVec<CellId, Cell>,
    pub ports: EntityVec<PortId, Port>,
    pub insts: EntityVec<InstId, Instance>,
    pub top: Option<TopDesign>,
    pub properties: PropertyMap,
}

impl Netlist {
    pub fn new(name: impl Into<String>) -> Self {
        Netlist {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Returns the library of the given name, creating it if absent.
    pub fn library(&mut self, name: &str) -> LibraryId {
        match self.libraries.get(name) {
            Some((lib, _)) => lib,
            None => {
                self.libraries
                    .insert(name.to_string(), Library::default())
                    .0
            }
        }
    }

    #[track_caller]
    pub fn add_cell(
        &mut self,
        library: LibraryId,
        name: impl Into<String>,
        view: impl Into<String>,
    ) -> CellId {
        let name = name.into();
        let cid = self.cells.next_id();
        let old = self.libraries[library].cells.insert(name.clone(), cid);
        if old.is_some() {
            panic!(
                "duplicate cell {lib}/{name}",
                lib = self.libraries.key(library)
            );
        }
        self.cells.push(Cell {
            library,
            name,
            view: view.into(),
            properties: PropertyMap::new(),
            ports: Vec::new(),
            insts: Vec::new(),
            nets: Vec::new(),
        })
    }

    pub fn add_port(&mut self, cell: CellId, port: Port) -> PortId {
        let pid = self.ports.push(port);
        self.cells[cell].ports.push(pid);
        pid
    }

    pub fn add_inst(
        &mut self,
        parent: CellId,
        name: impl Into<String>,
        cell: CellId,
        view: impl Into<String>,
    ) -> InstId {
        let iid = self.insts.push(Instance {
            name: name.into(),
            cell,
            view: view.into(),
            properties: PropertyMap::new(),
        });
        self.cells[parent].insts.push(iid);
        iid
    }

    pub fn add_net(&mut self, cell: CellId, net: Net) {
        self.cells[cell].nets.push(net);
    }

    pub fn get_cell(&self, library: &str, name: &str) -> Option<CellId> {
        let (_, lib) = self.libraries.get(library)?;
        lib.cells.get(name).copied()
    }

    /// Looks a cell up by name across all libraries, in library order.
    pub fn find_cell(&self, name: &str) -> Option<CellId> {
        self.libraries
            .values()
            .find_map(|lib| lib.cells.get(name).copied())
    }

    #[track_caller]
    pub fn top_cell(&self) -> CellId {
        match &self.top {
            Some(top) => top.cell,
            None => panic!("netlist {} has no top design", self.name),
        }
    }

    /// Finds an instance within `cell` by name.
    pub fn inst_in_cell(&self, cell: CellId, name: &str) -> Option<InstId> {
        self.cells[cell]
            .insts
            .iter()
            .copied()
            .find(|&iid| self.insts[iid].name == name)
    }

    /// Finds a port within `cell` by name.
    pub fn port_in_cell(&self, cell: CellId, name: &str) -> Option<PortId> {
        self.cells[cell]
            .ports
            .iter()
            .copied()
            .find(|&pid| self.ports[pid].name == name)
    }

    /// Resolves a `/`-separated hierarchical instance path starting at the
    /// top cell.
    pub fn find_inst_by_hier_name(&self, path: &str) -> Option<InstId> {
        let mut cell = self.top.as_ref()?.cell;
        let mut found = None;
        for seg in path.split('/') {
            let iid = self.inst_in_cell(cell, seg)?;
            cell = self.insts[iid].cell;
            found = Some(iid);
        }
        found
    }

    /// All leaf instances below `cell`, as (relative hierarchical path,
    /// instance) pairs.
    pub fn leaf_insts_of(&self, cell: CellId) -> Vec<(String, InstId)> {
        let mut out = Vec::new();
        self.collect_leaves(cell, "", &mut out);
        out
    }

    fn collect_leaves(&self, cell: CellId, prefix: &str, out: &mut Vec<(String, InstId)>) {
        for &iid in &self.cells[cell].insts {
            let inst = &self.insts[iid];
            let path = if prefix.is_empty() {
                inst.name.clone()
            } else {
                format!("{prefix}/{name}", name = inst.name)
            };
            if self.cells[inst.cell].is_leaf() {
                out.push((path, iid));
            } else {
                self.collect_leaves(inst.cell, &path, out);
            }
        }
    }

    /// Re-inserts libraries in the canonical order: the primitive library
    /// first, then the rest by name. Cell `library` ids are remapped.
    pub fn sort_libraries(&mut self) {
        let old = std::mem::take(&mut self.libraries);
        let mut entries: Vec<(String, Library)> = old.into_vec().into_values().collect();
        entries.sort_by(|(a, _), (b, _)| {
            (a != PRIMITIVES_LIBRARY, a).cmp(&(b != PRIMITIVES_LIBRARY, b))
        });
        let mut libraries = EntityMap::new();
        for (name, lib) in entries {
            let (lid, _) = libraries.insert(name, lib);
            for &cid in libraries[lid].cells.values() {
                self.cells[cid].library = lid;
            }
        }
        self.libraries = libraries;
    }
}
