//! Memoized device-model lookups keyed on string-table indices.
//!
//! Millions of tiles and sites share a handful of types, so lookups are
//! computed once per (type, name-index) key and shared across every
//! instance of that type. Pip results are type-level templates; callers
//! bind them to the concrete tile.

use std::collections::HashMap;

use fabric_device::{BelPinId, BelSlotId, Device, PipId, SiteTypeId, TileId, TileTypeId};

use crate::error::{InterchangeError, Result};
use crate::table::StringTable;

pub struct BelPinCache<'a> {
    device: &'a Device,
    map: HashMap<(SiteTypeId, u32, u32), (BelSlotId, BelPinId)>,
}

impl<'a> BelPinCache<'a> {
    pub fn new(device: &'a Device) -> Self {
        BelPinCache {
            device,
            map: HashMap::new(),
        }
    }

    /// Resolves a (bel name, pin name) pair within a site type. `site_name`
    /// only labels the error on a miss against the device model.
    pub fn get(
        &mut self,
        strings: &StringTable,
        site_kind: SiteTypeId,
        site_name: &str,
        bel: u32,
        pin: u32,
    ) -> Result<(BelSlotId, BelPinId)> {
        let key = (site_kind, bel, pin);
        if let Some(&hit) = self.map.get(&key) {
            return Ok(hit);
        }
        let bel_name = strings.get(bel)?;
        let st = &self.device.site_types[site_kind];
        let (bel_id, b) = st
            .get_bel(bel_name)
            .ok_or_else(|| InterchangeError::UnknownBel {
                site: site_name.to_string(),
                bel: bel_name.to_string(),
            })?;
        let pin_name = strings.get(pin)?;
        let (pin_id, _) =
            b.pins
                .get(pin_name)
                .ok_or_else(|| InterchangeError::UnknownBelPin {
                    site: site_name.to_string(),
                    bel: bel_name.to_string(),
                    pin: pin_name.to_string(),
                })?;
        self.map.insert(key, (bel_id, pin_id));
        Ok((bel_id, pin_id))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

pub struct PipCache<'a> {
    device: &'a Device,
    map: HashMap<(TileTypeId, u32, u32), (PipId, bool)>,
}

impl<'a> PipCache<'a> {
    pub fn new(device: &'a Device) -> Self {
        PipCache {
            device,
            map: HashMap::new(),
        }
    }

    /// Resolves the pip between two wire names in the given tile. The
    /// cached entry is per tile type; the returned pip id is valid in any
    /// tile of that type, so the caller rebinds it to `tile`. The flag is
    /// true when (wire0, wire1) matches the pip's canonical orientation.
    pub fn get(
        &mut self,
        strings: &StringTable,
        tile: TileId,
        wire0: u32,
        wire1: u32,
    ) -> Result<(PipId, bool)> {
        let kind = self.device.tiles[tile].kind;
        let key = (kind, wire0, wire1);
        if let Some(&hit) = self.map.get(&key) {
            return Ok(hit);
        }
        let tile_name = self.device.tiles.key(tile);
        let tt = &self.device.tile_types[kind];
        let w0_name = strings.get(wire0)?;
        let w0 = tt
            .get_wire(w0_name)
            .ok_or_else(|| InterchangeError::UnknownWire {
                tile: tile_name.clone(),
                wire: w0_name.to_string(),
            })?;
        let w1_name = strings.get(wire1)?;
        let w1 = tt
            .get_wire(w1_name)
            .ok_or_else(|| InterchangeError::UnknownWire {
                tile: tile_name.clone(),
                wire: w1_name.to_string(),
            })?;
        let hit = tt
            .pip_between(w0, w1)
            .ok_or_else(|| InterchangeError::UnknownPip {
                tile: tile_name.clone(),
                wire0: w0_name.to_string(),
                wire1: w1_name.to_string(),
            })?;
        self.map.insert(key, hit);
        Ok(hit)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
