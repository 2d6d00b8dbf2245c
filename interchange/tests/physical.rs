mod common;

use std::collections::BTreeSet;

use assert_matches::assert_matches;
use common::*;
use fabric_design::{Design, GND_NET, NetClass, PhysCellKind, PlacedCell, SitePinRef};
use fabric_device::Device;
use fabric_interchange::physical::{self, NetClassMsg, SegmentMsg};
use fabric_interchange::{InterchangeError, WireOptions};
use unnamed_entity::EntityId;

/// Semantic design comparison: identical site-instance set, identical
/// placement, identical routing, independent of internal ids.
fn assert_design_equiv(dev: &Device, a: &Design, b: &Design) {
    let site_insts = |d: &Design| {
        d.site_insts
            .values()
            .map(|si| {
                (
                    dev.sites.key(si.site).clone(),
                    dev.site_types.key(si.kind).clone(),
                    si.locked,
                )
            })
            .collect::<BTreeSet<_>>()
    };
    assert_eq!(site_insts(a), site_insts(b));

    let placements = |d: &Design| {
        let mut out = BTreeSet::new();
        for si in d.site_insts.values() {
            let st = &dev.site_types[si.kind];
            for (&bel, cell) in &si.cells {
                let pin_map: BTreeSet<_> = cell
                    .pin_map
                    .iter()
                    .map(|m| {
                        (
                            st.bels.key(m.bel).clone(),
                            st.bels[m.bel].pins.key(m.bel_pin).clone(),
                            m.cell_pin.clone(),
                            m.fixed,
                            m.other_cell
                                .as_ref()
                                .map(|oc| (oc.name.clone(), oc.cell_type.clone())),
                        )
                    })
                    .collect();
                let other_bels: BTreeSet<_> = cell
                    .other_bels
                    .iter()
                    .map(|&b| st.bels.key(b).clone())
                    .collect();
                out.insert((
                    dev.sites.key(si.site).clone(),
                    st.bels.key(bel).clone(),
                    cell.name.clone(),
                    cell.cell_type.clone(),
                    cell.kind,
                    pin_map,
                    other_bels,
                ));
            }
        }
        out
    };
    assert_eq!(placements(a), placements(b));

    let nets = |d: &Design| {
        d.nets
            .iter()
            .map(|(_, name, net)| {
                let pips: BTreeSet<_> = net
                    .pips
                    .iter()
                    .map(|p| {
                        (
                            dev.tiles.key(p.tile).clone(),
                            p.pip.to_idx(),
                            p.forward,
                            p.fixed,
                        )
                    })
                    .collect();
                let pins: BTreeSet<_> = net
                    .pins
                    .iter()
                    .map(|p| {
                        let si = &d.site_insts[p.site_inst];
                        (
                            dev.sites.key(si.site).clone(),
                            dev.site_types[si.kind].pins.key(p.pin).clone(),
                        )
                    })
                    .collect();
                let stubs: BTreeSet<_> = net
                    .stub_nodes
                    .iter()
                    .map(|s| (dev.tiles.key(s.tile).clone(), s.wire.to_idx(), s.fixed))
                    .collect();
                (name.clone(), net.class, pips, pins, stubs)
            })
            .collect::<BTreeSet<_>>()
    };
    assert_eq!(nets(a), nets(b));

    let site_state = |d: &Design| {
        d.site_insts
            .values()
            .map(|si| {
                let st = &dev.site_types[si.kind];
                let wires: BTreeSet<_> = si
                    .wire_nets
                    .iter()
                    .map(|(&w, &n)| (st.wires.key(w).clone(), d.nets.key(n).clone()))
                    .collect();
                let pips: BTreeSet<_> = si
                    .used_site_pips
                    .iter()
                    .map(|(&(bel, pin), &fixed)| {
                        (
                            st.bels.key(bel).clone(),
                            st.bels[bel].pins.key(pin).clone(),
                            fixed,
                        )
                    })
                    .collect();
                (dev.sites.key(si.site).clone(), wires, pips)
            })
            .collect::<BTreeSet<_>>()
    };
    assert_eq!(site_state(a), site_state(b));

    assert_eq!(a.part, b.part);
    assert_eq!(a.auto_io_buffers, b.auto_io_buffers);
    assert_eq!(a.out_of_context, b.out_of_context);
}

#[test]
fn roundtrip_identity() {
    let dev = fixture_device();
    let design = fixture_design(&dev);
    let msg = physical::design_to_msg(&design, &dev);
    let back = physical::msg_to_design(&msg, &dev, fixture_netlist()).unwrap();
    assert_design_equiv(&dev, &design, &back);
}

#[test]
fn routing_forest_has_single_source() {
    let dev = fixture_device();
    let design = fixture_design(&dev);
    let msg = physical::design_to_msg(&design, &dev);
    let sig = msg
        .nets
        .iter()
        .find(|n| n.kind == NetClassMsg::Signal)
        .unwrap();
    // the whole net hangs off the LUT output bel pin
    assert_eq!(sig.sources.len(), 1);
    assert!(sig.stubs.is_empty());
    assert_matches!(sig.sources[0].segment, SegmentMsg::BelPin { .. });
}

#[test]
fn site_pin_scenario() {
    // one site pin, one inter-tile link, one sink site pin: the decoded net
    // has one pip and two site pins with the right orientation
    let dev = fixture_device();
    let design = fixture_design(&dev);
    let msg = physical::design_to_msg(&design, &dev);
    let back = physical::msg_to_design(&msg, &dev, fixture_netlist()).unwrap();
    let (_, net) = back.nets.get("sig").unwrap();
    assert_eq!(net.pips.len(), 1);
    assert!(net.pips[0].forward);
    assert_eq!(net.pins.len(), 2);
    let pin_names: BTreeSet<_> = net
        .pins
        .iter()
        .map(|p| {
            let si = &back.site_insts[p.site_inst];
            (
                dev.sites.key(si.site).as_str(),
                dev.site_types[si.kind].pins.key(p.pin).as_str(),
            )
        })
        .collect();
    assert_eq!(
        pin_names,
        BTreeSet::from([("SLICE_X0Y0", "O"), ("SLICE_X1Y0", "I0")])
    );
}

#[test]
fn macro_placement_must_be_complete() {
    let dev = fixture_device();
    let (slice, lut) = slice_bel(&dev, "LUT0");
    let (site0, _) = dev.sites.get("SLICE_X0Y0").unwrap();
    let (site1, _) = dev.sites.get("SLICE_X1Y0").unwrap();

    // partial: only one of the two RAMPAIR legs is placed
    let mut design = Design::new("top", "testdev", fixture_netlist());
    let s0 = design.create_site_inst("SLICE_X0Y0", site0, slice);
    design.place_cell(s0, lut, PlacedCell::new("m0/RAMA", "RAMLEAF"));
    let msg = physical::design_to_msg(&design, &dev);
    assert_matches!(
        physical::msg_to_design(&msg, &dev, fixture_netlist()),
        Err(InterchangeError::MacroNotFullyPlaced { inst, missing })
            if inst == "m0" && missing == ["RAMB"]
    );

    // complete: both legs placed
    let mut design = Design::new("top", "testdev", fixture_netlist());
    let s0 = design.create_site_inst("SLICE_X0Y0", site0, slice);
    let s1 = design.create_site_inst("SLICE_X1Y0", site1, slice);
    design.place_cell(s0, lut, PlacedCell::new("m0/RAMA", "RAMLEAF"));
    design.place_cell(s1, lut, PlacedCell::new("m0/RAMB", "RAMLEAF"));
    let msg = physical::design_to_msg(&design, &dev);
    physical::msg_to_design(&msg, &dev, fixture_netlist()).unwrap();
}

#[test]
fn exempt_macro_may_be_partial() {
    let dev = fixture_device();
    let (slice, lut) = slice_bel(&dev, "LUT0");
    let (site0, _) = dev.sites.get("SLICE_X0Y0").unwrap();
    let mut design = Design::new("top", "testdev", fixture_netlist());
    let s0 = design.create_site_inst("SLICE_X0Y0", site0, slice);
    design.place_cell(s0, lut, PlacedCell::new("io0/OBUF", "DRV"));
    let msg = physical::design_to_msg(&design, &dev);
    physical::msg_to_design(&msg, &dev, fixture_netlist()).unwrap();
}

#[test]
fn placing_the_macro_itself_is_rejected() {
    let dev = fixture_device();
    let (slice, lut) = slice_bel(&dev, "LUT0");
    let (site0, _) = dev.sites.get("SLICE_X0Y0").unwrap();
    let mut design = Design::new("top", "testdev", fixture_netlist());
    let s0 = design.create_site_inst("SLICE_X0Y0", site0, slice);
    design.place_cell(s0, lut, PlacedCell::new("m0", "RAMPAIR"));
    let msg = physical::design_to_msg(&design, &dev);
    assert_matches!(
        physical::msg_to_design(&msg, &dev, fixture_netlist()),
        Err(InterchangeError::MacroPlacement { cell_type, .. }) if cell_type == "RAMPAIR"
    );
}

#[test]
fn pin_mapping_outside_secondary_bels_is_rejected() {
    let dev = fixture_device();
    let design = fixture_design(&dev);
    let mut msg = physical::design_to_msg(&design, &dev);
    // move one of u0's pin mappings onto OUTMUX without declaring it
    let strings = msg.strings.clone();
    let outmux = strings.iter().position(|s| s == "OUTMUX");
    let outmux = match outmux {
        Some(i) => i as u32,
        None => {
            msg.strings.push("OUTMUX".to_string());
            (msg.strings.len() - 1) as u32
        }
    };
    let in_pin = match msg.strings.iter().position(|s| s == "IN") {
        Some(i) => i as u32,
        None => {
            msg.strings.push("IN".to_string());
            (msg.strings.len() - 1) as u32
        }
    };
    let placement = msg
        .placements
        .iter_mut()
        .find(|p| !p.pin_map.is_empty())
        .unwrap();
    placement.pin_map[0].bel = outmux;
    placement.pin_map[0].bel_pin = in_pin;
    assert_matches!(
        physical::msg_to_design(&msg, &dev, fixture_netlist()),
        Err(InterchangeError::MissingOtherBel { bel, .. }) if bel == "OUTMUX"
    );
}

#[test]
fn secondary_bel_mapping_materializes_a_leg() {
    let dev = fixture_device();
    let design = fixture_design(&dev);
    let mut msg = physical::design_to_msg(&design, &dev);
    let outmux = msg.strings.iter().position(|s| s == "OUTMUX").unwrap() as u32;
    let in_pin = msg.strings.iter().position(|s| s == "IN").unwrap() as u32;
    let placement = msg
        .placements
        .iter_mut()
        .find(|p| !p.pin_map.is_empty())
        .unwrap();
    placement.other_bels.push(outmux);
    let mut extra = placement.pin_map[0];
    extra.bel = outmux;
    extra.bel_pin = in_pin;
    placement.pin_map.push(extra);

    let back = physical::msg_to_design(&msg, &dev, fixture_netlist()).unwrap();
    let (_, mux) = slice_bel(&dev, "OUTMUX");
    let (site0, _) = dev.sites.get("SLICE_X0Y0").unwrap();
    let si = back.site_inst_for_site(site0).unwrap();
    let leg = back.cell(si, mux).expect("leg cell on the secondary bel");
    assert!(leg.routethru);
    assert_eq!(leg.name, "u0");
}

#[test]
fn static_net_synthesizes_source_site_inst() {
    let dev = fixture_device();
    let (tieoff, _) = dev.site_types.get("TIEOFF").unwrap();
    let (tie_site, _) = dev.sites.get("TIEOFF_X0Y0").unwrap();
    let out_pin = dev.site_types[tieoff].pins.ids().next().unwrap();

    let mut design = Design::new("top", "testdev", fixture_netlist());
    let tie_si = design.create_site_inst("TIEOFF_X0Y0", tie_site, tieoff);
    let gnd = design.add_net(GND_NET, NetClass::Gnd);
    design.nets[gnd].pins.push(SitePinRef {
        site_inst: tie_si,
        pin: out_pin,
    });
    let mut msg = physical::design_to_msg(&design, &dev);

    // drop the explicit site instance record; the constant source is
    // implicit and must be resynthesized
    msg.site_insts.clear();
    let back = physical::msg_to_design(&msg, &dev, fixture_netlist()).unwrap();
    let si = back
        .site_inst_for_site(tie_site)
        .expect("synthesized site instance");
    assert!(back.site_insts.key(si).starts_with("STATIC_SOURCE"));
    let (_, net) = back.nets.get(GND_NET).unwrap();
    assert_eq!(net.pins.len(), 1);
}

#[test]
fn constant_net_naming_is_enforced() {
    let dev = fixture_device();
    let mut design = Design::new("top", "testdev", fixture_netlist());
    design.add_net("not_the_gnd_net", NetClass::Gnd);
    let msg = physical::design_to_msg(&design, &dev);
    assert_matches!(
        physical::msg_to_design(&msg, &dev, fixture_netlist()),
        Err(InterchangeError::BadConstantNetName { class: "GND", .. })
    );
}

#[test]
fn duplicate_net_name_is_rejected() {
    let dev = fixture_device();
    let design = fixture_design(&dev);
    let mut msg = physical::design_to_msg(&design, &dev);
    let net = msg.nets[0].clone();
    msg.nets.push(net);
    assert_matches!(
        physical::msg_to_design(&msg, &dev, fixture_netlist()),
        Err(InterchangeError::DuplicateNet(_))
    );
}

#[test]
fn conflicting_placement_is_rejected() {
    let dev = fixture_device();
    let design = fixture_design(&dev);
    let mut msg = physical::design_to_msg(&design, &dev);
    let mut dup = msg
        .placements
        .iter()
        .find(|p| p.pin_map.len() > 1)
        .unwrap()
        .clone();
    // same site and bel, different cell
    dup.cell_name = dup.cell_type;
    msg.placements.push(dup);
    assert_matches!(
        physical::msg_to_design(&msg, &dev, fixture_netlist()),
        Err(InterchangeError::ConflictingPlacement { .. })
    );
}

#[test]
fn locked_and_port_cells_survive() {
    let dev = fixture_device();
    let (slice, lut) = slice_bel(&dev, "LUT0");
    let (site0, _) = dev.sites.get("SLICE_X0Y0").unwrap();
    let (site1, _) = dev.sites.get("SLICE_X1Y0").unwrap();
    let mut design = Design::new("top", "testdev", fixture_netlist());
    let s0 = design.create_site_inst("SLICE_X0Y0", site0, slice);
    let s1 = design.create_site_inst("SLICE_X1Y0", site1, slice);
    let mut locked = PlacedCell::new(fabric_design::LOCKED_CELL, "BLACKBOX");
    locked.kind = PhysCellKind::Locked;
    design.place_cell(s0, lut, locked);
    design.site_insts[s0].locked = true;
    let mut port = PlacedCell::new("pad0", fabric_design::PORT_CELL_TYPE);
    port.kind = PhysCellKind::Port;
    design.place_cell(s1, lut, port);

    let msg = physical::design_to_msg(&design, &dev);
    assert_eq!(msg.phys_cells.len(), 2);
    let back = physical::msg_to_design(&msg, &dev, fixture_netlist()).unwrap();
    let si0 = back.site_inst_for_site(site0).unwrap();
    let si1 = back.site_inst_for_site(site1).unwrap();
    assert!(back.site_insts[si0].locked);
    assert_eq!(back.cell(si0, lut).unwrap().kind, PhysCellKind::Locked);
    let pad = back.cell(si1, lut).unwrap();
    assert_eq!(pad.kind, PhysCellKind::Port);
    assert_eq!(pad.name, "pad0");
}

#[test]
fn unassociated_site_pips_travel_on_the_null_net() {
    let dev = fixture_device();
    let (slice, mux) = slice_bel(&dev, "OUTMUX");
    let mux_in = bel_pin(&dev, slice, mux, "IN");
    let (site0, _) = dev.sites.get("SLICE_X0Y0").unwrap();
    let mut design = Design::new("top", "testdev", fixture_netlist());
    let s0 = design.create_site_inst("SLICE_X0Y0", site0, slice);
    design.site_insts[s0].add_site_pip((mux, mux_in), true);

    let msg = physical::design_to_msg(&design, &dev);
    assert_eq!(msg.null_net.len(), 1);
    let back = physical::msg_to_design(&msg, &dev, fixture_netlist()).unwrap();
    let si = back.site_inst_for_site(site0).unwrap();
    assert_eq!(
        back.site_insts[si].used_site_pips.get(&(mux, mux_in)),
        Some(&true)
    );
}

#[test]
fn file_roundtrip() {
    let dev = fixture_device();
    let design = fixture_design(&dev);
    let path = std::env::temp_dir().join(format!("fabric-phys-test-{}", std::process::id()));
    for opts in [
        WireOptions::default(),
        WireOptions {
            gzip: false,
            packed: true,
        },
    ] {
        physical::write_design(&design, &dev, &path, opts).unwrap();
        let back = physical::read_design(&path, &dev, fixture_netlist(), opts).unwrap();
        assert_design_equiv(&dev, &design, &back);
    }
    std::fs::remove_file(&path).unwrap();
}
