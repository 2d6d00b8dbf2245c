//! Shared fixture: a two-tile device with routable slices, a constant
//! source, and a primitive/macro library, plus a matching netlist and a
//! small placed-and-routed design.
#![allow(dead_code)]

use fabric_design::{Design, NetClass, PinMapping, PlacedCell, PlacedPip, SitePinRef};
use fabric_device::{
    BelClass, BelPinId, BelSlotId, Device, PinDefault, PinDir, PipDef, SiteTypeId, TieValue,
};
use fabric_netlist::{
    MACROS_LIBRARY, Net, Netlist, PRIMITIVES_LIBRARY, Port, PortDirection, PortRef, PropertyMap,
    TopDesign,
};

pub fn fixture_device() -> Device {
    let mut dev = Device::new("testdev");

    let slice = dev.site_type("SLICE");
    {
        let st = &mut dev.site_types[slice];
        let lut = st.add_bel("LUT0", BelClass::Logic, None);
        st.add_bel_pin(lut, "I0", PinDir::Input, Some("W_I0"));
        st.add_bel_pin(lut, "I1", PinDir::Input, Some("W_I1"));
        st.add_bel_pin(lut, "O", PinDir::Output, Some("W_O"));
        let mux = st.add_bel("OUTMUX", BelClass::Routing, None);
        st.add_bel_pin(mux, "IN", PinDir::Input, Some("W_O"));
        st.add_bel_pin(mux, "OUT", PinDir::Output, Some("W_OUT"));
        st.add_site_pin("I0", PinDir::Input, "W_I0");
        st.add_site_pin("I1", PinDir::Input, "W_I1");
        st.add_site_pin("O", PinDir::Output, "W_OUT");
    }

    let tieoff = dev.site_type("TIEOFF");
    {
        let st = &mut dev.site_types[tieoff];
        let hard = st.add_bel("HARDGND", BelClass::Logic, Some(TieValue::Gnd));
        st.add_bel_pin(hard, "0", PinDir::Output, Some("W_G"));
        st.add_site_pin("OUT", PinDir::Output, "W_G");
    }

    let clb = dev.tile_type("CLB");
    let (w_in0, w_in1, w_outw, w_xin, w_gw) = {
        let tt = &mut dev.tile_types[clb];
        let in0 = tt.wire("IN0");
        let in1 = tt.wire("IN1");
        let outw = tt.wire("OUTW");
        let xin = tt.wire("XIN");
        let gw = tt.wire("GW");
        tt.add_pip(
            xin,
            in0,
            PipDef {
                directional: true,
                buffered: true,
            },
        );
        (in0, in1, outw, xin, gw)
    };

    let t0 = dev.add_tile("CLB_X0Y0", clb, 0, 0);
    let t1 = dev.add_tile("CLB_X1Y0", clb, 0, 1);

    for (site_name, tile) in [("SLICE_X0Y0", t0), ("SLICE_X1Y0", t1)] {
        let site = dev.add_site(site_name, tile, slice);
        let st = &dev.site_types[slice];
        let pins: Vec<_> = st.pins.ids().collect();
        // pin order: I0, I1, O
        dev.bind_site_pin(site, pins[0], w_in0);
        dev.bind_site_pin(site, pins[1], w_in1);
        dev.bind_site_pin(site, pins[2], w_outw);
    }
    {
        let site = dev.add_site("TIEOFF_X0Y0", t0, tieoff);
        let pin = dev.site_types[tieoff].pins.ids().next().unwrap();
        dev.bind_site_pin(site, pin, w_gw);
    }

    dev.add_node(&[(t0, w_outw), (t1, w_xin)], None);
    dev.add_node(&[(t0, w_in0)], None);
    dev.add_node(&[(t0, w_in1)], None);
    dev.add_node(&[(t0, w_xin)], None);
    dev.add_node(&[(t1, w_in0)], None);
    dev.add_node(&[(t1, w_in1)], None);
    dev.add_node(&[(t1, w_outw)], None);
    dev.add_node(&[(t0, w_gw)], Some(TieValue::Gnd));
    dev.add_node(&[(t1, w_gw)], Some(TieValue::Gnd));

    // primitive and macro library
    {
        let lib = &mut dev.prim_lib;
        lib.name = "testdev-prims".to_string();
        let prims = lib.library(PRIMITIVES_LIBRARY);
        let lut2 = lib.add_cell(prims, "LUT2", "netlist");
        lib.add_port(lut2, Port::new("I0", PortDirection::Input));
        lib.add_port(lut2, Port::new("I1", PortDirection::Input));
        lib.add_port(lut2, Port::new("O", PortDirection::Output));
        let ramleaf = lib.add_cell(prims, "RAMLEAF", "netlist");
        lib.add_port(ramleaf, Port::new("D", PortDirection::Input));
        let drv = lib.add_cell(prims, "DRV", "netlist");
        lib.add_port(drv, Port::new("I", PortDirection::Input));
        let rcv = lib.add_cell(prims, "RCV", "netlist");
        lib.add_port(rcv, Port::new("O", PortDirection::Output));

        let macros = lib.library(MACROS_LIBRARY);
        let rampair = lib.add_cell(macros, "RAMPAIR", "netlist");
        lib.add_inst(rampair, "RAMA", ramleaf, "netlist");
        lib.add_inst(rampair, "RAMB", ramleaf, "netlist");
        let iobufds = lib.add_cell(macros, "IOBUFDS", "netlist");
        lib.add_inst(iobufds, "OBUF", drv, "netlist");
        lib.add_inst(iobufds, "IBUF", rcv, "netlist");
    }
    dev.macro_expansions
        .insert("RAM16".to_string(), "RAMPAIR".to_string());

    dev.constants
        .cell_pin_defaults
        .entry("LUT2".to_string())
        .or_default()
        .insert("I1".to_string(), PinDefault::Vcc);
    dev.constants = fabric_interchange::constants::derive_ties(&dev).unwrap();

    dev
}

/// Logical netlist with a top cell holding two LUT2 instances and one
/// instance of each macro.
pub fn fixture_netlist() -> Netlist {
    let mut n = Netlist::new("top");
    let prims = n.library(PRIMITIVES_LIBRARY);
    let work = n.library("work");

    let lut2 = n.add_cell(prims, "LUT2", "netlist");
    n.add_port(lut2, Port::new("I0", PortDirection::Input));
    n.add_port(lut2, Port::new("I1", PortDirection::Input));
    n.add_port(lut2, Port::new("O", PortDirection::Output));
    let ramleaf = n.add_cell(prims, "RAMLEAF", "netlist");
    n.add_port(ramleaf, Port::new("D", PortDirection::Input));
    let drv = n.add_cell(prims, "DRV", "netlist");
    n.add_port(drv, Port::new("I", PortDirection::Input));
    let rcv = n.add_cell(prims, "RCV", "netlist");
    n.add_port(rcv, Port::new("O", PortDirection::Output));

    let rampair = n.add_cell(work, "RAMPAIR", "netlist");
    n.add_inst(rampair, "RAMA", ramleaf, "netlist");
    n.add_inst(rampair, "RAMB", ramleaf, "netlist");
    let iobufds = n.add_cell(work, "IOBUFDS", "netlist");
    n.add_inst(iobufds, "OBUF", drv, "netlist");
    n.add_inst(iobufds, "IBUF", rcv, "netlist");

    let top = n.add_cell(work, "top", "netlist");
    let sig_in = n.add_port(top, Port::new("SIG_IN", PortDirection::Input));
    let u0 = n.add_inst(top, "u0", lut2, "netlist");
    let u1 = n.add_inst(top, "u1", lut2, "netlist");
    n.add_inst(top, "m0", rampair, "netlist");
    n.add_inst(top, "io0", iobufds, "netlist");

    let i0 = n.port_in_cell(lut2, "I0").unwrap();
    let o = n.port_in_cell(lut2, "O").unwrap();
    let mut sig = Net::new("sig");
    sig.endpoints.push(PortRef {
        port: o,
        inst: Some(u0),
        bus_bit: None,
    });
    sig.endpoints.push(PortRef {
        port: i0,
        inst: Some(u1),
        bus_bit: None,
    });
    n.add_net(top, sig);
    let mut input = Net::new("SIG_IN");
    input.endpoints.push(PortRef {
        port: sig_in,
        inst: None,
        bus_bit: None,
    });
    input.endpoints.push(PortRef {
        port: i0,
        inst: Some(u0),
        bus_bit: None,
    });
    n.add_net(top, input);

    n.top = Some(TopDesign {
        cell: top,
        inst_name: "top".to_string(),
        properties: PropertyMap::new(),
    });
    n
}

pub fn slice_bel(dev: &Device, bel: &str) -> (SiteTypeId, BelSlotId) {
    let (st, _) = dev.site_types.get("SLICE").unwrap();
    let (b, _) = dev.site_types[st].get_bel(bel).unwrap();
    (st, b)
}

pub fn bel_pin(dev: &Device, st: SiteTypeId, bel: BelSlotId, pin: &str) -> BelPinId {
    dev.site_types[st].bels[bel].pins.get(pin).unwrap().0
}

/// A design routing net "sig" from u0's LUT output in SLICE_X0Y0 through
/// one pip into u1's I0 input in SLICE_X1Y0.
pub fn fixture_design(dev: &Device) -> Design {
    let netlist = fixture_netlist();
    let mut design = Design::new("top", "testdev", netlist);
    design.out_of_context = true;

    let (slice, lut) = slice_bel(dev, "LUT0");
    let (_, mux) = slice_bel(dev, "OUTMUX");
    let lut_i0 = bel_pin(dev, slice, lut, "I0");
    let lut_i1 = bel_pin(dev, slice, lut, "I1");
    let lut_o = bel_pin(dev, slice, lut, "O");
    let mux_in = bel_pin(dev, slice, mux, "IN");

    let (site0, _) = dev.sites.get("SLICE_X0Y0").unwrap();
    let (site1, _) = dev.sites.get("SLICE_X1Y0").unwrap();
    let s0 = design.create_site_inst("SLICE_X0Y0", site0, slice);
    let s1 = design.create_site_inst("SLICE_X1Y0", site1, slice);

    let mut u0 = PlacedCell::new("u0", "LUT2");
    for (bpin, cpin) in [(lut_i0, "I0"), (lut_i1, "I1"), (lut_o, "O")] {
        u0.pin_map.push(PinMapping {
            bel: lut,
            bel_pin: bpin,
            cell_pin: cpin.to_string(),
            fixed: false,
            other_cell: None,
        });
    }
    assert!(design.place_cell(s0, lut, u0));
    let mut u1 = PlacedCell::new("u1", "LUT2");
    u1.pin_map.push(PinMapping {
        bel: lut,
        bel_pin: lut_i0,
        cell_pin: "I0".to_string(),
        fixed: false,
        other_cell: None,
    });
    assert!(design.place_cell(s1, lut, u1));

    let sig = design.add_net("sig", NetClass::Signal);
    let st = &dev.site_types[slice];
    let w_o = st.wires.get("W_O").unwrap().0;
    let w_out = st.wires.get("W_OUT").unwrap().0;
    let w_i0 = st.wires.get("W_I0").unwrap().0;
    let pin_o = st.pins.get("O").unwrap().0;
    let pin_i0 = st.pins.get("I0").unwrap().0;

    design.nets[sig].pins.push(SitePinRef {
        site_inst: s0,
        pin: pin_o,
    });
    design.nets[sig].pins.push(SitePinRef {
        site_inst: s1,
        pin: pin_i0,
    });

    let (t1, _) = dev.tiles.get("CLB_X1Y0").unwrap();
    let tt = dev.tile_type_of(t1);
    let xin = tt.get_wire("XIN").unwrap();
    let in0 = tt.get_wire("IN0").unwrap();
    let (pip, forward) = tt.pip_between(xin, in0).unwrap();
    design.nets[sig].pips.push(PlacedPip {
        tile: t1,
        pip,
        forward,
        fixed: false,
    });

    {
        let inst = &mut design.site_insts[s0];
        inst.route_site_wire(w_o, sig);
        inst.route_site_wire(w_out, sig);
        inst.add_site_pip((mux, mux_in), false);
    }
    design.site_insts[s1].route_site_wire(w_i0, sig);

    design
}
