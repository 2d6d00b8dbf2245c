use std::error::Error;

use clap::{Arg, ArgAction, Command, value_parser};
use fabric_interchange::wire::{self, WireOptions};
use fabric_interchange::{devres, logical, physical};

fn file_args() -> [Arg; 2] {
    [
        Arg::new("raw")
            .long("raw")
            .action(ArgAction::SetTrue)
            .help("file is not gzip-compressed"),
        Arg::new("packed")
            .long("packed")
            .action(ArgAction::SetTrue)
            .help("file uses the varint-packed encoding"),
    ]
}

fn opts_from(m: &clap::ArgMatches) -> WireOptions {
    WireOptions {
        gzip: !m.get_flag("raw"),
        packed: m.get_flag("packed"),
    }
}

fn dump_logical(file: &str, opts: WireOptions) -> Result<(), Box<dyn Error>> {
    let netlist = logical::read_netlist(file, opts)?;
    println!("logical netlist {name}", name = netlist.name);
    for (_, lib_name, lib) in netlist.libraries.iter() {
        println!("  library {lib_name}: {n} cells", n = lib.cells.len());
        for (cell_name, &cid) in &lib.cells {
            let cell = &netlist.cells[cid];
            println!(
                "    cell {cell_name}: {p} ports, {i} insts, {n} nets",
                p = cell.ports.len(),
                i = cell.insts.len(),
                n = cell.nets.len(),
            );
        }
    }
    if let Some(top) = &netlist.top {
        println!(
            "  top {inst} : {cell}",
            inst = top.inst_name,
            cell = netlist.cells[top.cell].name,
        );
    }
    Ok(())
}

fn dump_physical(file: &str, opts: WireOptions) -> Result<(), Box<dyn Error>> {
    let msg: physical::PhysNetlistMsg = wire::read_message(file, opts)?;
    println!("physical netlist for part {part}", part = msg.part);
    println!("  {n} strings", n = msg.strings.len());
    println!("  {n} site instances", n = msg.site_insts.len());
    println!("  {n} placements", n = msg.placements.len());
    println!("  {n} nets", n = msg.nets.len());
    let mut by_kind = [0usize; 3];
    for net in &msg.nets {
        by_kind[match net.kind {
            physical::NetClassMsg::Signal => 0,
            physical::NetClassMsg::Gnd => 1,
            physical::NetClassMsg::Vcc => 2,
        }] += 1;
    }
    println!(
        "    {s} signal, {g} gnd, {v} vcc",
        s = by_kind[0],
        g = by_kind[1],
        v = by_kind[2],
    );
    println!("  {n} null-net stubs", n = msg.null_net.len());
    Ok(())
}

fn dump_device(file: &str, opts: WireOptions) -> Result<(), Box<dyn Error>> {
    let dev = devres::read_device(file, opts)?;
    println!("device {name}", name = dev.name);
    println!("  {n} tile types", n = dev.tile_types.len());
    println!("  {n} site types", n = dev.site_types.len());
    println!("  {n} tiles", n = dev.tiles.len());
    println!("  {n} sites", n = dev.sites.len());
    println!("  {n} nodes", n = dev.nodes.len());
    let tied = dev.nodes.values().filter(|n| n.tie.is_some()).count();
    println!("    {tied} tied");
    println!(
        "  constants: {b} tied bels, {w} tied wires, {e} node exceptions",
        b = dev.constants.gnd_bels.len() + dev.constants.vcc_bels.len(),
        w = dev.constants.gnd_wires.len() + dev.constants.vcc_wires.len(),
        e = dev.constants.gnd_node_exceptions.len() + dev.constants.vcc_node_exceptions.len(),
    );
    for (_, lib_name, lib) in dev.prim_lib.libraries.iter() {
        println!("  library {lib_name}: {n} cells", n = lib.cells.len());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let m = Command::new("fabric-cli")
        .subcommand_required(true)
        .subcommand(
            Command::new("dump")
                .about("print a summary of an interchange file")
                .arg(
                    Arg::new("kind")
                        .required(true)
                        .value_parser(["logical", "physical", "device"]),
                )
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(String)),
                )
                .args(file_args()),
        )
        .subcommand(
            Command::new("roundtrip")
                .about("decode a file and re-encode it, possibly changing framing")
                .arg(
                    Arg::new("kind")
                        .required(true)
                        .value_parser(["logical", "device"]),
                )
                .arg(
                    Arg::new("input")
                        .required(true)
                        .value_parser(value_parser!(String)),
                )
                .arg(
                    Arg::new("output")
                        .required(true)
                        .value_parser(value_parser!(String)),
                )
                .args(file_args())
                .arg(
                    Arg::new("raw-out")
                        .long("raw-out")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("packed-out")
                        .long("packed-out")
                        .action(ArgAction::SetTrue),
                ),
        )
        .get_matches();

    match m.subcommand() {
        Some(("dump", m)) => {
            let kind = m.get_one::<String>("kind").unwrap();
            let file = m.get_one::<String>("file").unwrap();
            let opts = opts_from(m);
            match kind.as_str() {
                "logical" => dump_logical(file, opts)?,
                "physical" => dump_physical(file, opts)?,
                "device" => dump_device(file, opts)?,
                _ => unreachable!(),
            }
        }
        Some(("roundtrip", m)) => {
            let kind = m.get_one::<String>("kind").unwrap();
            let input = m.get_one::<String>("input").unwrap();
            let output = m.get_one::<String>("output").unwrap();
            let in_opts = opts_from(m);
            let out_opts = WireOptions {
                gzip: !m.get_flag("raw-out"),
                packed: m.get_flag("packed-out"),
            };
            match kind.as_str() {
                "logical" => {
                    let netlist = logical::read_netlist(input, in_opts)?;
                    logical::write_netlist(&netlist, output, out_opts)?;
                }
                "device" => {
                    let dev = devres::read_device(input, in_opts)?;
                    devres::write_device(&dev, output, out_opts)?;
                }
                _ => unreachable!(),
            }
            println!("wrote {output}");
        }
        _ => unreachable!(),
    }
    Ok(())
}
