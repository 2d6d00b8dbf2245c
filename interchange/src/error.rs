//! Codec error taxonomy.
//!
//! Every error is fatal to the pass that raised it; there is no retry and no
//! partial-success mode. Structural errors mean the byte stream itself is
//! inconsistent; device-consistency errors mean the stream references names
//! the target device does not have; the rest are violated domain invariants.

#[derive(Debug, thiserror::Error)]
pub enum InterchangeError {
    // --- structural ---
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("message encode failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("message decode failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("dangling {kind} index {index} (table size {len})")]
    DanglingIndex {
        kind: &'static str,
        index: u32,
        len: usize,
    },
    #[error("unknown property value tag {tag} for key {key}")]
    UnknownPropertyTag { tag: u8, key: String },
    #[error("cell instantiation cycle through {cell}")]
    CellCycle { cell: String },
    #[error("net endpoint references instance {0} outside its cell")]
    ForeignInstance(u32),
    #[error("missing required library {0}")]
    MissingLibrary(String),

    // --- device consistency ---
    #[error("unknown site {0} in target device")]
    UnknownSite(String),
    #[error("unknown site type {0} in target device")]
    UnknownSiteType(String),
    #[error("unknown tile {0} in target device")]
    UnknownTile(String),
    #[error("wire {wire} in tile {tile} not found")]
    UnknownWire { tile: String, wire: String },
    #[error("no pip in tile {tile} from wire {wire0} to wire {wire1}")]
    UnknownPip {
        tile: String,
        wire0: String,
        wire1: String,
    },
    #[error("no bel {bel} in site {site}")]
    UnknownBel { site: String, bel: String },
    #[error("no pin {pin} on bel {site}/{bel}")]
    UnknownBelPin {
        site: String,
        bel: String,
        pin: String,
    },
    #[error("no pin {pin} on site {site}")]
    UnknownSitePin { site: String, pin: String },
    #[error("site {site} has no instance and net {net} is not a constant net")]
    MissingSiteInst { site: String, net: String },

    // --- domain invariants ---
    #[error("duplicate cell {library}/{name}")]
    DuplicateCell { library: String, name: String },
    #[error("net {0} appears more than once")]
    DuplicateNet(String),
    #[error("more than one {0} net in physical netlist")]
    DuplicateConstantNet(&'static str),
    #[error("invalid {class} net {name}, should be named {expected}")]
    BadConstantNetName {
        class: &'static str,
        name: String,
        expected: &'static str,
    },
    #[error(
        "placement for macro {cell_type} (instance {inst}) is invalid; \
         only the macro's leaf cells may carry placements"
    )]
    MacroPlacement { inst: String, cell_type: String },
    #[error("macro {inst} is not fully placed; missing placements for {missing:?}")]
    MacroNotFullyPlaced { inst: String, missing: Vec<String> },
    #[error("cell {cell} placement on bel {site}/{bel} conflicts with placed cell {existing}")]
    ConflictingPlacement {
        cell: String,
        site: String,
        bel: String,
        existing: String,
    },
    #[error("placement on bel {site}/{bel} is not valid: the bel is a constant source")]
    PlacementOnTiedBel { site: String, bel: String },
    #[error("bel {bel} missing from the secondary bel set for pin mapping {bel_pin} -> {cell_pin}")]
    MissingOtherBel {
        bel: String,
        bel_pin: String,
        cell_pin: String,
    },
    #[error("ambiguous constant tie: {0}")]
    AmbiguousTie(String),
    #[error("constant tie mismatch: {0}")]
    TieMismatch(String),
    #[error("device image mismatch: {0}")]
    DeviceMismatch(String),
}

pub type Result<T> = std::result::Result<T, InterchangeError>;
