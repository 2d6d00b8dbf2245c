//! Wire-format framing: a bincode message, optionally varint-packed,
//! optionally gzip-compressed.
//!
//! Reads and writes are all-or-nothing; there is no partial-result or
//! resume semantics.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bincode::{Decode, Encode};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::Result;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WireOptions {
    /// Gzip-compress the message stream.
    pub gzip: bool,
    /// Use the varint ("packed") integer encoding instead of fixed-width.
    pub packed: bool,
}

impl Default for WireOptions {
    fn default() -> Self {
        WireOptions {
            gzip: true,
            packed: false,
        }
    }
}

fn encode_into<T: Encode, W: Write>(msg: &T, w: &mut W, packed: bool) -> Result<()> {
    if packed {
        bincode::encode_into_std_write(msg, w, bincode::config::standard())?;
    } else {
        bincode::encode_into_std_write(msg, w, bincode::config::legacy())?;
    }
    Ok(())
}

fn decode_from<T: Decode<()>, R: Read>(r: &mut R, packed: bool) -> Result<T> {
    let msg = if packed {
        bincode::decode_from_std_read(r, bincode::config::standard())?
    } else {
        bincode::decode_from_std_read(r, bincode::config::legacy())?
    };
    Ok(msg)
}

pub fn write_message<T: Encode>(path: impl AsRef<Path>, msg: &T, opts: WireOptions) -> Result<()> {
    let f = File::create(path)?;
    if opts.gzip {
        let mut w = GzEncoder::new(f, Compression::default());
        encode_into(msg, &mut w, opts.packed)?;
        w.finish()?;
    } else {
        let mut w = BufWriter::new(f);
        encode_into(msg, &mut w, opts.packed)?;
        w.flush()?;
    }
    Ok(())
}

pub fn read_message<T: Decode<()>>(path: impl AsRef<Path>, opts: WireOptions) -> Result<T> {
    let f = File::open(path)?;
    if opts.gzip {
        let mut r = BufReader::new(GzDecoder::new(f));
        decode_from(&mut r, opts.packed)
    } else {
        let mut r = BufReader::new(f);
        decode_from(&mut r, opts.packed)
    }
}
