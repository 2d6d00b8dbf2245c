//! Interchange codec for logical netlists, physical (placed-and-routed)
//! netlists, and device resources.
//!
//! The wire format is a bincode message, optionally varint-packed and
//! optionally gzip-compressed (see [`WireOptions`]). Encode flattens the
//! in-memory models into integer-linked tables; decode rebuilds them,
//! resolving device names through type-level caches and validating the
//! result against the target device. Every failure is surfaced as a
//! descriptive [`InterchangeError`]; there are no partial results.

pub mod constants;
pub mod devres;
pub mod error;
pub mod logical;
pub mod physical;
pub mod resolve;
pub mod table;
pub mod wire;

pub use error::{InterchangeError, Result};
pub use wire::WireOptions;
