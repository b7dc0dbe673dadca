//! CDB64: a 64-bit variant of D. J. Bernstein's Constant Database.
//!
//! Bit-exact, byte-for-byte compatible with classic CDB except offsets are
//! 64-bit. Read-only, O(1) expected lookup; used here to map data-item ids
//! to their enclosing root transaction (see [`crate::root_tx`]).

pub mod build;
pub mod hash;
pub mod partitioned;
pub mod reader;
pub mod source;

pub use build::build_cdb64;
pub use partitioned::{CdbManifest, CdbValue, PartitionEntry, PartitionLocation, PartitionedCdbReader};
pub use reader::CdbReader;
pub use source::{ByteRangeSource, FileSource, HttpSource, MemorySource, MAX_SAFE_POSITION};
