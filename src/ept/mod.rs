//! The Amlogic eMMC partition table (EPT).
//!
//! A 1304-byte table stored at the start of the `reserved` partition: a 24-byte header followed by
//! 32 slots of 40 bytes each, all little-endian.

mod partition;
mod report;
mod table;

pub use partition::{validate_name, validate_partition_name, Partition};
pub use report::Snapshot;
pub use table::{checksum, compare, Header, Table, PEDANTIC_NAMES};
