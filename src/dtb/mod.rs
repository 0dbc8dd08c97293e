//! Partitions as described by the `/partitions` node of the device tree.

mod compose;
mod container;
mod partitions;
pub mod slot;

pub use compose::{compose_partitions_node, replace_partitions_node};
pub use container::{
    identify_type, parse_multi_entries, DtbBody, DtbImage, DtbKind, MultiDtb, MultiDtbEntry,
};
pub use partitions::{
    compare_partitions, dtb_partitions, get_partitions_node, parse_partitions_node, snapshot,
    sort_by_phandle, DtbPartition, PartitionsHelper, DIFF_COUNT_UNIT, DIFF_MASK, DIFF_NAME,
    DIFF_SIZE,
};
pub use slot::{copy_checksum, select_copy, write_slot, SlotCopy, SlotTrailer};
