use log::info;

use crate::error::FormatError;
use crate::fdt::writer::{assemble, StructWriter};
use crate::fdt::{DevTree, PhandleList, StringBlock};
use crate::spec::{MAX_PARTITIONS, PARTITION_NAME_LEN};

use super::partitions::{get_partitions_node, parse_partitions_node, DtbPartition, PartitionsHelper};

type Result<T> = core::result::Result<T, FormatError>;

/// Emits a complete `/partitions` node for `records`.
///
/// Each record gets a fresh phandle from `phandles`, also declared as `linux,phandle` when the
/// tree uses both. The node keeps the root handles of `previous`. Returns the node's structure
/// tokens and the records with their phandles filled in.
pub fn compose_partitions_node(
    previous: &PartitionsHelper,
    records: &[DtbPartition],
    phandles: &mut PhandleList,
    strings: &mut StringBlock,
) -> Result<(Vec<u8>, Vec<DtbPartition>)> {
    if records.len() > MAX_PARTITIONS {
        return Err(FormatError::TooManyPartitions);
    }
    let paired = phandles.have_linux_phandle();
    let mut assigned = records.to_vec();
    for record in assigned.iter_mut() {
        if record.name.len() >= PARTITION_NAME_LEN {
            return Err(FormatError::NodeNameTooLong(record.name.clone()));
        }
        let phandle = phandles.allocate()?;
        record.phandle = phandle;
        record.linux_phandle = if paired { phandle } else { 0 };
    }

    let mut writer = StructWriter::new(strings);
    writer
        .begin_node("partitions")
        .prop_u32("parts", assigned.len() as u32);
    for (i, record) in assigned.iter().enumerate() {
        writer.prop_u32(&format!("part-{}", i), record.phandle);
    }
    if previous.phandle_root != 0 {
        writer.prop_u32("phandle", previous.phandle_root);
    }
    if previous.linux_phandle_root != 0 {
        writer.prop_u32("linux,phandle", previous.linux_phandle_root);
    }
    for record in &assigned {
        writer
            .begin_node(&record.name)
            .prop_str("pname", &record.name)
            .prop_u64("size", record.size)
            .prop_u32("mask", record.mask)
            .prop_u32("phandle", record.phandle);
        if paired {
            writer.prop_u32("linux,phandle", record.linux_phandle);
        }
        writer.end_node();
    }
    writer.end_node();
    Ok((writer.into_bytes(), assigned))
}

/// Rebuilds `dtb` with its `/partitions` node replaced by one describing `records`.
///
/// Everything outside the node is carried over unchanged; the phandles of the old partitions are
/// released before new ones are allocated.
pub fn replace_partitions_node(dtb: &[u8], records: &[DtbPartition]) -> Result<(Vec<u8>, Vec<DtbPartition>)> {
    let tree = DevTree::new(dtb)?;
    let node = get_partitions_node(&tree)?;
    let previous = parse_partitions_node(&tree, &node)?;
    let end = tree.node_end(&node)?;

    let mut phandles = PhandleList::collect(&tree)?;
    for part in &previous.partitions {
        phandles.release(part.phandle);
        phandles.release(part.linux_phandle);
    }

    let mut strings = tree.string_block();
    let (node_bytes, assigned) =
        compose_partitions_node(&previous, records, &mut phandles, &mut strings)?;

    let old_structure = tree.struct_block();
    let mut structure =
        Vec::with_capacity(old_structure.len() - (end - node.begin) + node_bytes.len());
    structure.extend_from_slice(&old_structure[..node.begin]);
    structure.extend_from_slice(&node_bytes);
    structure.extend_from_slice(&old_structure[end..]);

    let blob = assemble(
        tree.header(),
        tree.reservation_block()?,
        &structure,
        strings.as_bytes(),
    );
    info!(
        "rebuilt /partitions with {} partitions, DTB {} -> {} bytes",
        assigned.len(),
        tree.totalsize(),
        blob.len()
    );
    Ok((blob, assigned))
}
