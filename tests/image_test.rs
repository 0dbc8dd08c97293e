mod common;

use amlpart::config::{DtbSlotLayout, LayoutOptions};
use amlpart::dtb::{select_copy, write_slot, DtbImage, SlotTrailer};
use amlpart::ept::Table;
use amlpart::gzip::Gzip;
use amlpart::io::{read_at, write_at};
use amlpart::spec::{DTB_AREA_OFFSET, EPT_TABLE_SIZE};

use common::*;

/// A `reserved` partition image: the EPT at its start, the DTB area 4M in.
#[test]
fn reserved_partition_image() {
    init_logger();
    let layout = DtbSlotLayout::default();
    let mut file = tempfile::tempfile().unwrap();

    let dtb = sample_dtb();
    let parsed = DtbImage::load(&dtb, &Gzip).unwrap().partitions().unwrap();
    let table = Table::from_dtb(&parsed.partitions, 16 * GIB, &LayoutOptions::default()).unwrap();
    write_at(&mut file, 0, &table.to_bytes()).unwrap();

    let trailer = SlotTrailer {
        magic: 0x5f4c_4d41,
        version: 1,
        ..SlotTrailer::default()
    };
    let area = write_slot(&dtb, &trailer, 1_700_000_000, &layout).unwrap();
    write_at(&mut file, DTB_AREA_OFFSET, &area).unwrap();

    let ept = Table::parse(&read_at(&mut file, 0, EPT_TABLE_SIZE).unwrap()).unwrap();
    ept.validate().unwrap();
    assert_eq!(ept, table);
    assert_eq!(ept.capacity(), 16 * GIB);

    let area = read_at(&mut file, DTB_AREA_OFFSET, layout.area_size()).unwrap();
    let copy = select_copy(&area, &layout).unwrap();
    assert!(copy.checksum_valid);
    let image = DtbImage::load(copy.payload, &Gzip).unwrap();
    assert_eq!(image.partitions().unwrap(), parsed);
}
