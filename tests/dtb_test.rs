mod common;

use amlpart::config::{DtbSlotLayout, LayoutOptions};
use amlpart::dtb::*;
use amlpart::ept::Table;
use amlpart::error::FormatError;
use amlpart::fdt::writer::{assemble, StructWriter, EMPTY_RSVMAP};
use amlpart::fdt::{DevTree, FdtHeader, PhandleList, StringBlock};
use amlpart::gzip::Gzip;
use amlpart::spec::AUTOFILL_SIZE;

use common::*;

fn names(parts: &[DtbPartition]) -> Vec<&str> {
    parts.iter().map(|p| p.name.as_str()).collect()
}

#[test]
fn parses_partitions_node() {
    init_logger();
    let dtb = sample_dtb();
    let tree = DevTree::new(&dtb).unwrap();
    let helper = dtb_partitions(&tree).unwrap();
    assert_eq!(helper.record_count, 4);
    assert_eq!(helper.phandle_root, ROOT_PHANDLE);
    assert_eq!(helper.linux_phandle_root, 0);
    assert_eq!(names(&helper.partitions), ["logo", "recovery", "system", "data"]);
    assert_eq!(helper.partitions[2].size, 2 * GIB);
    assert_eq!(helper.partitions[2].mask, 2);
    assert!(helper.partitions[3].is_autofill());
    assert_eq!(&helper.phandles[..4], &[0x10, 0x11, 0x12, 0x13]);
    assert!(helper.to_string().contains("(AUTOFILL)"));
}

#[test]
fn partitions_follow_part_references() {
    let mut spec = DtbSpec::new(&PARTS);
    spec.order = Some(vec![2, 0, 1, 3]);
    let dtb = build_dtb(&spec);
    let helper = dtb_partitions(&DevTree::new(&dtb).unwrap()).unwrap();
    assert_eq!(names(&helper.partitions), ["system", "logo", "recovery", "data"]);
}

#[test]
fn declared_count_must_match_children() {
    let mut spec = DtbSpec::new(&PARTS);
    spec.declared = Some(5);
    let dtb = build_dtb(&spec);
    let tree = DevTree::new(&dtb).unwrap();
    assert_eq!(
        dtb_partitions(&tree).unwrap_err(),
        FormatError::CountMismatch {
            declared: 5,
            parsed: 4
        }
    );
}

#[test]
fn tree_without_partitions() {
    let mut strings = StringBlock::from(Vec::new());
    let mut writer = StructWriter::new(&mut strings);
    writer
        .begin_node("")
        .begin_node("chosen")
        .prop_u32("phandle", 1)
        .end_node()
        .end_node()
        .end();
    let structure = writer.into_bytes();
    let dtb = assemble(&FdtHeader::default(), &EMPTY_RSVMAP, &structure, strings.as_bytes());
    let tree = DevTree::new(&dtb).unwrap();
    assert_eq!(
        dtb_partitions(&tree).unwrap_err(),
        FormatError::NoPartitionsNode
    );
}

fn parse_error<F>(body: F) -> FormatError
where
    F: FnOnce(&mut StructWriter<'_, '_>),
{
    let dtb = build_with(false, body);
    dtb_partitions(&DevTree::new(&dtb).unwrap()).unwrap_err()
}

fn logo_node<'w, 's, 'dt>(writer: &'w mut StructWriter<'s, 'dt>) -> &'w mut StructWriter<'s, 'dt> {
    writer
        .prop_u32("parts", 1)
        .prop_u32("phandle", ROOT_PHANDLE)
        .begin_node("logo")
        .prop_str("pname", "logo")
}

#[test]
fn size_must_be_eight_bytes() {
    let err = parse_error(|w| {
        logo_node(w)
            .prop_u32("size", 8)
            .prop_u32("mask", 1)
            .prop_u32("phandle", 0x10)
            .end_node();
    });
    assert_eq!(
        err,
        FormatError::PropertyLength {
            name: "size".to_owned(),
            expected: 8,
            found: 4
        }
    );
}

#[test]
fn mask_must_be_four_bytes() {
    let err = parse_error(|w| {
        logo_node(w)
            .prop_u64("size", 8 * MIB)
            .prop_u64("mask", 1)
            .prop_u32("phandle", 0x10)
            .end_node();
    });
    assert_eq!(
        err,
        FormatError::PropertyLength {
            name: "mask".to_owned(),
            expected: 4,
            found: 8
        }
    );
}

#[test]
fn partition_phandles_must_agree() {
    let err = parse_error(|w| {
        logo_node(w)
            .prop_u64("size", 8 * MIB)
            .prop_u32("mask", 1)
            .prop_u32("phandle", 0x10)
            .prop_u32("linux,phandle", 0x11)
            .end_node();
    });
    assert_eq!(
        err,
        FormatError::PhandleConflict {
            name: "logo".to_owned(),
            phandle: 0x10,
            linux_phandle: 0x11
        }
    );
}

#[test]
fn at_most_32_partitions() {
    let err = parse_error(|w| {
        w.prop_u32("parts", 33).prop_u32("phandle", ROOT_PHANDLE);
        for i in 0..33u32 {
            let name = format!("p{}", i);
            w.begin_node(&name)
                .prop_str("pname", &name)
                .prop_u64("size", MIB)
                .prop_u32("mask", 1)
                .prop_u32("phandle", 0x10 + i)
                .end_node();
        }
    });
    assert_eq!(err, FormatError::TooManyPartitions);
}

#[test]
fn node_names_fit_partition_names() {
    let err = parse_error(|w| {
        w.prop_u32("parts", 1)
            .prop_u32("phandle", ROOT_PHANDLE)
            .begin_node("sixteen_letters_")
            .prop_str("pname", "sixteen_letters_")
            .prop_u64("size", MIB)
            .prop_u32("mask", 1)
            .prop_u32("phandle", 0x10)
            .end_node();
    });
    assert_eq!(err, FormatError::NodeNameTooLong("sixteen_letters_".to_owned()));
}

#[test]
fn essential_property_names_must_exist() {
    let err = parse_error(|w| {
        logo_node(w)
            .prop_u64("size", 8 * MIB)
            .prop_u32("phandle", 0x10)
            .end_node();
    });
    assert_eq!(err, FormatError::MissingPropertyName("mask"));
}

#[test]
fn mixed_phandle_schemes_are_refused() {
    // /soc/emmc declares linux,phandle too, /partitions does not
    let dtb = build_with(true, |w| {
        logo_node(w)
            .prop_u64("size", 8 * MIB)
            .prop_u32("mask", 1)
            .prop_u32("phandle", 0x10)
            .end_node();
    });
    let tree = DevTree::new(&dtb).unwrap();
    assert_eq!(dtb_partitions(&tree).unwrap().partitions.len(), 1);
    assert_eq!(
        PhandleList::collect(&tree).unwrap_err(),
        FormatError::MixedPhandleSchemes
    );
    let records = [DtbPartition::new("data", AUTOFILL_SIZE, 4)];
    assert!(replace_partitions_node(&dtb, &records).is_err());
}

#[test]
fn replaced_node_parses_back() {
    init_logger();
    let dtb = sample_dtb();
    let records = [
        DtbPartition::new("logo", 16 * MIB, 1),
        DtbPartition::new("cache", 512 * MIB, 2),
        DtbPartition::new("data", AUTOFILL_SIZE, 4),
    ];
    let (rebuilt, assigned) = replace_partitions_node(&dtb, &records).unwrap();
    // 0x10..=0x13 are released, 2 and 0x40 stay taken
    let handles: Vec<u32> = assigned.iter().map(|p| p.phandle).collect();
    assert_eq!(handles, [1, 3, 4]);

    let tree = DevTree::new(&rebuilt).unwrap();
    let helper = dtb_partitions(&tree).unwrap();
    assert_eq!(compare_partitions(&helper.partitions, &records), 0);
    assert_eq!(helper.partitions, assigned);
    assert_eq!(helper.phandle_root, ROOT_PHANDLE);
    assert!(tree.find_node("/soc/emmc").unwrap().is_some());
    assert!(tree.find_node("/chosen").unwrap().is_some());

    let list = PhandleList::collect(&tree).unwrap();
    assert_eq!(list.len(), 5);
    assert!(!list.have_linux_phandle());
}

#[test]
fn paired_phandles_stay_paired() {
    let mut spec = DtbSpec::new(&PARTS);
    spec.paired = true;
    let dtb = build_dtb(&spec);
    let records = [DtbPartition::new("data", AUTOFILL_SIZE, 4)];
    let (rebuilt, _) = replace_partitions_node(&dtb, &records).unwrap();

    let tree = DevTree::new(&rebuilt).unwrap();
    let helper = dtb_partitions(&tree).unwrap();
    assert_eq!(helper.linux_phandle_root, ROOT_PHANDLE);
    let data = &helper.partitions[0];
    assert_ne!(data.phandle, 0);
    assert_eq!(data.phandle, data.linux_phandle);
    assert!(PhandleList::collect(&tree).unwrap().have_linux_phandle());
}

#[test]
fn multi_dtb_entries_may_disagree() {
    init_logger();
    let mut bigger = PARTS;
    bigger[2].1 = 3 * GIB;
    let dtbs = vec![sample_dtb(), build_dtb(&DtbSpec::new(&bigger))];
    let ids = [("gxl", "p212", "2g"), ("gxl", "p212", "1g")];
    let blob = build_multi(&ids, &dtbs);

    let image = DtbImage::load(&blob, &Gzip).unwrap();
    assert_eq!(image.kind(), DtbKind::Multi);
    if let DtbBody::Multi { container, .. } = &image.body {
        assert_eq!(container.version, 2);
        assert_eq!(container.entries[0].target(), "gxl_p212_2g");
        assert_eq!(container.entries[1].variant, "1g");
    } else {
        panic!("expected a multi-DTB body");
    }

    let all = image.all_partitions().unwrap();
    let diff = compare_partitions(&all[0].partitions, &all[1].partitions);
    assert_eq!(diff, DIFF_SIZE);
    assert_eq!(diff & DIFF_COUNT_UNIT, 0);
    assert_eq!(image.partitions().unwrap(), all[0]);
}

#[test]
fn multi_dtb_rewrite_keeps_identifiers() {
    let dtbs = vec![sample_dtb(), sample_dtb()];
    let ids = [("g12a", "u200", "2g"), ("g12a", "u200", "4g")];
    let blob = build_multi(&ids, &dtbs);
    let mut image = DtbImage::load(&blob, &Gzip).unwrap();

    let records = [
        DtbPartition::new("logo", 8 * MIB, 1),
        DtbPartition::new("data", AUTOFILL_SIZE, 4),
    ];
    image.replace_partitions(&records).unwrap();
    let written = image.to_bytes(&Gzip).unwrap();

    let entries = parse_multi_entries(&written).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].target(), "g12a_u200_4g");
    assert_eq!(entries[0].raw_id(), &blob[12..12 + 48]);
    assert!(entries.iter().all(|e| e.offset % 4 == 0));

    let reloaded = DtbImage::load(&written, &Gzip).unwrap();
    let all = reloaded.all_partitions().unwrap();
    assert_eq!(compare_partitions(&all[0].partitions, &records), 0);
    assert_eq!(compare_partitions(&all[0].partitions, &all[1].partitions), 0);
}

#[test]
fn unchanged_multi_dtb_rebuilds_identically() {
    let dtbs = vec![sample_dtb(), sample_dtb()];
    let blob = build_multi(&[("gxl", "p212", "2g"), ("gxl", "p212", "1g")], &dtbs);
    let image = DtbImage::load(&blob, &Gzip).unwrap();
    let written = image.to_bytes(&Gzip).unwrap();
    assert_eq!(&written[..], &blob[..written.len()]);
}

#[cfg(feature = "gzip")]
#[test]
fn gzipped_dtb_is_written_back_gzipped() {
    use amlpart::gzip::{is_gzip, Codec};

    let dtb = sample_dtb();
    let packed = Gzip.compress(&dtb).unwrap();
    let mut image = DtbImage::load(&packed, &Gzip).unwrap();
    assert_eq!(image.kind(), DtbKind::Gzipped);
    assert_eq!(image.fdts(), vec![dtb.as_slice()]);

    image
        .replace_partitions(&[DtbPartition::new("data", AUTOFILL_SIZE, 4)])
        .unwrap();
    let written = image.to_bytes(&Gzip).unwrap();
    assert!(is_gzip(&written));
    let reloaded = DtbImage::load(&written, &Gzip).unwrap();
    assert_eq!(names(&reloaded.partitions().unwrap().partitions), ["data"]);
}

#[test]
fn slot_copy_carries_dtb() {
    let layout = DtbSlotLayout::default();
    let dtb = sample_dtb();
    let template = SlotTrailer {
        magic: 0x5f4c_4d41,
        version: 1,
        ..SlotTrailer::default()
    };
    let mut area = write_slot(&dtb, &template, 42, &layout).unwrap();
    assert_eq!(area.len(), layout.area_size());

    let copy = select_copy(&area, &layout).unwrap();
    assert_eq!(copy.index, 0);
    let image = DtbImage::load(copy.payload, &Gzip).unwrap();
    assert_eq!(image.kind(), DtbKind::Plain);
    assert_eq!(image.partitions().unwrap().partitions.len(), 4);

    area[100] ^= 0x55;
    let copy = select_copy(&area, &layout).unwrap();
    assert_eq!(copy.index, 1);
    assert_eq!(copy.trailer.timestamp, 42);
}

#[test]
fn dtb_records_convert_to_table_and_back() {
    let dtb = sample_dtb();
    let helper = dtb_partitions(&DevTree::new(&dtb).unwrap()).unwrap();
    let table = Table::from_dtb(&helper.partitions, 8 * GIB, &LayoutOptions::default()).unwrap();
    assert_eq!(table.len(), 8);
    table.validate().unwrap();
    let data = &table.partitions[7];
    assert_eq!(data.end(), Some(8 * GIB));

    let records = table.to_dtb();
    assert_eq!(names(&records), ["cache", "logo", "recovery", "system", "data"]);
    assert!(records[4].is_autofill());
    assert_eq!(compare_partitions(&records[1..], &helper.partitions), 0);
}
