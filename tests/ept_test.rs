mod common;

use amlpart::config::{LayoutOptions, Mode};
use amlpart::ept::{Partition, Table};
use amlpart::error::{FormatError, ValidationError};
use amlpart::layout::{clone_table, create_table};
use amlpart::parg::parse_definers;
use amlpart::spec::EPT_TABLE_SIZE;

use common::*;

fn sample_table() -> Table {
    let definers = parse_definers(&["logo::8M:1", "system::1G:2", "data:::4"], Mode::ECreate).unwrap();
    create_table(&definers, 8 * GIB, &LayoutOptions::default()).unwrap()
}

#[test]
fn table_survives_serialisation() {
    init_logger();
    let table = sample_table();
    let bytes = table.to_bytes();
    assert_eq!(bytes.len(), EPT_TABLE_SIZE);
    assert_eq!(&bytes[..4], b"MPT\0");

    let parsed = Table::parse(&bytes).unwrap();
    assert_eq!(parsed, table);
    assert!(parsed.compare(&table));
    parsed.validate().unwrap();
}

#[test]
fn checksum_only_guards_first_slot() {
    let bytes = sample_table().to_bytes();

    // second slot, first byte of its size
    let mut later = bytes.clone();
    later[24 + 40 + 16] ^= 0x01;
    Table::parse(&later).unwrap().validate().unwrap();

    let mut first = bytes;
    first[24 + 16] ^= 0x01;
    assert!(matches!(
        Table::parse(&first).unwrap().validate(),
        Err(ValidationError::ChecksumMismatch { .. })
    ));
}

#[test]
fn truncated_table() {
    let bytes = sample_table().to_bytes();
    assert!(matches!(
        Table::parse(&bytes[..1000]),
        Err(FormatError::Truncated { .. })
    ));
}

#[test]
fn wrong_magic() {
    let mut bytes = sample_table().to_bytes();
    bytes[0] = b'X';
    assert!(matches!(
        Table::parse(&bytes).unwrap().validate(),
        Err(ValidationError::BadMagic { .. })
    ));
}

#[test]
fn duplicate_names() {
    let mut table = Table::default();
    table.partitions.push(Partition::new("boot", 0, 4096, 1).unwrap());
    table.partitions.push(Partition::new("boot", 4096, 4096, 1).unwrap());
    table.update_header();
    assert_eq!(
        table.validate(),
        Err(ValidationError::DuplicateName("boot".to_owned()))
    );
}

#[test]
fn snapshot_forms_clone_back() {
    let table = sample_table();
    let snapshot = table.snapshot();
    for form in [&snapshot.decimal, &snapshot.hex, &snapshot.human] {
        let args: Vec<&str> = form.split(' ').collect();
        let definers = parse_definers(&args, Mode::EClone).unwrap();
        assert_eq!(clone_table(&definers).unwrap(), table, "{}", form);
    }
    assert!(snapshot.human.starts_with("bootloader:0:4M:0 reserved:36M:64M:0"));
}

#[test]
fn report_shows_gaps() {
    let report = sample_table().to_string();
    assert!(report.starts_with("7 partitions in the table:"));
    assert!(report.contains("(GAP)"));
    assert!(!report.contains("(OVERLAP)"));
    assert!(report.contains("system"));
}
